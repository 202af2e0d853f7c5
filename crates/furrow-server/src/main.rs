use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use furrow_db::Database;
use furrow_gateway::{Registry, Relay};
use furrow_notify::email::{DisabledEmail, EmailTransport, SmtpEmailTransport};
use furrow_notify::push::{DisabledPush, HttpPushTransport, PushTransport};
use furrow_notify::store::SqliteNotificationStore;
use furrow_notify::Notifier;
use furrow_server::app::build_router;
use furrow_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "furrow=debug,tower_http=debug".into()),
        )
        .init();

    if config.uses_dev_secret() {
        warn!("FURROW_JWT_SECRET not set, using the development secret");
    }

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);
    info!("Database ready at {}", config.db_path.display());

    // Notification channels
    let push: Arc<dyn PushTransport> = match &config.push_gateway_url {
        Some(url) => {
            info!("Push notifications via {}", url);
            Arc::new(HttpPushTransport::new(url.as_str())?)
        }
        None => {
            info!("Push notifications disabled");
            Arc::new(DisabledPush)
        }
    };
    let email: Arc<dyn EmailTransport> = match &config.smtp {
        Some(smtp) => {
            info!("Email notifications via {}:{}", smtp.host, smtp.port);
            Arc::new(SmtpEmailTransport::new(smtp)?)
        }
        None => {
            info!("Email notifications disabled");
            Arc::new(DisabledEmail)
        }
    };
    let notifier = Notifier::new(
        Arc::new(SqliteNotificationStore::new(db.clone())),
        push,
        email,
        config.app_url.clone(),
    );

    let relay = Relay::new(db.clone(), Registry::new(), Arc::new(notifier), config.send_limits);
    match config.send_limits {
        Some(limits) => info!(
            "send-message limited to {}/s, burst {}",
            limits.per_second, limits.burst
        ),
        None => info!("send-message rate unlimited"),
    }

    let app = build_router(db, relay.clone(), config.jwt_secret.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Furrow server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(relay))
        .await?;

    info!("Furrow server stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM, after closing every gateway connection.
async fn shutdown_signal(relay: Relay) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    relay.shutdown();
}
