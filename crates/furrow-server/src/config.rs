use std::num::NonZeroU32;
use std::path::PathBuf;

use anyhow::{Context, bail};

use furrow_gateway::SendLimits;
use furrow_notify::email::SmtpSettings;

const DEV_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Public web app base URL, used in notification deep links
    pub app_url: String,
    /// Web Push gateway; push is disabled when unset
    pub push_gateway_url: Option<String>,
    /// Email is disabled when `FURROW_SMTP_HOST` is unset
    pub smtp: Option<SmtpSettings>,
    /// `None` means unlimited
    pub send_limits: Option<SendLimits>,
}

impl Config {
    /// Load `.env` if present, then read `FURROW_*` variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        let port = match get("FURROW_PORT") {
            Some(p) => p.parse().with_context(|| format!("FURROW_PORT is not a port: {}", p))?,
            None => 3000,
        };

        let jwt_secret = get("FURROW_JWT_SECRET").unwrap_or_else(|| DEV_SECRET.into());

        let smtp = match get("FURROW_SMTP_HOST") {
            Some(host) => {
                let Some(from) = get("FURROW_SMTP_FROM") else {
                    bail!("FURROW_SMTP_FROM is required when FURROW_SMTP_HOST is set");
                };
                let port = match get("FURROW_SMTP_PORT") {
                    Some(p) => p
                        .parse()
                        .with_context(|| format!("FURROW_SMTP_PORT is not a port: {}", p))?,
                    None => 587,
                };
                Some(SmtpSettings {
                    host,
                    port,
                    username: get("FURROW_SMTP_USERNAME"),
                    password: get("FURROW_SMTP_PASSWORD"),
                    from,
                })
            }
            None => None,
        };

        let rate: u32 = parse_or(get("FURROW_SEND_RATE_PER_SEC"), 5, "FURROW_SEND_RATE_PER_SEC")?;
        let burst: u32 = parse_or(get("FURROW_SEND_BURST"), 10, "FURROW_SEND_BURST")?;
        // A rate of 0 turns limiting off
        let send_limits = NonZeroU32::new(rate).map(|per_second| SendLimits {
            per_second,
            burst: NonZeroU32::new(burst).unwrap_or(per_second),
        });

        Ok(Self {
            host: get("FURROW_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: PathBuf::from(get("FURROW_DB_PATH").unwrap_or_else(|| "furrow.db".into())),
            jwt_secret,
            app_url: get("FURROW_APP_URL")
                .unwrap_or_else(|| "http://localhost:5173".into())
                .trim_end_matches('/')
                .to_string(),
            push_gateway_url: get("FURROW_PUSH_GATEWAY_URL"),
            smtp,
            send_limits,
        })
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_SECRET
    }
}

fn parse_or(value: Option<String>, default: u32, key: &str) -> anyhow::Result<u32> {
    match value {
        Some(v) => v
            .parse()
            .with_context(|| format!("{} is not a non-negative integer: {}", key, v)),
        None => Ok(default),
    }
}
