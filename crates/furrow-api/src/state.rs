use std::sync::Arc;

use furrow_db::Database;
use furrow_gateway::Relay;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    /// Mark-read over REST notifies the sender through the same relay
    pub relay: Relay,
    pub jwt_secret: String,
}
