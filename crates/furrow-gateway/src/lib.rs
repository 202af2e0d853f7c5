pub mod connection;
pub mod error;
pub mod registry;
pub mod relay;
pub mod session;

pub use error::RelayError;
pub use registry::{Registry, Room, personal_room, room_key_for};
pub use relay::Relay;
pub use session::{SendLimits, Session};
