use std::num::NonZeroU32;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

use crate::RelayError;
use crate::registry::ConnId;

/// Token bucket applied to `send-message` on each connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendLimits {
    pub per_second: NonZeroU32,
    pub burst: NonZeroU32,
}

/// One authenticated connection as the relay sees it.
pub struct Session {
    pub conn_id: ConnId,
    pub user_id: String,
    send_limiter: Option<DefaultDirectRateLimiter>,
}

impl Session {
    pub fn new(conn_id: ConnId, user_id: impl Into<String>, limits: Option<SendLimits>) -> Self {
        let send_limiter = limits.map(|limits| {
            RateLimiter::direct(Quota::per_second(limits.per_second).allow_burst(limits.burst))
        });
        Self {
            conn_id,
            user_id: user_id.into(),
            send_limiter,
        }
    }

    /// Payload ids must name the authenticated user.
    pub fn authorize(&self, claimed_user_id: &str) -> Result<(), RelayError> {
        if claimed_user_id == self.user_id {
            Ok(())
        } else {
            Err(RelayError::Forbidden)
        }
    }

    /// Take one token for a send. Unlimited when no limits are configured.
    pub fn try_acquire_send(&self) -> Result<(), RelayError> {
        match &self.send_limiter {
            Some(limiter) => limiter.check().map_err(|_| RelayError::RateLimited),
            None => Ok(()),
        }
    }
}
