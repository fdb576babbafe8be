//! Session record and key minting (spec.md §3).

use relay_proto::Role;
use std::time::Instant;
use uuid::Uuid;

pub type SessionKey = String;

#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// `None` for a driver that registered without an account id and has
    /// not yet sent its first update (spec.md §9 open question).
    pub account_id: Option<String>,
    pub role: Role,
    pub created_at: Instant,
    pub last_activity_at: Instant,
    /// The connection currently bound to this session, or `None` while the
    /// bound driver/user record is in grace.
    pub connection_id: Option<u64>,
}

impl SessionRecord {
    pub fn new(account_id: Option<String>, role: Role, connection_id: u64, now: Instant) -> Self {
        Self {
            account_id,
            role,
            created_at: now,
            last_activity_at: now,
            connection_id: Some(connection_id),
        }
    }
}

/// Mints an opaque, unguessable session key.
pub fn mint_session_key() -> SessionKey {
    Uuid::new_v4().to_string()
}
