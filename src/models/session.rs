use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::user::PublicUser;

/// How long a session record survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDurability {
    /// Gone when the browsing context ends.
    Ephemeral,
    /// Survives restarts ("remember me").
    Persistent,
}

/// A persisted login session.
///
/// Holds a redacted user snapshot only; credential material never enters a
/// session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// The logged-in user, redacted.
    pub user: PublicUser,
    /// When the session was created.
    pub login_time: DateTime<Utc>,
    /// When the session expires.
    pub expires_at: DateTime<Utc>,
}
