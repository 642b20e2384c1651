use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Unconfirmed signup awaiting phone verification. At most one active row
/// per normalized phone; garbage-collected after 24 hours.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PendingRegistration {
    pub id: Uuid,
    pub phone: String,
    /// Opaque signup payload, stored as JSON. The password inside is
    /// already a bcrypt hash; this blob is as sensitive as the users table.
    pub user_data: sqlx::types::Json<PendingUserData>,
    pub verification_token: String,
    /// Telegram chat currently verifying this registration, bound by the
    /// bot's /start handler.
    pub telegram_chat_id: Option<i64>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingUserData {
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub address: Option<String>,
}
