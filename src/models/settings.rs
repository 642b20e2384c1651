use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Singleton row: where the bot sends admin-facing notifications and
/// whether outbound messaging is enabled at all.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TelegramSettings {
    pub id: i64,
    pub admin_chat_id: Option<i64>,
    pub notifications_enabled: bool,
    pub broadcast_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

/// Singleton row: transfer requisites shown on the checkout page for the
/// direct-transfer payment method.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentDetails {
    pub id: i64,
    pub card_number: String,
    pub bank_name: String,
    pub recipient_name: String,
    pub instructions: String,
    pub updated_at: DateTime<Utc>,
}
