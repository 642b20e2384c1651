use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PromoCode {
    pub id: Uuid,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: String,
    pub min_order_amount: Option<String>,
    pub max_uses: Option<i64>,
    pub current_uses: i64,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

/// One redemption per (code, user), enforced by the unique index on this
/// ledger table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PromoCodeUse {
    pub id: Uuid,
    pub promo_code_id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub discount_amount: String,
    pub created_at: DateTime<Utc>,
}
