use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: String,
    pub original_price: Option<String>,
    pub quantity: i64,
    pub category: Option<String>,
    pub images: sqlx::types::Json<Vec<String>>,
    pub labels: sqlx::types::Json<Vec<String>>,
    pub is_available: bool,
    pub is_preorder: bool,
    pub is_rare: bool,
    pub is_easy_care: bool,
    pub is_pet_safe: bool,
    pub is_discount: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
