use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{BalanceTopup, PaymentDetails, TelegramSettings},
    services::{telegram::get_settings, users::UsersService},
    AppState,
};

// Telegram settings

pub async fn get_telegram_settings(
    State(state): State<AppState>,
) -> AppResult<Json<TelegramSettings>> {
    let settings = get_settings(&state.db).await?;
    Ok(Json(settings))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTelegramSettingsRequest {
    pub admin_chat_id: Option<i64>,
    pub notifications_enabled: bool,
    pub broadcast_enabled: bool,
}

pub async fn update_telegram_settings(
    State(state): State<AppState>,
    Json(req): Json<UpdateTelegramSettingsRequest>,
) -> AppResult<Json<TelegramSettings>> {
    let settings: TelegramSettings = sqlx::query_as(
        r#"
        UPDATE telegram_settings
        SET admin_chat_id = ?, notifications_enabled = ?, broadcast_enabled = ?, updated_at = ?
        WHERE id = 1
        RETURNING *
        "#,
    )
    .bind(req.admin_chat_id)
    .bind(req.notifications_enabled)
    .bind(req.broadcast_enabled)
    .bind(Utc::now())
    .fetch_one(&state.db)
    .await?;

    Ok(Json(settings))
}

// Payment details (direct-transfer requisites)

pub async fn get_payment_details(
    State(state): State<AppState>,
) -> AppResult<Json<PaymentDetails>> {
    let details: PaymentDetails = sqlx::query_as("SELECT * FROM payment_details WHERE id = 1")
        .fetch_one(&state.db)
        .await?;
    Ok(Json(details))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentDetailsRequest {
    pub card_number: String,
    pub bank_name: String,
    pub recipient_name: String,
    #[serde(default)]
    pub instructions: String,
}

pub async fn update_payment_details(
    State(state): State<AppState>,
    Json(req): Json<UpdatePaymentDetailsRequest>,
) -> AppResult<Json<PaymentDetails>> {
    let details: PaymentDetails = sqlx::query_as(
        r#"
        UPDATE payment_details
        SET card_number = ?, bank_name = ?, recipient_name = ?, instructions = ?, updated_at = ?
        WHERE id = 1
        RETURNING *
        "#,
    )
    .bind(req.card_number.trim())
    .bind(req.bank_name.trim())
    .bind(req.recipient_name.trim())
    .bind(req.instructions.trim())
    .bind(Utc::now())
    .fetch_one(&state.db)
    .await?;

    Ok(Json(details))
}

// Top-up moderation

#[derive(Debug, Deserialize)]
pub struct ResolveTopupRequest {
    pub action: String,
    pub comment: Option<String>,
}

pub async fn resolve_topup(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveTopupRequest>,
) -> AppResult<Json<BalanceTopup>> {
    let approve = match req.action.as_str() {
        "confirm" => true,
        "reject" => false,
        other => {
            return Err(AppError::BadRequest(format!(
                "Unknown action: {}",
                other
            )))
        }
    };

    let topup = UsersService::new(state.db.clone())
        .resolve_topup(id, approve, req.comment.as_deref())
        .await?;

    Ok(Json(topup))
}
