use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{DiscountType, PromoCode},
    money,
    services::{auth::Claims, promo::PromoService},
    AppState,
};

use super::super::middleware::get_user_id;
use super::auth::MessageResponse;

#[derive(Debug, Deserialize)]
pub struct ValidatePromoRequest {
    pub code: String,
    /// Item subtotal of the cart being previewed, delivery excluded.
    pub subtotal: String,
}

#[derive(Debug, Serialize)]
pub struct ValidatePromoResponse {
    pub code: String,
    pub discount: String,
    pub total_after_discount: String,
}

/// Checkout-page preview: same validation as redemption, no side effects.
pub async fn validate_promo(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ValidatePromoRequest>,
) -> AppResult<Json<ValidatePromoResponse>> {
    let user_id = get_user_id(&claims)?;
    let subtotal = money::parse_amount(&req.subtotal)?;

    let (promo, discount) = PromoService::new(state.db.clone())
        .validate(req.code.trim(), user_id, subtotal)
        .await?;

    Ok(Json(ValidatePromoResponse {
        code: promo.code,
        discount: money::format_amount(discount),
        total_after_discount: money::format_amount(subtotal - discount),
    }))
}

// Admin CRUD

pub async fn admin_list_promo_codes(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<PromoCode>>> {
    let codes = PromoService::new(state.db.clone()).list().await?;
    Ok(Json(codes))
}

#[derive(Debug, Deserialize)]
pub struct CreatePromoRequest {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: String,
    pub min_order_amount: Option<String>,
    pub max_uses: Option<i64>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

pub async fn admin_create_promo_code(
    State(state): State<AppState>,
    Json(req): Json<CreatePromoRequest>,
) -> AppResult<Json<PromoCode>> {
    let promo = PromoService::new(state.db.clone())
        .create(
            req.code.trim(),
            req.discount_type,
            &req.discount_value,
            req.min_order_amount.as_deref(),
            req.max_uses,
            req.starts_at,
            req.ends_at,
        )
        .await?;

    Ok(Json(promo))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePromoRequest {
    pub is_active: bool,
}

pub async fn admin_update_promo_code(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePromoRequest>,
) -> AppResult<Json<PromoCode>> {
    let promo = PromoService::new(state.db.clone())
        .set_active(id, req.is_active)
        .await?;
    Ok(Json(promo))
}

pub async fn admin_delete_promo_code(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    PromoService::new(state.db.clone()).delete(id).await?;

    Ok(Json(MessageResponse {
        message: "Promo code deleted".to_string(),
    }))
}
