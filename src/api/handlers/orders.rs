use axum::{
    extract::{Multipart, Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Order, OrderStatus, PaymentMethod},
    services::{
        auth::Claims,
        notifications::NotificationService,
        orders::{CreateOrderInput, OrdersService},
    },
    AppState,
};

use super::super::middleware::get_user_id;
use super::auth::MessageResponse;

fn notifications(state: &AppState) -> NotificationService {
    NotificationService::new(state.db.clone(), state.config.telegram.clone())
}

pub async fn create_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(input): Json<CreateOrderInput>,
) -> AppResult<Json<Order>> {
    let user_id = get_user_id(&claims)?;
    let service = OrdersService::new(state.db.clone(), (*state.config).clone());

    let order = service.create_order(user_id, &input).await?;

    // The gateway link is requested after the order row is committed, so a
    // gateway outage leaves a retryable order rather than no order.
    let order = if order.payment_method == PaymentMethod::Ozonpay {
        service.request_payment_link(order).await?
    } else {
        order
    };

    notifications(&state).notify_new_order(order.clone());

    Ok(Json(order))
}

pub async fn list_my_orders(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<Order>>> {
    let user_id = get_user_id(&claims)?;
    let orders = OrdersService::new(state.db.clone(), (*state.config).clone())
        .list_for_user(user_id)
        .await?;
    Ok(Json(orders))
}

pub async fn get_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Order>> {
    let user_id = get_user_id(&claims)?;
    let service = OrdersService::new(state.db.clone(), (*state.config).clone());

    let order = service.get(id).await?;
    if order.user_id != user_id {
        // Admins may inspect any order.
        let is_admin: Option<bool> = sqlx::query_scalar("SELECT is_admin FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&state.db)
            .await?;
        if !is_admin.unwrap_or(false) {
            return Err(AppError::NotOwner);
        }
    }

    Ok(Json(order))
}

pub async fn retry_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Order>> {
    let user_id = get_user_id(&claims)?;
    let order = OrdersService::new(state.db.clone(), (*state.config).clone())
        .retry_payment(id, user_id)
        .await?;
    Ok(Json(order))
}

/// Multipart payment-proof upload for direct-transfer orders. The file
/// lands in the local uploads directory; the order keeps the relative path.
pub async fn upload_proof(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<Json<Order>> {
    let user_id = get_user_id(&claims)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name != "proof" {
            continue;
        }

        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read file: {}", e)))?;

        let extension = match content_type.as_str() {
            "image/png" => "png",
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "application/pdf" => "pdf",
            _ => "bin",
        };

        let dir = format!("{}/proofs", state.config.uploads_dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create uploads dir: {}", e))?;
        let path = format!("{}/{}.{}", dir, id, extension);
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to store proof: {}", e))?;

        let order = OrdersService::new(state.db.clone(), (*state.config).clone())
            .attach_proof(id, user_id, &path)
            .await?;

        notifications(&state).notify_payment_proof(order.clone());

        return Ok(Json(order));
    }

    Err(AppError::BadRequest("No proof file in request".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct ApplyPromoRequest {
    pub code: String,
}

pub async fn apply_promo(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApplyPromoRequest>,
) -> AppResult<Json<Order>> {
    let user_id = get_user_id(&claims)?;
    let order = OrdersService::new(state.db.clone(), (*state.config).clone())
        .apply_promo(id, user_id, req.code.trim())
        .await?;
    Ok(Json(order))
}

// Admin

#[derive(Debug, Deserialize)]
pub struct AdminOrdersQuery {
    pub status: Option<OrderStatus>,
}

pub async fn admin_list_orders(
    State(state): State<AppState>,
    Query(query): Query<AdminOrdersQuery>,
) -> AppResult<Json<Vec<Order>>> {
    let orders = OrdersService::new(state.db.clone(), (*state.config).clone())
        .list_all(query.status)
        .await?;
    Ok(Json(orders))
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub order_status: OrderStatus,
    pub tracking_number: Option<String>,
    pub comment: Option<String>,
    pub cancel_reason: Option<String>,
}

pub async fn admin_update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateOrderStatusRequest>,
) -> AppResult<Json<Order>> {
    let order = OrdersService::new(state.db.clone(), (*state.config).clone())
        .admin_update_status(
            id,
            req.order_status,
            req.tracking_number,
            req.comment,
            req.cancel_reason,
        )
        .await?;

    notifications(&state).notify_order_status(order.clone());

    Ok(Json(order))
}

pub async fn admin_delete_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    OrdersService::new(state.db.clone(), (*state.config).clone())
        .admin_delete_order(id)
        .await?;

    Ok(Json(MessageResponse {
        message: "Order deleted, stock and promo usage restored".to_string(),
    }))
}
