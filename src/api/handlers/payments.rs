use axum::{extract::State, Json};
use serde::Serialize;

use crate::{
    error::AppResult,
    services::{
        notifications::NotificationService,
        orders::{OrdersService, WebhookOutcome},
        ozonpay::WebhookPayload,
    },
    AppState,
};

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
}

/// OzonPay asynchronous callback. Signature verification happens before
/// anything is touched; the order mutation is idempotent across duplicate
/// deliveries, while the receipt notification deliberately fires on every
/// confirmed delivery.
pub async fn ozonpay_webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> AppResult<Json<WebhookResponse>> {
    let service = OrdersService::new(state.db.clone(), (*state.config).clone());
    let (order, outcome) = service.handle_webhook(&payload).await?;

    match outcome {
        WebhookOutcome::Paid | WebhookOutcome::Failed => {
            NotificationService::new(state.db.clone(), state.config.telegram.clone())
                .notify_order_status(order);
        }
        WebhookOutcome::Ignored => {
            tracing::debug!(
                "Ignoring intermediate gateway status {:?} for order {}",
                payload.status,
                order.id
            );
        }
    }

    Ok(Json(WebhookResponse { status: "ok" }))
}
