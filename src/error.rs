use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    // Auth errors
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Admin access required")]
    AdminRequired,
    #[error("Not the owner of this resource")]
    NotOwner,

    // Registration errors
    #[error("User already exists")]
    UserAlreadyExists,
    #[error("Registration not found")]
    RegistrationNotFound,

    // User errors
    #[error("User not found")]
    UserNotFound,
    #[error("Insufficient balance")]
    InsufficientBalance,

    // Catalog errors
    #[error("Product not found")]
    ProductNotFound,
    #[error("Not enough stock for {0}")]
    OutOfStock(String),

    // Order errors
    #[error("Order not found")]
    OrderNotFound,
    #[error("Invalid order state: {0}")]
    InvalidOrderState(String),

    // Promo errors
    #[error("Promo code not found")]
    PromoCodeNotFound,
    #[error("Promo code is not active")]
    PromoCodeInactive,
    #[error("Promo code usage limit reached")]
    PromoCodeExhausted,
    #[error("Promo code already used")]
    PromoCodeAlreadyUsed,
    #[error("Order amount below promo code minimum")]
    PromoCodeMinAmount,

    // Review errors
    #[error("Review not found")]
    ReviewNotFound,

    // Top-up errors
    #[error("Top-up not found")]
    TopupNotFound,

    // External integration errors
    #[error("Payment gateway error: {0}")]
    PaymentGateway(String),
    #[error("Webhook signature mismatch")]
    InvalidWebhookSignature,

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Bad request: {0}")]
    BadRequest(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // JWT errors
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    // Internal errors
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            // 400 Bad Request
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::InsufficientBalance => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::OutOfStock(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::InvalidOrderState(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::PromoCodeInactive => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::PromoCodeExhausted => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::PromoCodeAlreadyUsed => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::PromoCodeMinAmount => (StatusCode::BAD_REQUEST, self.to_string()),

            // 401 Unauthorized
            AppError::InvalidCredentials => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Jwt(_) => (StatusCode::UNAUTHORIZED, "Invalid token".to_string()),

            // 403 Forbidden
            AppError::AdminRequired => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::NotOwner => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::InvalidWebhookSignature => (StatusCode::FORBIDDEN, self.to_string()),

            // 404 Not Found
            AppError::UserNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::RegistrationNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::ProductNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::OrderNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::PromoCodeNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::ReviewNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::TopupNotFound => (StatusCode::NOT_FOUND, self.to_string()),

            // 409 Conflict
            AppError::UserAlreadyExists => (StatusCode::CONFLICT, self.to_string()),

            // 503 Service Unavailable, so the client can offer a fallback
            // payment method instead of retrying blindly
            AppError::PaymentGateway(msg) => {
                tracing::error!("Payment gateway error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }

            // 500 Internal Server Error
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
