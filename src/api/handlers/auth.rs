use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    models::{TokenPair, User},
    services::auth::{AuthService, Claims},
    AppState,
};

use super::super::middleware::get_session_id;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: String,
    pub address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerificationStartedResponse {
    pub verification_token: String,
    pub bot_link: String,
}

/// Registration submit: stores the pending registration and hands back the
/// bot deep link the client should open, then poll `check-phone-verification`.
pub async fn request_phone_verification(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Json<VerificationStartedResponse>> {
    if !req.email.contains('@') {
        return Err(AppError::Validation("Invalid email".to_string()));
    }
    if req.password.len() < 6 {
        return Err(AppError::Validation(
            "Password must be at least 6 characters".to_string(),
        ));
    }
    if req.full_name.trim().is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }
    if req.phone.trim().is_empty() {
        return Err(AppError::Validation("Phone is required".to_string()));
    }

    let auth_service = AuthService::new(state.db.clone(), (*state.config).clone());
    let token = auth_service
        .submit_registration(
            req.email.trim(),
            &req.password,
            req.full_name.trim(),
            &req.phone,
            req.address.as_deref(),
        )
        .await?;

    let bot_link = state.config.bot_deep_link(&token);

    Ok(Json(VerificationStartedResponse {
        verification_token: token,
        bot_link,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CheckVerificationRequest {
    pub phone: String,
    pub verification_token: String,
}

/// Poll response: `verified: false` is the normal "keep polling" case,
/// not an error.
#[derive(Debug, Serialize)]
pub struct CheckVerificationResponse {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenPair>,
}

pub async fn check_phone_verification(
    State(state): State<AppState>,
    Json(req): Json<CheckVerificationRequest>,
) -> AppResult<Json<CheckVerificationResponse>> {
    let auth_service = AuthService::new(state.db.clone(), (*state.config).clone());
    let result = auth_service
        .finish_registration(&req.phone, &req.verification_token)
        .await?;

    let response = match result {
        Some((user, tokens)) => CheckVerificationResponse {
            verified: true,
            user: Some(user),
            tokens: Some(tokens),
        },
        None => CheckVerificationResponse {
            verified: false,
            user: None,
            tokens: None,
        },
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub tokens: TokenPair,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let auth_service = AuthService::new(state.db.clone(), (*state.config).clone());
    let (user, tokens) = auth_service.login(req.email.trim(), &req.password).await?;

    Ok(Json(AuthResponse { user, tokens }))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub tokens: TokenPair,
}

pub async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> AppResult<Json<TokenResponse>> {
    let auth_service = AuthService::new(state.db.clone(), (*state.config).clone());
    let tokens = auth_service.refresh_token(&req.refresh_token).await?;

    Ok(Json(TokenResponse { tokens }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<MessageResponse>> {
    let session_id = get_session_id(&claims)?;

    let auth_service = AuthService::new(state.db.clone(), (*state.config).clone());
    auth_service.logout(session_id).await?;

    Ok(Json(MessageResponse {
        message: "Logged out successfully".to_string(),
    }))
}
