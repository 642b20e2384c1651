use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};

use crate::{
    error::AppResult,
    models::{BalanceTopup, User},
    services::{auth::Claims, users::UsersService},
    AppState,
};

use super::super::middleware::get_user_id;
use super::auth::MessageResponse;

pub async fn get_current_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<User>> {
    let user_id = get_user_id(&claims)?;
    let user = UsersService::new(state.db.clone()).get(user_id).await?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

pub async fn update_current_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateUserRequest>,
) -> AppResult<Json<User>> {
    let user_id = get_user_id(&claims)?;

    let user = UsersService::new(state.db.clone())
        .update_profile(
            user_id,
            req.full_name.as_deref(),
            req.phone.as_deref(),
            req.address.as_deref(),
        )
        .await?;

    Ok(Json(user))
}

pub async fn delete_current_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<MessageResponse>> {
    let user_id = get_user_id(&claims)?;

    UsersService::new(state.db.clone())
        .delete_account(user_id)
        .await?;

    Ok(Json(MessageResponse {
        message: "Account deleted".to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: String,
    pub topups: Vec<BalanceTopup>,
}

pub async fn get_balance(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<BalanceResponse>> {
    let user_id = get_user_id(&claims)?;
    let service = UsersService::new(state.db.clone());

    let user = service.get(user_id).await?;
    let topups = service.list_topups(user_id).await?;

    Ok(Json(BalanceResponse {
        balance: user.balance,
        topups,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TopupRequest {
    pub amount: String,
}

pub async fn request_topup(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TopupRequest>,
) -> AppResult<Json<BalanceTopup>> {
    let user_id = get_user_id(&claims)?;

    let topup = UsersService::new(state.db.clone())
        .request_topup(user_id, &req.amount)
        .await?;

    Ok(Json(topup))
}
