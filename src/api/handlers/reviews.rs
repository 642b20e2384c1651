use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::Review,
    services::{auth::Claims, reviews::ReviewsService},
    AppState,
};

use super::super::middleware::get_user_id;
use super::auth::MessageResponse;

pub async fn list_product_reviews(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<Vec<Review>>> {
    let reviews = ReviewsService::new(state.db.clone())
        .list_for_product(product_id, false)
        .await?;
    Ok(Json(reviews))
}

#[derive(Debug, Deserialize)]
pub struct CreateReviewRequest {
    pub rating: i64,
    #[serde(default)]
    pub comment: String,
}

pub async fn create_review(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(product_id): Path<Uuid>,
    Json(req): Json<CreateReviewRequest>,
) -> AppResult<Json<Review>> {
    let user_id = get_user_id(&claims)?;

    let review = ReviewsService::new(state.db.clone())
        .create(product_id, user_id, req.rating, &req.comment)
        .await?;

    Ok(Json(review))
}

pub async fn admin_approve_review(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Review>> {
    let review = ReviewsService::new(state.db.clone()).approve(id).await?;
    Ok(Json(review))
}

pub async fn admin_delete_review(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    ReviewsService::new(state.db.clone()).delete(id).await?;

    Ok(Json(MessageResponse {
        message: "Review deleted".to_string(),
    }))
}
