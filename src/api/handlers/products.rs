use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::Product,
    services::{
        notifications::NotificationService,
        products::{ProductFilter, ProductInput, ProductsService},
    },
    AppState,
};

use super::auth::MessageResponse;

pub async fn list_products(
    State(state): State<AppState>,
    Query(filter): Query<ProductFilter>,
) -> AppResult<Json<Vec<Product>>> {
    let products = ProductsService::new(state.db.clone()).list(&filter).await?;
    Ok(Json(products))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Product>> {
    let product = ProductsService::new(state.db.clone()).get(id).await?;
    Ok(Json(product))
}

pub async fn create_product(
    State(state): State<AppState>,
    Json(input): Json<ProductInput>,
) -> AppResult<Json<Product>> {
    let product = ProductsService::new(state.db.clone()).create(&input).await?;

    // Best-effort broadcast; never blocks the admin request.
    NotificationService::new(state.db.clone(), state.config.telegram.clone())
        .broadcast_new_product(product.clone());

    Ok(Json(product))
}

pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<ProductInput>,
) -> AppResult<Json<Product>> {
    let product = ProductsService::new(state.db.clone())
        .update(id, &input)
        .await?;
    Ok(Json(product))
}

pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    ProductsService::new(state.db.clone()).delete(id).await?;

    Ok(Json(MessageResponse {
        message: "Product deleted".to_string(),
    }))
}
