use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::User,
    services::auth::{AuthService, Claims},
    AppState,
};

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    let auth_service = AuthService::new(state.db.clone(), (*state.config).clone());
    let claims = auth_service.validate_token(token)?;

    // Insert claims into request extensions
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

/// Admin guard. Re-reads the role from the database on every request, so
/// a demoted admin loses access immediately, with nothing cached across
/// requests.
pub async fn admin_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = request
        .extensions()
        .get::<Claims>()
        .ok_or(AppError::Unauthorized)?;
    let user_id = get_user_id(claims)?;

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?;

    if !user.map(|u| u.is_admin).unwrap_or(false) {
        return Err(AppError::AdminRequired);
    }

    Ok(next.run(request).await)
}

/// Extract user_id from request extensions
pub fn get_user_id(claims: &Claims) -> AppResult<Uuid> {
    Uuid::parse_str(&claims.sub).map_err(|_| AppError::InvalidToken)
}

/// Extract session_id from request extensions
pub fn get_session_id(claims: &Claims) -> AppResult<Uuid> {
    Uuid::parse_str(&claims.sid).map_err(|_| AppError::InvalidToken)
}
