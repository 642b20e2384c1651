use axum::{extract::State, http::HeaderMap, Json};
use serde::Serialize;

use crate::{
    error::{AppError, AppResult},
    services::telegram::{TelegramBotService, Update},
    AppState,
};

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Telegram webhook for the verification bot. If a webhook secret is
/// configured, the Bot API's secret-token header must match.
pub async fn telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> AppResult<Json<OkResponse>> {
    if let Some(expected) = &state.config.telegram.webhook_secret {
        let provided = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|h| h.to_str().ok());
        if provided != Some(expected.as_str()) {
            return Err(AppError::Unauthorized);
        }
    }

    let bot = TelegramBotService::new(state.db.clone(), state.config.telegram.clone());
    bot.handle_update(update).await?;

    Ok(Json(OkResponse { ok: true }))
}
