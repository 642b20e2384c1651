use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    config::TelegramConfig,
    error::{AppError, AppResult},
    models::TelegramSettings,
    phone::normalize_phone,
    services::pending::PendingRegistrationService,
};

// Bot API update types, only the fields the verification flow reads.

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
    pub contact: Option<Contact>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct Contact {
    pub phone_number: String,
}

/// Thin Bot API client. With no token configured every send becomes a
/// logged no-op, so development environments work without a bot.
pub struct TelegramClient {
    http: reqwest::Client,
    config: TelegramConfig,
}

impl TelegramClient {
    pub fn new(config: TelegramConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self { http, config }
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> AppResult<()> {
        self.call(
            "sendMessage",
            json!({
                "chat_id": chat_id,
                "text": text,
            }),
        )
        .await
    }

    /// Ask the user to share their phone contact via the platform keyboard.
    pub async fn request_contact(&self, chat_id: i64, text: &str) -> AppResult<()> {
        self.call(
            "sendMessage",
            json!({
                "chat_id": chat_id,
                "text": text,
                "reply_markup": {
                    "keyboard": [[{ "text": "Share phone number", "request_contact": true }]],
                    "one_time_keyboard": true,
                    "resize_keyboard": true,
                },
            }),
        )
        .await
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> AppResult<()> {
        if self.config.bot_token.is_empty() {
            tracing::debug!("Telegram disabled, dropping {} call", method);
            return Ok(());
        }

        let url = format!(
            "https://api.telegram.org/bot{}/{}",
            self.config.bot_token, method
        );
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Telegram API error: {}", e))?;

        if !response.status().is_success() {
            return Err(AppError::Internal(anyhow::anyhow!(
                "Telegram {} returned {}",
                method,
                response.status()
            )));
        }

        Ok(())
    }
}

/// The verification side of the bot: reacts to the deep-link /start and the
/// subsequent contact share. It only ever flips the pending registration's
/// verified flag; creating the user stays with the registration finisher.
pub struct TelegramBotService {
    db: SqlitePool,
    client: TelegramClient,
}

impl TelegramBotService {
    pub fn new(db: SqlitePool, config: TelegramConfig) -> Self {
        Self {
            db,
            client: TelegramClient::new(config),
        }
    }

    pub async fn handle_update(&self, update: Update) -> AppResult<()> {
        tracing::debug!("Processing bot update {}", update.update_id);

        let Some(message) = update.message else {
            return Ok(());
        };
        let chat_id = message.chat.id;

        if let Some(text) = message.text.as_deref() {
            if let Some(arg) = text.strip_prefix("/start") {
                return self.handle_start(chat_id, arg.trim()).await;
            }
        }

        if let Some(contact) = &message.contact {
            return self.handle_phone(chat_id, &contact.phone_number).await;
        }

        // Free-text fallback: some users type the number instead of
        // sharing the contact.
        if let Some(text) = message.text.as_deref() {
            return self.handle_phone(chat_id, text).await;
        }

        Ok(())
    }

    async fn handle_start(&self, chat_id: i64, token: &str) -> AppResult<()> {
        if token.is_empty() {
            self.reply(
                chat_id,
                "Hi! Open the verification link from the shop to confirm your phone number.",
            )
            .await;
            return Ok(());
        }

        let pending = PendingRegistrationService::new(self.db.clone());
        match pending.bind_chat(token, chat_id).await? {
            Some(_) => {
                if let Err(e) = self
                    .client
                    .request_contact(
                        chat_id,
                        "To finish registration, share the phone number you signed up with.",
                    )
                    .await
                {
                    tracing::warn!("Failed to send contact request: {}", e);
                }
            }
            None => {
                self.reply(
                    chat_id,
                    "This verification link is invalid or expired. Please register again.",
                )
                .await;
            }
        }

        Ok(())
    }

    async fn handle_phone(&self, chat_id: i64, raw_phone: &str) -> AppResult<()> {
        let pending = PendingRegistrationService::new(self.db.clone());

        let Some(row) = pending.find_by_chat(chat_id).await? else {
            self.reply(
                chat_id,
                "Open the verification link from the shop first, then share your phone number.",
            )
            .await;
            return Ok(());
        };

        // Same normalizer as the registration submit, so any spelling of
        // the same number matches.
        if normalize_phone(raw_phone) != row.phone {
            self.reply(
                chat_id,
                "This phone number does not match the one used for registration.",
            )
            .await;
            return Ok(());
        }

        let marked = pending
            .mark_verified(&row.phone, &row.verification_token)
            .await?;
        if marked {
            self.reply(
                chat_id,
                "Phone number confirmed! Return to the shop to finish signing in.",
            )
            .await;
        } else {
            self.reply(
                chat_id,
                "This verification link is invalid or expired. Please register again.",
            )
            .await;
        }

        Ok(())
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.client.send_message(chat_id, text).await {
            tracing::warn!("Failed to send Telegram reply: {}", e);
        }
    }
}

/// The singleton settings row; the migration seeds it.
pub async fn get_settings(db: &SqlitePool) -> AppResult<TelegramSettings> {
    let settings: TelegramSettings = sqlx::query_as("SELECT * FROM telegram_settings WHERE id = 1")
        .fetch_one(db)
        .await?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PendingUserData;
    use crate::test_util::{test_config, test_pool};

    fn update(chat_id: i64, text: Option<&str>, contact_phone: Option<&str>) -> Update {
        Update {
            update_id: 1,
            message: Some(Message {
                chat: Chat { id: chat_id },
                text: text.map(|t| t.to_string()),
                contact: contact_phone.map(|p| Contact {
                    phone_number: p.to_string(),
                }),
            }),
        }
    }

    async fn seed_pending(db: &SqlitePool, phone: &str, token: &str) {
        let data = PendingUserData {
            email: "a@b.com".into(),
            password_hash: "$2b$12$hash".into(),
            full_name: "Test".into(),
            address: None,
        };
        PendingRegistrationService::new(db.clone())
            .save(phone, &data, token)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn matching_contact_marks_verified() {
        let db = test_pool().await;
        let bot = TelegramBotService::new(db.clone(), test_config().telegram);
        seed_pending(&db, "89991234567", "tok1").await;

        bot.handle_update(update(42, Some("/start tok1"), None))
            .await
            .unwrap();
        bot.handle_update(update(42, None, Some("+7 999 123-45-67")))
            .await
            .unwrap();

        let pending = PendingRegistrationService::new(db);
        assert!(pending.check_verified("89991234567", "tok1").await.unwrap());
    }

    #[tokio::test]
    async fn mismatched_contact_does_not_verify() {
        let db = test_pool().await;
        let bot = TelegramBotService::new(db.clone(), test_config().telegram);
        seed_pending(&db, "89991234567", "tok1").await;

        bot.handle_update(update(42, Some("/start tok1"), None))
            .await
            .unwrap();
        bot.handle_update(update(42, None, Some("+79990000000")))
            .await
            .unwrap();

        let pending = PendingRegistrationService::new(db);
        assert!(!pending.check_verified("89991234567", "tok1").await.unwrap());
    }

    #[tokio::test]
    async fn free_text_phone_is_accepted() {
        let db = test_pool().await;
        let bot = TelegramBotService::new(db.clone(), test_config().telegram);
        seed_pending(&db, "89991234567", "tok1").await;

        bot.handle_update(update(42, Some("/start tok1"), None))
            .await
            .unwrap();
        bot.handle_update(update(42, Some("8 999 123 45 67"), None))
            .await
            .unwrap();

        let pending = PendingRegistrationService::new(db);
        assert!(pending.check_verified("89991234567", "tok1").await.unwrap());
    }

    #[tokio::test]
    async fn contact_without_start_is_ignored() {
        let db = test_pool().await;
        let bot = TelegramBotService::new(db.clone(), test_config().telegram);
        seed_pending(&db, "89991234567", "tok1").await;

        bot.handle_update(update(42, None, Some("+79991234567")))
            .await
            .unwrap();

        let pending = PendingRegistrationService::new(db);
        assert!(!pending.check_verified("89991234567", "tok1").await.unwrap());
    }
}
