use sqlx::SqlitePool;

use crate::{
    config::TelegramConfig,
    models::{Order, Product, User},
    services::telegram::{get_settings, TelegramClient},
};

/// Fire-and-forget outbound messages. Every public method spawns a task and
/// returns immediately; delivery failures are logged and never reach the
/// request that triggered them.
pub struct NotificationService {
    db: SqlitePool,
    config: TelegramConfig,
}

impl NotificationService {
    pub fn new(db: SqlitePool, config: TelegramConfig) -> Self {
        Self { db, config }
    }

    pub fn notify_new_order(&self, order: Order) {
        self.to_admin_chat(format!(
            "New order {} for {} ({} items), payment: {:?}",
            order.id,
            order.total_amount,
            order.items.0.len(),
            order.payment_method,
        ));
    }

    pub fn notify_payment_proof(&self, order: Order) {
        self.to_admin_chat(format!(
            "Payment proof uploaded for order {} ({}); review and confirm.",
            order.id, order.total_amount,
        ));
    }

    pub fn notify_order_status(&self, order: Order) {
        let db = self.db.clone();
        let client = TelegramClient::new(self.config.clone());

        tokio::spawn(async move {
            match get_settings(&db).await {
                Ok(s) if s.notifications_enabled => {}
                Ok(_) => return,
                Err(e) => {
                    tracing::warn!("Notification skipped, settings unavailable: {}", e);
                    return;
                }
            }

            let user: Option<User> = match sqlx::query_as("SELECT * FROM users WHERE id = ?")
                .bind(order.user_id)
                .fetch_optional(&db)
                .await
            {
                Ok(user) => user,
                Err(e) => {
                    tracing::warn!("Notification skipped for order {}: {}", order.id, e);
                    return;
                }
            };

            let Some(chat_id) = user.and_then(|u| u.telegram_chat_id) else {
                return;
            };

            let text = format!(
                "Your order {} is now: {:?} / payment {:?}",
                order.id, order.order_status, order.payment_status,
            );
            if let Err(e) = client.send_message(chat_id, &text).await {
                tracing::warn!("Order status notification failed: {}", e);
            }
        });
    }

    /// Broadcast a new catalog item to every user with a linked chat.
    pub fn broadcast_new_product(&self, product: Product) {
        let db = self.db.clone();
        let client = TelegramClient::new(self.config.clone());

        tokio::spawn(async move {
            match get_settings(&db).await {
                Ok(s) if s.notifications_enabled && s.broadcast_enabled => {}
                Ok(_) => return,
                Err(e) => {
                    tracing::warn!("Broadcast skipped, settings unavailable: {}", e);
                    return;
                }
            }

            let chat_ids: Vec<(i64,)> = match sqlx::query_as(
                "SELECT telegram_chat_id FROM users WHERE telegram_chat_id IS NOT NULL",
            )
            .fetch_all(&db)
            .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!("Broadcast skipped: {}", e);
                    return;
                }
            };

            let text = format!("New in the shop: {} for {}", product.name, product.price);
            for (chat_id,) in chat_ids {
                if let Err(e) = client.send_message(chat_id, &text).await {
                    tracing::warn!("Broadcast to chat {} failed: {}", chat_id, e);
                }
            }
        });
    }

    fn to_admin_chat(&self, text: String) {
        let db = self.db.clone();
        let client = TelegramClient::new(self.config.clone());

        tokio::spawn(async move {
            let settings = match get_settings(&db).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Notification skipped, settings unavailable: {}", e);
                    return;
                }
            };

            if !settings.notifications_enabled {
                return;
            }
            let Some(chat_id) = settings.admin_chat_id else {
                tracing::debug!("No admin chat configured, dropping notification");
                return;
            };

            if let Err(e) = client.send_message(chat_id, &text).await {
                tracing::warn!("Admin notification failed: {}", e);
            }
        });
    }
}
