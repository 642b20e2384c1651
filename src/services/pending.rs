use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{PendingRegistration, PendingUserData},
    phone::normalize_phone,
};

/// How long an unconfirmed registration stays claimable.
const PENDING_TTL_HOURS: i64 = 24;

pub struct PendingRegistrationService {
    db: SqlitePool,
}

impl PendingRegistrationService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Store a new pending registration. Any prior attempt for the same
    /// phone is discarded (last-write-wins).
    pub async fn save(
        &self,
        phone: &str,
        user_data: &PendingUserData,
        token: &str,
    ) -> AppResult<()> {
        let phone = normalize_phone(phone);

        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM pending_registrations WHERE phone = ?")
            .bind(&phone)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO pending_registrations (id, phone, user_data, verification_token, verified, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&phone)
        .bind(sqlx::types::Json(user_data))
        .bind(token)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Whether the (phone, token) pair has been confirmed by the bot.
    /// Expired rows count as absent.
    pub async fn check_verified(&self, phone: &str, token: &str) -> AppResult<bool> {
        let row = self.find(phone, token).await?;
        Ok(row.map(|r| r.verified).unwrap_or(false))
    }

    /// Flip the verified flag. Requires an exact match on the normalized
    /// phone and the token. There is deliberately no token-only fallback,
    /// so a registration can never be verified under a different phone than
    /// it was submitted with.
    pub async fn mark_verified(&self, phone: &str, token: &str) -> AppResult<bool> {
        let phone = normalize_phone(phone);
        let result = sqlx::query(
            "UPDATE pending_registrations SET verified = 1 WHERE phone = ? AND verification_token = ? AND created_at > ?",
        )
        .bind(&phone)
        .bind(token)
        .bind(Self::cutoff())
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// The stored signup payload, only once verification has happened.
    pub async fn get_data(&self, phone: &str, token: &str) -> AppResult<Option<PendingUserData>> {
        let row = self.find(phone, token).await?;
        Ok(row.filter(|r| r.verified).map(|r| r.user_data.0))
    }

    /// Delete the pending row. Idempotent.
    pub async fn remove(&self, phone: &str, token: &str) -> AppResult<()> {
        let phone = normalize_phone(phone);
        sqlx::query(
            "DELETE FROM pending_registrations WHERE phone = ? AND verification_token = ?",
        )
        .bind(&phone)
        .bind(token)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    pub async fn find_by_token(&self, token: &str) -> AppResult<Option<PendingRegistration>> {
        let row: Option<PendingRegistration> = sqlx::query_as(
            "SELECT * FROM pending_registrations WHERE verification_token = ? AND created_at > ?",
        )
        .bind(token)
        .bind(Self::cutoff())
        .fetch_optional(&self.db)
        .await?;

        Ok(row)
    }

    /// Record which Telegram chat is verifying this registration, so the
    /// later contact-share event can be matched back to it.
    pub async fn bind_chat(
        &self,
        token: &str,
        chat_id: i64,
    ) -> AppResult<Option<PendingRegistration>> {
        sqlx::query(
            "UPDATE pending_registrations SET telegram_chat_id = ? WHERE verification_token = ?",
        )
        .bind(chat_id)
        .bind(token)
        .execute(&self.db)
        .await?;

        self.find_by_token(token).await
    }

    pub async fn find_by_chat(&self, chat_id: i64) -> AppResult<Option<PendingRegistration>> {
        let row: Option<PendingRegistration> = sqlx::query_as(
            r#"
            SELECT * FROM pending_registrations
            WHERE telegram_chat_id = ? AND created_at > ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(chat_id)
        .bind(Self::cutoff())
        .fetch_optional(&self.db)
        .await?;

        Ok(row)
    }

    /// Drop registrations that were never completed. Runs at startup and on
    /// the periodic sweep task; the per-read cutoff above covers the window
    /// in between.
    pub async fn cleanup_expired(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM pending_registrations WHERE created_at <= ?")
            .bind(Self::cutoff())
            .execute(&self.db)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            tracing::info!("Removed {} expired pending registrations", removed);
        }
        Ok(removed)
    }

    async fn find(&self, phone: &str, token: &str) -> AppResult<Option<PendingRegistration>> {
        let phone = normalize_phone(phone);
        let row: Option<PendingRegistration> = sqlx::query_as(
            r#"
            SELECT * FROM pending_registrations
            WHERE phone = ? AND verification_token = ? AND created_at > ?
            "#,
        )
        .bind(&phone)
        .bind(token)
        .bind(Self::cutoff())
        .fetch_optional(&self.db)
        .await?;

        Ok(row)
    }

    fn cutoff() -> chrono::DateTime<Utc> {
        Utc::now() - Duration::hours(PENDING_TTL_HOURS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_pool;

    fn sample_data() -> PendingUserData {
        PendingUserData {
            email: "a@b.com".into(),
            password_hash: "$2b$12$hash".into(),
            full_name: "Test User".into(),
            address: None,
        }
    }

    #[tokio::test]
    async fn saved_registration_starts_unverified() {
        let service = PendingRegistrationService::new(test_pool().await);
        service.save("89991234567", &sample_data(), "tok1").await.unwrap();

        assert!(!service.check_verified("89991234567", "tok1").await.unwrap());
        assert!(service.get_data("89991234567", "tok1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_verified_exposes_data_unchanged() {
        let service = PendingRegistrationService::new(test_pool().await);
        service.save("89991234567", &sample_data(), "tok1").await.unwrap();

        // The bot sees a differently written but canonically equal phone.
        assert!(service.mark_verified("+7 999 123-45-67", "tok1").await.unwrap());
        assert!(service.check_verified("9991234567", "tok1").await.unwrap());

        let data = service.get_data("89991234567", "tok1").await.unwrap().unwrap();
        assert_eq!(data.email, "a@b.com");
        assert_eq!(data.full_name, "Test User");
    }

    #[tokio::test]
    async fn mark_verified_requires_exact_pair() {
        let service = PendingRegistrationService::new(test_pool().await);
        service.save("89991234567", &sample_data(), "tok1").await.unwrap();

        assert!(!service.mark_verified("89991234567", "other").await.unwrap());
        assert!(!service.mark_verified("89990000000", "tok1").await.unwrap());
        assert!(!service.check_verified("89991234567", "tok1").await.unwrap());
    }

    #[tokio::test]
    async fn second_save_replaces_first() {
        let service = PendingRegistrationService::new(test_pool().await);
        service.save("89991234567", &sample_data(), "tok1").await.unwrap();
        service.save("+79991234567", &sample_data(), "tok2").await.unwrap();

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pending_registrations WHERE phone = ?")
                .bind("+79991234567")
                .fetch_one(&service.db)
                .await
                .unwrap();
        assert_eq!(count, 1);

        // The first attempt's token is gone with its row.
        assert!(!service.mark_verified("89991234567", "tok1").await.unwrap());
        assert!(service.mark_verified("89991234567", "tok2").await.unwrap());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let service = PendingRegistrationService::new(test_pool().await);
        service.save("89991234567", &sample_data(), "tok1").await.unwrap();

        service.remove("89991234567", "tok1").await.unwrap();
        service.remove("89991234567", "tok1").await.unwrap();
        assert!(!service.check_verified("89991234567", "tok1").await.unwrap());
    }

    #[tokio::test]
    async fn bind_chat_links_registration_to_chat() {
        let service = PendingRegistrationService::new(test_pool().await);
        service.save("89991234567", &sample_data(), "tok1").await.unwrap();

        let row = service.bind_chat("tok1", 42).await.unwrap().unwrap();
        assert_eq!(row.telegram_chat_id, Some(42));

        let by_chat = service.find_by_chat(42).await.unwrap().unwrap();
        assert_eq!(by_chat.verification_token, "tok1");
    }

    #[tokio::test]
    async fn cleanup_removes_stale_rows() {
        let service = PendingRegistrationService::new(test_pool().await);
        service.save("89991234567", &sample_data(), "tok1").await.unwrap();

        // Age the row past the TTL.
        sqlx::query("UPDATE pending_registrations SET created_at = ?")
            .bind(Utc::now() - Duration::hours(25))
            .execute(&service.db)
            .await
            .unwrap();

        // Lazy expiry hides it before the sweep runs.
        assert!(!service.check_verified("89991234567", "tok1").await.unwrap());

        let removed = service.cleanup_expired().await.unwrap();
        assert_eq!(removed, 1);
    }
}
