use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{BalanceTopup, TopupStatus, User},
    money,
    phone::normalize_phone,
};

pub struct UsersService {
    db: SqlitePool,
}

impl UsersService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn get(&self, user_id: Uuid) -> AppResult<User> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;

        user.ok_or(AppError::UserNotFound)
    }

    pub async fn update_profile(
        &self,
        user_id: Uuid,
        full_name: Option<&str>,
        phone: Option<&str>,
        address: Option<&str>,
    ) -> AppResult<User> {
        if full_name.is_none() && phone.is_none() && address.is_none() {
            return Err(AppError::BadRequest("No fields to update".to_string()));
        }

        let phone = phone.map(normalize_phone);

        let user: Option<User> = sqlx::query_as(
            r#"
            UPDATE users
            SET full_name = COALESCE(?, full_name),
                phone = COALESCE(?, phone),
                address = COALESCE(?, address),
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(full_name)
        .bind(phone)
        .bind(address)
        .bind(Utc::now())
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        user.ok_or(AppError::UserNotFound)
    }

    /// Full account deletion, cascading to orders, reviews, promo
    /// redemptions, top-ups, sessions, and any pending registration for the
    /// same phone.
    pub async fn delete_account(&self, user_id: Uuid) -> AppResult<()> {
        let user = self.get(user_id).await?;

        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM pending_registrations WHERE phone = ?")
            .bind(&user.phone)
            .execute(&mut *tx)
            .await?;

        // Child tables carry ON DELETE CASCADE; this one statement takes
        // orders, reviews, promo uses, top-ups and sessions with it.
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    // Balance

    pub async fn list_topups(&self, user_id: Uuid) -> AppResult<Vec<BalanceTopup>> {
        let topups: Vec<BalanceTopup> = sqlx::query_as(
            "SELECT * FROM balance_topups WHERE user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(topups)
    }

    /// Record a top-up request to be paid by direct transfer; an admin
    /// confirms it after checking the transfer arrived.
    pub async fn request_topup(&self, user_id: Uuid, amount: &str) -> AppResult<BalanceTopup> {
        let parsed = money::parse_amount(amount)?;
        if parsed <= rust_decimal::Decimal::ZERO {
            return Err(AppError::Validation("Amount must be positive".to_string()));
        }

        let now = Utc::now();
        let topup: BalanceTopup = sqlx::query_as(
            r#"
            INSERT INTO balance_topups (id, user_id, amount, status, created_at, updated_at)
            VALUES (?, ?, ?, 'pending', ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(money::format_amount(parsed))
        .bind(now)
        .bind(now)
        .fetch_one(&self.db)
        .await?;

        Ok(topup)
    }

    /// Admin decision on a pending top-up. Confirmation credits the balance
    /// in the same transaction that flips the top-up status, so a replay
    /// cannot credit twice.
    pub async fn resolve_topup(
        &self,
        topup_id: Uuid,
        approve: bool,
        admin_comment: Option<&str>,
    ) -> AppResult<BalanceTopup> {
        let mut tx = self.db.begin().await?;

        let status = if approve {
            TopupStatus::Confirmed
        } else {
            TopupStatus::Rejected
        };

        // Only a pending row can be resolved; a second call is a no-op error.
        let topup: Option<BalanceTopup> = sqlx::query_as(
            r#"
            UPDATE balance_topups
            SET status = ?, admin_comment = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(status)
        .bind(admin_comment)
        .bind(Utc::now())
        .bind(topup_id)
        .fetch_optional(&mut *tx)
        .await?;

        let topup = topup.ok_or(AppError::TopupNotFound)?;

        if approve {
            let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
                .bind(topup.user_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(AppError::UserNotFound)?;

            let balance =
                money::parse_amount(&user.balance)? + money::parse_amount(&topup.amount)?;

            sqlx::query("UPDATE users SET balance = ?, updated_at = ? WHERE id = ?")
                .bind(money::format_amount(balance))
                .bind(Utc::now())
                .bind(topup.user_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(topup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_pool;

    async fn seed_user(db: &SqlitePool) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, full_name, phone, is_admin, balance, created_at, updated_at)
            VALUES (?, 'a@b.com', 'x', 'Test', '+79991234567', 0, '100', ?, ?)
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(db)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn confirmed_topup_credits_balance_once() {
        let db = test_pool().await;
        let service = UsersService::new(db.clone());
        let user_id = seed_user(&db).await;

        let topup = service.request_topup(user_id, "250.50").await.unwrap();
        assert_eq!(topup.status, TopupStatus::Pending);

        let resolved = service.resolve_topup(topup.id, true, None).await.unwrap();
        assert_eq!(resolved.status, TopupStatus::Confirmed);

        let user = service.get(user_id).await.unwrap();
        assert_eq!(user.balance, "350.5");

        // Replaying the confirmation finds no pending row.
        assert!(matches!(
            service.resolve_topup(topup.id, true, None).await,
            Err(AppError::TopupNotFound)
        ));
    }

    #[tokio::test]
    async fn rejected_topup_leaves_balance_alone() {
        let db = test_pool().await;
        let service = UsersService::new(db.clone());
        let user_id = seed_user(&db).await;

        let topup = service.request_topup(user_id, "250").await.unwrap();
        service
            .resolve_topup(topup.id, false, Some("no transfer received"))
            .await
            .unwrap();

        let user = service.get(user_id).await.unwrap();
        assert_eq!(user.balance, "100");
    }

    #[tokio::test]
    async fn delete_account_cascades() {
        let db = test_pool().await;
        let service = UsersService::new(db.clone());
        let user_id = seed_user(&db).await;
        service.request_topup(user_id, "250").await.unwrap();

        service.delete_account(user_id).await.unwrap();

        let topups: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM balance_topups")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(topups, 0);
        assert!(matches!(
            service.get(user_id).await,
            Err(AppError::UserNotFound)
        ));
    }
}
