use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{DiscountType, PromoCode},
    money,
};

pub struct PromoService {
    db: SqlitePool,
}

impl PromoService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Check a code against the active window, minimum order amount, usage
    /// cap, and the per-user redemption ledger; returns the code together
    /// with the discount it would grant for the given item subtotal.
    pub async fn validate(
        &self,
        code: &str,
        user_id: Uuid,
        subtotal: Decimal,
    ) -> AppResult<(PromoCode, Decimal)> {
        let promo: Option<PromoCode> = sqlx::query_as("SELECT * FROM promo_codes WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.db)
            .await?;

        let promo = promo.ok_or(AppError::PromoCodeNotFound)?;

        if !promo.is_active {
            return Err(AppError::PromoCodeInactive);
        }

        let now = Utc::now();
        if promo.starts_at.is_some_and(|s| now < s) || promo.ends_at.is_some_and(|e| now > e) {
            return Err(AppError::PromoCodeInactive);
        }

        if promo
            .max_uses
            .is_some_and(|max| promo.current_uses >= max)
        {
            return Err(AppError::PromoCodeExhausted);
        }

        if let Some(min) = &promo.min_order_amount {
            if subtotal < money::parse_amount(min)? {
                return Err(AppError::PromoCodeMinAmount);
            }
        }

        let used: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM promo_code_uses WHERE promo_code_id = ? AND user_id = ?",
        )
        .bind(promo.id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        if used.is_some() {
            return Err(AppError::PromoCodeAlreadyUsed);
        }

        let discount = compute_discount(&promo, subtotal)?;
        Ok((promo, discount))
    }

    /// Record a redemption inside the caller's order transaction. The
    /// unique (code, user) index is the backstop against a concurrent
    /// double redemption slipping past `validate`.
    pub async fn redeem(
        &self,
        conn: &mut SqliteConnection,
        promo: &PromoCode,
        user_id: Uuid,
        order_id: Uuid,
        discount: Decimal,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO promo_code_uses (id, promo_code_id, user_id, order_id, discount_amount, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(promo.id)
        .bind(user_id)
        .bind(order_id)
        .bind(money::format_amount(discount))
        .bind(Utc::now())
        .execute(&mut *conn)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::PromoCodeAlreadyUsed
            }
            _ => AppError::Database(e),
        })?;

        sqlx::query("UPDATE promo_codes SET current_uses = current_uses + 1 WHERE id = ?")
            .bind(promo.id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Undo a redemption when an admin deletes the order.
    pub async fn reverse(&self, conn: &mut SqliteConnection, order_id: Uuid) -> AppResult<()> {
        let uses: Vec<(Uuid,)> =
            sqlx::query_as("SELECT promo_code_id FROM promo_code_uses WHERE order_id = ?")
                .bind(order_id)
                .fetch_all(&mut *conn)
                .await?;

        for (promo_code_id,) in uses {
            sqlx::query(
                "UPDATE promo_codes SET current_uses = MAX(current_uses - 1, 0) WHERE id = ?",
            )
            .bind(promo_code_id)
            .execute(&mut *conn)
            .await?;
        }

        sqlx::query("DELETE FROM promo_code_uses WHERE order_id = ?")
            .bind(order_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    // Admin CRUD

    pub async fn list(&self) -> AppResult<Vec<PromoCode>> {
        let codes: Vec<PromoCode> =
            sqlx::query_as("SELECT * FROM promo_codes ORDER BY created_at DESC")
                .fetch_all(&self.db)
                .await?;
        Ok(codes)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        code: &str,
        discount_type: DiscountType,
        discount_value: &str,
        min_order_amount: Option<&str>,
        max_uses: Option<i64>,
        starts_at: Option<chrono::DateTime<Utc>>,
        ends_at: Option<chrono::DateTime<Utc>>,
    ) -> AppResult<PromoCode> {
        // Reject garbage amounts up front.
        money::parse_amount(discount_value)?;
        if let Some(min) = min_order_amount {
            money::parse_amount(min)?;
        }

        let promo: PromoCode = sqlx::query_as(
            r#"
            INSERT INTO promo_codes (id, code, discount_type, discount_value, min_order_amount, max_uses, current_uses, starts_at, ends_at, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, 1, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .bind(discount_type)
        .bind(discount_value)
        .bind(min_order_amount)
        .bind(max_uses)
        .bind(starts_at)
        .bind(ends_at)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::BadRequest(format!("Promo code {} already exists", code))
            }
            _ => AppError::Database(e),
        })?;

        Ok(promo)
    }

    pub async fn set_active(&self, id: Uuid, is_active: bool) -> AppResult<PromoCode> {
        let promo: Option<PromoCode> =
            sqlx::query_as("UPDATE promo_codes SET is_active = ? WHERE id = ? RETURNING *")
                .bind(is_active)
                .bind(id)
                .fetch_optional(&self.db)
                .await?;

        promo.ok_or(AppError::PromoCodeNotFound)
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM promo_codes WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::PromoCodeNotFound);
        }
        Ok(())
    }
}

/// Discount against the item subtotal only (delivery excluded), capped at
/// the subtotal so an order can never go negative.
pub fn compute_discount(promo: &PromoCode, subtotal: Decimal) -> AppResult<Decimal> {
    let value = money::parse_amount(&promo.discount_value)?;

    let discount = match promo.discount_type {
        DiscountType::Percentage => (subtotal * value / Decimal::from(100)).round_dp(2),
        DiscountType::Fixed => value,
    };

    Ok(discount.min(subtotal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_pool;

    fn promo(discount_type: DiscountType, value: &str) -> PromoCode {
        PromoCode {
            id: Uuid::new_v4(),
            code: "SPRING".into(),
            discount_type,
            discount_value: value.into(),
            min_order_amount: None,
            max_uses: None,
            current_uses: 0,
            starts_at: None,
            ends_at: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn percentage_discount_is_computed_on_subtotal() {
        let promo = promo(DiscountType::Percentage, "10");
        let discount = compute_discount(&promo, Decimal::from(2500)).unwrap();
        assert_eq!(discount, Decimal::from(250));
    }

    #[test]
    fn fixed_discount_never_exceeds_subtotal() {
        let promo = promo(DiscountType::Fixed, "1000");
        let discount = compute_discount(&promo, Decimal::from(300)).unwrap();
        assert_eq!(discount, Decimal::from(300));
    }

    async fn seed_user(db: &SqlitePool) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, full_name, phone, is_admin, balance, created_at, updated_at)
            VALUES (?, ?, 'x', 'Test', '+79991234567', 0, '0', ?, ?)
            "#,
        )
        .bind(id)
        .bind(format!("{}@test.com", id))
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(db)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn second_redemption_by_same_user_is_rejected() {
        let db = test_pool().await;
        let service = PromoService::new(db.clone());
        let user_id = seed_user(&db).await;

        let promo = service
            .create("SPRING", DiscountType::Fixed, "100", None, None, None, None)
            .await
            .unwrap();

        let subtotal = Decimal::from(500);
        let (promo, discount) = service.validate("SPRING", user_id, subtotal).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        // The ledger references an order row; a placeholder is enough here.
        let order_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, items, subtotal_amount, delivery_amount, total_amount,
                                payment_method, payment_status, order_status, product_quantities_reduced,
                                full_name, phone, address, created_at, updated_at)
            VALUES (?, ?, '[]', '500', '0', '500', 'balance', 'pending', 'pending', 0, 'T', '+79991234567', 'A', ?, ?)
            "#,
        )
        .bind(order_id)
        .bind(user_id)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .unwrap();
        service
            .redeem(&mut tx, &promo, user_id, order_id, discount)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let entry: crate::models::PromoCodeUse =
            sqlx::query_as("SELECT * FROM promo_code_uses WHERE order_id = ?")
                .bind(order_id)
                .fetch_one(&db)
                .await
                .unwrap();
        assert_eq!(entry.user_id, user_id);
        assert_eq!(entry.discount_amount, "100");

        assert!(matches!(
            service.validate("SPRING", user_id, subtotal).await,
            Err(AppError::PromoCodeAlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn usage_cap_and_minimum_are_enforced() {
        let db = test_pool().await;
        let service = PromoService::new(db.clone());
        let user_id = seed_user(&db).await;

        service
            .create("CAPPED", DiscountType::Fixed, "50", Some("1000"), Some(1), None, None)
            .await
            .unwrap();

        assert!(matches!(
            service.validate("CAPPED", user_id, Decimal::from(500)).await,
            Err(AppError::PromoCodeMinAmount)
        ));

        sqlx::query("UPDATE promo_codes SET current_uses = 1 WHERE code = 'CAPPED'")
            .execute(&db)
            .await
            .unwrap();

        assert!(matches!(
            service.validate("CAPPED", user_id, Decimal::from(2000)).await,
            Err(AppError::PromoCodeExhausted)
        ));
    }

    #[tokio::test]
    async fn expired_window_is_rejected() {
        let db = test_pool().await;
        let service = PromoService::new(db.clone());
        let user_id = seed_user(&db).await;

        service
            .create(
                "OLD",
                DiscountType::Percentage,
                "15",
                None,
                None,
                None,
                Some(Utc::now() - chrono::Duration::days(1)),
            )
            .await
            .unwrap();

        assert!(matches!(
            service.validate("OLD", user_id, Decimal::from(500)).await,
            Err(AppError::PromoCodeInactive)
        ));
    }
}
