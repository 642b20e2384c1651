use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::Review,
};

pub struct ReviewsService {
    db: SqlitePool,
}

impl ReviewsService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Product reviews; unapproved ones are only visible to admins.
    pub async fn list_for_product(
        &self,
        product_id: Uuid,
        include_unapproved: bool,
    ) -> AppResult<Vec<Review>> {
        let reviews: Vec<Review> = if include_unapproved {
            sqlx::query_as(
                "SELECT * FROM reviews WHERE product_id = ? ORDER BY created_at DESC",
            )
            .bind(product_id)
            .fetch_all(&self.db)
            .await?
        } else {
            sqlx::query_as(
                "SELECT * FROM reviews WHERE product_id = ? AND is_approved = 1 ORDER BY created_at DESC",
            )
            .bind(product_id)
            .fetch_all(&self.db)
            .await?
        };

        Ok(reviews)
    }

    pub async fn create(
        &self,
        product_id: Uuid,
        user_id: Uuid,
        rating: i64,
        comment: &str,
    ) -> AppResult<Review> {
        if !(1..=5).contains(&rating) {
            return Err(AppError::Validation(
                "Rating must be between 1 and 5".to_string(),
            ));
        }

        let review: Review = sqlx::query_as(
            r#"
            INSERT INTO reviews (id, product_id, user_id, rating, comment, is_approved, created_at)
            VALUES (?, ?, ?, ?, ?, 0, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(product_id)
        .bind(user_id)
        .bind(rating)
        .bind(comment.trim())
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await?;

        Ok(review)
    }

    pub async fn approve(&self, review_id: Uuid) -> AppResult<Review> {
        let review: Option<Review> =
            sqlx::query_as("UPDATE reviews SET is_approved = 1 WHERE id = ? RETURNING *")
                .bind(review_id)
                .fetch_optional(&self.db)
                .await?;

        review.ok_or(AppError::ReviewNotFound)
    }

    pub async fn delete(&self, review_id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM reviews WHERE id = ?")
            .bind(review_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::ReviewNotFound);
        }
        Ok(())
    }
}
