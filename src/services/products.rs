use chrono::Utc;
use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{OrderItem, Product},
    money,
};

#[derive(Debug, Deserialize)]
pub struct ProductInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: String,
    pub original_price: Option<String>,
    pub quantity: i64,
    pub category: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[serde(default)]
    pub is_preorder: bool,
    #[serde(default)]
    pub is_rare: bool,
    #[serde(default)]
    pub is_easy_care: bool,
    #[serde(default)]
    pub is_pet_safe: bool,
    #[serde(default)]
    pub is_discount: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductFilter {
    pub category: Option<String>,
    pub search: Option<String>,
    #[serde(default)]
    pub include_unavailable: bool,
}

pub struct ProductsService {
    db: SqlitePool,
}

impl ProductsService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn list(&self, filter: &ProductFilter) -> AppResult<Vec<Product>> {
        let mut products: Vec<Product> =
            sqlx::query_as("SELECT * FROM products ORDER BY created_at DESC")
                .fetch_all(&self.db)
                .await?;

        if !filter.include_unavailable {
            products.retain(|p| p.is_available);
        }
        if let Some(category) = &filter.category {
            products.retain(|p| p.category.as_deref() == Some(category.as_str()));
        }
        if let Some(search) = &filter.search {
            let needle = search.to_lowercase();
            products.retain(|p| {
                p.name.to_lowercase().contains(&needle)
                    || p.description.to_lowercase().contains(&needle)
            });
        }

        Ok(products)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Product> {
        let product: Option<Product> = sqlx::query_as("SELECT * FROM products WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        product.ok_or(AppError::ProductNotFound)
    }

    pub async fn create(&self, input: &ProductInput) -> AppResult<Product> {
        money::parse_amount(&input.price)?;
        if let Some(original) = &input.original_price {
            money::parse_amount(original)?;
        }

        let now = Utc::now();
        let product: Product = sqlx::query_as(
            r#"
            INSERT INTO products (id, name, description, price, original_price, quantity, category,
                                  images, labels, is_available, is_preorder, is_rare, is_easy_care,
                                  is_pet_safe, is_discount, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.price)
        .bind(&input.original_price)
        .bind(input.quantity)
        .bind(&input.category)
        .bind(sqlx::types::Json(&input.images))
        .bind(sqlx::types::Json(&input.labels))
        .bind(input.is_available)
        .bind(input.is_preorder)
        .bind(input.is_rare)
        .bind(input.is_easy_care)
        .bind(input.is_pet_safe)
        .bind(input.is_discount)
        .bind(now)
        .bind(now)
        .fetch_one(&self.db)
        .await?;

        Ok(product)
    }

    pub async fn update(&self, id: Uuid, input: &ProductInput) -> AppResult<Product> {
        money::parse_amount(&input.price)?;

        let product: Option<Product> = sqlx::query_as(
            r#"
            UPDATE products
            SET name = ?, description = ?, price = ?, original_price = ?, quantity = ?,
                category = ?, images = ?, labels = ?, is_available = ?, is_preorder = ?,
                is_rare = ?, is_easy_care = ?, is_pet_safe = ?, is_discount = ?, updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.price)
        .bind(&input.original_price)
        .bind(input.quantity)
        .bind(&input.category)
        .bind(sqlx::types::Json(&input.images))
        .bind(sqlx::types::Json(&input.labels))
        .bind(input.is_available)
        .bind(input.is_preorder)
        .bind(input.is_rare)
        .bind(input.is_easy_care)
        .bind(input.is_pet_safe)
        .bind(input.is_discount)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        product.ok_or(AppError::ProductNotFound)
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::ProductNotFound);
        }
        Ok(())
    }
}

/// Decrement stock for every item of an order, inside the caller's
/// transaction. The conditional `quantity >= ?` makes overselling a hard
/// failure that rolls the whole transaction back.
pub async fn decrement_stock(conn: &mut SqliteConnection, items: &[OrderItem]) -> AppResult<()> {
    for item in items {
        let result = sqlx::query(
            "UPDATE products SET quantity = quantity - ? WHERE id = ? AND quantity >= ?",
        )
        .bind(item.quantity)
        .bind(item.id)
        .bind(item.quantity)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::OutOfStock(item.name.clone()));
        }
    }
    Ok(())
}

/// Put stock back when an admin deletes an order whose decrement already
/// fired.
pub async fn restore_stock(conn: &mut SqliteConnection, items: &[OrderItem]) -> AppResult<()> {
    for item in items {
        sqlx::query("UPDATE products SET quantity = quantity + ? WHERE id = ?")
            .bind(item.quantity)
            .bind(item.id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}
