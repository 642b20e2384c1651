use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::{Order, OrderItem, OrderState, OrderStatus, PaymentMethod, User},
    money,
    phone::normalize_phone,
    services::{
        ozonpay::{OzonPayClient, WebhookPayload},
        products,
        promo::PromoService,
    },
};

#[derive(Debug, Deserialize)]
pub struct CreateOrderInput {
    pub items: Vec<CreateOrderItemInput>,
    pub payment_method: PaymentMethod,
    pub full_name: String,
    pub phone: String,
    pub address: String,
    pub promo_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderItemInput {
    pub product_id: Uuid,
    pub quantity: i64,
}

/// What a webhook delivery did to the order, so the handler knows which
/// notification to fire.
#[derive(Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    Paid,
    Failed,
    Ignored,
}

pub struct OrdersService {
    db: SqlitePool,
    config: Config,
}

impl OrdersService {
    pub fn new(db: SqlitePool, config: Config) -> Self {
        Self { db, config }
    }

    // Checkout

    pub async fn create_order(&self, user_id: Uuid, input: &CreateOrderInput) -> AppResult<Order> {
        if input.items.is_empty() {
            return Err(AppError::Validation("Order has no items".to_string()));
        }
        if input.full_name.trim().is_empty() || input.address.trim().is_empty() {
            return Err(AppError::Validation(
                "Name and address are required".to_string(),
            ));
        }

        // Snapshot items and price them from the catalog, not the client.
        let mut items = Vec::with_capacity(input.items.len());
        let mut subtotal = Decimal::ZERO;
        for line in &input.items {
            if line.quantity <= 0 {
                return Err(AppError::Validation("Quantity must be positive".to_string()));
            }
            let product = products::ProductsService::new(self.db.clone())
                .get(line.product_id)
                .await?;
            if !product.is_available || product.quantity < line.quantity {
                return Err(AppError::OutOfStock(product.name));
            }
            subtotal += money::parse_amount(&product.price)? * Decimal::from(line.quantity);
            items.push(OrderItem {
                id: product.id,
                name: product.name,
                price: product.price,
                quantity: line.quantity,
            });
        }

        let promo_service = PromoService::new(self.db.clone());
        let promo = match &input.promo_code {
            Some(code) => Some(promo_service.validate(code, user_id, subtotal).await?),
            None => None,
        };
        let discount = promo.as_ref().map(|(_, d)| *d).unwrap_or(Decimal::ZERO);

        let discounted = subtotal - discount;
        let delivery = self.delivery_fee(discounted)?;
        let total = discounted + delivery;

        let state = match input.payment_method {
            PaymentMethod::Balance => OrderState::Paid {
                method: PaymentMethod::Balance,
            },
            PaymentMethod::DirectTransfer => OrderState::PendingVerification { proof_url: None },
            PaymentMethod::Ozonpay => OrderState::AwaitingPayment,
        };
        let (payment_status, order_status) = state.columns();

        let mut tx = self.db.begin().await?;

        if input.payment_method == PaymentMethod::Balance {
            // Re-read inside the transaction and reject before debiting.
            let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(AppError::UserNotFound)?;

            let balance = money::parse_amount(&user.balance)?;
            if balance < total {
                return Err(AppError::InsufficientBalance);
            }

            sqlx::query("UPDATE users SET balance = ?, updated_at = ? WHERE id = ?")
                .bind(money::format_amount(balance - total))
                .bind(Utc::now())
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let order: Order = sqlx::query_as(
            r#"
            INSERT INTO orders (id, user_id, items, subtotal_amount, delivery_amount, total_amount,
                                payment_method, payment_status, order_status, product_quantities_reduced,
                                promo_code, promo_code_discount, full_name, phone, address,
                                created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(user_id)
        .bind(sqlx::types::Json(&items))
        .bind(money::format_amount(subtotal))
        .bind(money::format_amount(delivery))
        .bind(money::format_amount(total))
        .bind(input.payment_method)
        .bind(payment_status)
        .bind(order_status)
        .bind(promo.as_ref().map(|(p, _)| p.code.clone()))
        .bind(promo.as_ref().map(|(_, d)| money::format_amount(*d)))
        .bind(input.full_name.trim())
        .bind(normalize_phone(&input.phone))
        .bind(input.address.trim())
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        if let Some((promo, discount)) = &promo {
            promo_service
                .redeem(&mut tx, promo, user_id, order_id, *discount)
                .await?;
        }

        // Immediate payment decrements stock right here; gateway and
        // direct-transfer orders defer to their confirmation paths.
        let order = if state.is_paid() {
            reduce_stock_once(&mut tx, &order).await?
        } else {
            order
        };

        tx.commit().await?;

        Ok(order)
    }

    /// Ask the gateway for a payment link and store it on the order. The
    /// order row already exists, so a gateway failure surfaces as 503 while
    /// the customer can still retry or fall back to another method.
    pub async fn request_payment_link(&self, order: Order) -> AppResult<Order> {
        let client = OzonPayClient::new(self.config.ozonpay.clone());
        let created = client
            .create_order(&order.id.to_string(), &order.total_amount)
            .await?;

        // A gateway that reports the order paid at creation time means the
        // keys are misconfigured (or worse); surface it instead of
        // completing a suspicious transaction.
        if created.is_paid() {
            return Err(AppError::PaymentGateway(
                "Gateway reported a just-created order as already paid; contact support"
                    .to_string(),
            ));
        }

        let order: Order = sqlx::query_as(
            "UPDATE orders SET external_order_id = ?, payment_url = ?, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(&created.order_id)
        .bind(&created.payment_url)
        .bind(Utc::now())
        .bind(order.id)
        .fetch_one(&self.db)
        .await?;

        Ok(order)
    }

    // Reads

    pub async fn get(&self, order_id: Uuid) -> AppResult<Order> {
        let order: Option<Order> = sqlx::query_as("SELECT * FROM orders WHERE id = ?")
            .bind(order_id)
            .fetch_optional(&self.db)
            .await?;

        order.ok_or(AppError::OrderNotFound)
    }

    pub async fn get_owned(&self, order_id: Uuid, user_id: Uuid) -> AppResult<Order> {
        let order = self.get(order_id).await?;
        if order.user_id != user_id {
            return Err(AppError::NotOwner);
        }
        Ok(order)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<Order>> {
        let orders: Vec<Order> =
            sqlx::query_as("SELECT * FROM orders WHERE user_id = ? ORDER BY created_at DESC")
                .bind(user_id)
                .fetch_all(&self.db)
                .await?;
        Ok(orders)
    }

    pub async fn list_all(&self, status: Option<OrderStatus>) -> AppResult<Vec<Order>> {
        let orders: Vec<Order> = match status {
            Some(status) => {
                sqlx::query_as(
                    "SELECT * FROM orders WHERE order_status = ? ORDER BY created_at DESC",
                )
                .bind(status)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM orders ORDER BY created_at DESC")
                    .fetch_all(&self.db)
                    .await?
            }
        };
        Ok(orders)
    }

    // Customer actions

    /// Attach (or replace) a payment proof on a direct-transfer order.
    pub async fn attach_proof(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        proof_url: &str,
    ) -> AppResult<Order> {
        let order = self.get_owned(order_id, user_id).await?;

        let next = OrderState::PendingVerification {
            proof_url: Some(proof_url.to_string()),
        };

        let mut tx = self.db.begin().await?;
        let order = apply_transition(&mut tx, &order, &next).await?;
        tx.commit().await?;

        Ok(order)
    }

    /// Re-request a gateway link for an unpaid or failed ozonpay order.
    pub async fn retry_payment(&self, order_id: Uuid, user_id: Uuid) -> AppResult<Order> {
        let order = self.get_owned(order_id, user_id).await?;

        if order.payment_method != PaymentMethod::Ozonpay {
            return Err(AppError::BadRequest(
                "Only gateway orders can retry payment".to_string(),
            ));
        }

        let order = match OrderState::from_columns(&order)? {
            OrderState::AwaitingPayment => order,
            OrderState::PaymentFailed => {
                let mut tx = self.db.begin().await?;
                let order =
                    apply_transition(&mut tx, &order, &OrderState::AwaitingPayment).await?;
                tx.commit().await?;
                order
            }
            state => {
                return Err(AppError::InvalidOrderState(format!(
                    "Cannot retry payment from {:?}",
                    state
                )))
            }
        };

        // The webhook for the previous attempt may still be in flight; do
        // not hand out a second link for a payment the gateway already took.
        if let Some(external_id) = &order.external_order_id {
            let client = OzonPayClient::new(self.config.ozonpay.clone());
            let status = client.get_order_status(external_id).await?;
            if status.status == "Completed" {
                return Err(AppError::PaymentGateway(format!(
                    "Gateway order {} is already completed; awaiting confirmation",
                    status.order_id
                )));
            }
        }

        self.request_payment_link(order).await
    }

    /// Apply a promo code to an existing unpaid order. Shares validation
    /// and the redemption ledger with checkout-time application.
    pub async fn apply_promo(&self, order_id: Uuid, user_id: Uuid, code: &str) -> AppResult<Order> {
        let order = self.get_owned(order_id, user_id).await?;

        let state = OrderState::from_columns(&order)?;
        if state.is_paid() || state.is_terminal() {
            return Err(AppError::InvalidOrderState(
                "Promo codes only apply to unpaid orders".to_string(),
            ));
        }
        if order.promo_code.is_some() {
            return Err(AppError::BadRequest(
                "Order already has a promo code".to_string(),
            ));
        }

        let subtotal = money::parse_amount(&order.subtotal_amount)?;
        let promo_service = PromoService::new(self.db.clone());
        let (promo, discount) = promo_service.validate(code, user_id, subtotal).await?;

        let delivery = money::parse_amount(&order.delivery_amount)?;
        let total = subtotal - discount + delivery;

        let mut tx = self.db.begin().await?;
        promo_service
            .redeem(&mut tx, &promo, user_id, order_id, discount)
            .await?;

        let order: Order = sqlx::query_as(
            r#"
            UPDATE orders
            SET promo_code = ?, promo_code_discount = ?, total_amount = ?, updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&promo.code)
        .bind(money::format_amount(discount))
        .bind(money::format_amount(total))
        .bind(Utc::now())
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(order)
    }

    // Gateway webhook

    /// Apply a verified gateway callback. Mutation is idempotent across
    /// duplicate deliveries; the caller decides about notifications.
    pub async fn handle_webhook(
        &self,
        payload: &WebhookPayload,
    ) -> AppResult<(Order, WebhookOutcome)> {
        let client = OzonPayClient::new(self.config.ozonpay.clone());
        client.verify_webhook(payload)?;

        let order_id =
            Uuid::parse_str(&payload.ext_order_id).map_err(|_| AppError::OrderNotFound)?;
        let order = self.get(order_id).await?;
        let state = OrderState::from_columns(&order)?;

        match payload.status.as_str() {
            "Completed" => {
                if state.is_paid() {
                    // Duplicate delivery: the order is already settled.
                    return Ok((order, WebhookOutcome::Paid));
                }

                let next = OrderState::Paid {
                    method: PaymentMethod::Ozonpay,
                };
                let mut tx = self.db.begin().await?;
                let order = apply_transition(&mut tx, &order, &next).await?;
                tx.commit().await?;

                Ok((order, WebhookOutcome::Paid))
            }
            "Failed" => {
                if state == OrderState::PaymentFailed {
                    return Ok((order, WebhookOutcome::Failed));
                }

                let mut tx = self.db.begin().await?;
                let order = apply_transition(&mut tx, &order, &OrderState::PaymentFailed).await?;
                tx.commit().await?;

                Ok((order, WebhookOutcome::Failed))
            }
            // Everything else is an intermediate gateway status.
            _ => Ok((order, WebhookOutcome::Ignored)),
        }
    }

    // Admin actions

    pub async fn admin_update_status(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        tracking_number: Option<String>,
        comment: Option<String>,
        cancel_reason: Option<String>,
    ) -> AppResult<Order> {
        let order = self.get(order_id).await?;

        let next = match target {
            // Moving into processing is the admin confirming payment
            // (direct transfer reviewed, or a manual override).
            OrderStatus::Processing => OrderState::Paid {
                method: order.payment_method,
            },
            OrderStatus::Shipped => OrderState::Shipped {
                tracking: tracking_number.clone(),
            },
            OrderStatus::Completed => OrderState::Completed,
            OrderStatus::Cancelled => OrderState::Cancelled {
                payment_status: order.payment_status,
                reason: cancel_reason.clone(),
            },
            OrderStatus::Pending => {
                return Err(AppError::InvalidOrderState(
                    "Orders cannot be moved back to pending".to_string(),
                ))
            }
        };

        let mut tx = self.db.begin().await?;
        let mut order = apply_transition(&mut tx, &order, &next).await?;

        if let Some(comment) = comment {
            order = sqlx::query_as(
                "UPDATE orders SET admin_comment = ?, updated_at = ? WHERE id = ? RETURNING *",
            )
            .bind(comment)
            .bind(Utc::now())
            .bind(order_id)
            .fetch_one(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(order)
    }

    /// Hard delete with full reversal: restores stock if the decrement had
    /// fired and releases the promo redemption.
    pub async fn admin_delete_order(&self, order_id: Uuid) -> AppResult<()> {
        let order = self.get(order_id).await?;

        let mut tx = self.db.begin().await?;

        if order.product_quantities_reduced {
            products::restore_stock(&mut tx, &order.items.0).await?;
        }

        PromoService::new(self.db.clone())
            .reverse(&mut tx, order_id)
            .await?;

        sqlx::query("DELETE FROM orders WHERE id = ?")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    fn delivery_fee(&self, discounted_subtotal: Decimal) -> AppResult<Decimal> {
        let cost = money::parse_amount(&self.config.delivery.cost)?;
        let free_threshold = money::parse_amount(&self.config.delivery.free_threshold)?;

        if discounted_subtotal >= free_threshold {
            Ok(Decimal::ZERO)
        } else {
            Ok(cost)
        }
    }
}

/// Validate and persist a state transition, firing the one-shot stock
/// decrement when the order enters a paid state. Runs entirely inside the
/// caller's transaction.
async fn apply_transition(
    conn: &mut SqliteConnection,
    order: &Order,
    next: &OrderState,
) -> AppResult<Order> {
    let current = OrderState::from_columns(order)?;
    if !current.can_transition(next) {
        return Err(AppError::InvalidOrderState(format!(
            "{:?} -> {:?}",
            current, next
        )));
    }

    let (payment_status, order_status) = next.columns();

    let mut updated: Order = sqlx::query_as(
        r#"
        UPDATE orders
        SET payment_status = ?, order_status = ?, payment_proof_url = ?, tracking_number = ?,
            cancel_reason = ?, updated_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(payment_status)
    .bind(order_status)
    .bind(match next {
        OrderState::PendingVerification { proof_url } => proof_url.clone(),
        _ => order.payment_proof_url.clone(),
    })
    .bind(match next {
        OrderState::Shipped { tracking } => tracking.clone(),
        _ => order.tracking_number.clone(),
    })
    .bind(match next {
        OrderState::Cancelled { reason, .. } => reason.clone(),
        _ => order.cancel_reason.clone(),
    })
    .bind(Utc::now())
    .bind(order.id)
    .fetch_one(&mut *conn)
    .await?;

    if next.is_paid() {
        updated = reduce_stock_once(conn, &updated).await?;
    }

    Ok(updated)
}

/// The stock-decrement gate. The conditional update flips
/// `product_quantities_reduced` from 0 to 1; only the caller that wins the
/// flip decrements product quantities, so replayed transitions are no-ops.
async fn reduce_stock_once(conn: &mut SqliteConnection, order: &Order) -> AppResult<Order> {
    let won = sqlx::query(
        "UPDATE orders SET product_quantities_reduced = 1 WHERE id = ? AND product_quantities_reduced = 0",
    )
    .bind(order.id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if won == 1 {
        products::decrement_stock(conn, &order.items.0).await?;
    }

    let order: Order = sqlx::query_as("SELECT * FROM orders WHERE id = ?")
        .bind(order.id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentStatus;
    use crate::services::products::{ProductInput, ProductsService};
    use crate::test_util::{test_config, test_pool};

    async fn seed_user(db: &SqlitePool, balance: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, full_name, phone, is_admin, balance, created_at, updated_at)
            VALUES (?, ?, 'x', 'Test', '+79991234567', 0, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(format!("{}@test.com", id))
        .bind(balance)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(db)
        .await
        .unwrap();
        id
    }

    async fn seed_product(db: &SqlitePool, price: &str, quantity: i64) -> Uuid {
        let input = ProductInput {
            name: "Monstera".into(),
            description: String::new(),
            price: price.into(),
            original_price: None,
            quantity,
            category: None,
            images: vec![],
            labels: vec![],
            is_available: true,
            is_preorder: false,
            is_rare: false,
            is_easy_care: false,
            is_pet_safe: false,
            is_discount: false,
        };
        ProductsService::new(db.clone()).create(&input).await.unwrap().id
    }

    fn checkout(product_id: Uuid, method: PaymentMethod) -> CreateOrderInput {
        CreateOrderInput {
            items: vec![CreateOrderItemInput {
                product_id,
                quantity: 2,
            }],
            payment_method: method,
            full_name: "Test User".into(),
            phone: "89991234567".into(),
            address: "Garden street 1".into(),
            promo_code: None,
        }
    }

    async fn product_quantity(db: &SqlitePool, id: Uuid) -> i64 {
        sqlx::query_scalar("SELECT quantity FROM products WHERE id = ?")
            .bind(id)
            .fetch_one(db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn balance_payment_rejects_insufficient_funds() {
        let db = test_pool().await;
        let service = OrdersService::new(db.clone(), test_config());
        let user_id = seed_user(&db, "300").await;
        // 2 x 100 + 350 delivery = 550 > 300
        let product_id = seed_product(&db, "100", 10).await;

        let result = service
            .create_order(user_id, &checkout(product_id, PaymentMethod::Balance))
            .await;
        assert!(matches!(result, Err(AppError::InsufficientBalance)));

        let balance: String = sqlx::query_scalar("SELECT balance FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(balance, "300");
        assert_eq!(product_quantity(&db, product_id).await, 10);
    }

    #[tokio::test]
    async fn balance_payment_debits_and_decrements_once() {
        let db = test_pool().await;
        let service = OrdersService::new(db.clone(), test_config());
        let user_id = seed_user(&db, "1000").await;
        let product_id = seed_product(&db, "100", 10).await;

        let order = service
            .create_order(user_id, &checkout(product_id, PaymentMethod::Balance))
            .await
            .unwrap();

        // 200 items + 350 delivery
        assert_eq!(order.total_amount, "550");
        assert_eq!(order.payment_status, PaymentStatus::Completed);
        assert_eq!(order.order_status, OrderStatus::Processing);
        assert!(order.product_quantities_reduced);

        let balance: String = sqlx::query_scalar("SELECT balance FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(balance, "450");
        assert_eq!(product_quantity(&db, product_id).await, 8);
    }

    #[tokio::test]
    async fn stock_decrement_fires_at_most_once() {
        let db = test_pool().await;
        let service = OrdersService::new(db.clone(), test_config());
        let user_id = seed_user(&db, "0").await;
        let product_id = seed_product(&db, "100", 10).await;

        let order = service
            .create_order(user_id, &checkout(product_id, PaymentMethod::DirectTransfer))
            .await
            .unwrap();
        assert!(!order.product_quantities_reduced);
        assert_eq!(product_quantity(&db, product_id).await, 10);

        // Admin confirms the transfer, then replays the same transition
        // through further status updates.
        service
            .admin_update_status(order.id, OrderStatus::Processing, None, None, None)
            .await
            .unwrap();
        assert_eq!(product_quantity(&db, product_id).await, 8);

        service
            .admin_update_status(order.id, OrderStatus::Shipped, None, None, None)
            .await
            .unwrap();
        service
            .admin_update_status(order.id, OrderStatus::Completed, None, None, None)
            .await
            .unwrap();
        assert_eq!(product_quantity(&db, product_id).await, 8);
    }

    #[tokio::test]
    async fn illegal_admin_transition_is_rejected() {
        let db = test_pool().await;
        let service = OrdersService::new(db.clone(), test_config());
        let user_id = seed_user(&db, "0").await;
        let product_id = seed_product(&db, "100", 10).await;

        let order = service
            .create_order(user_id, &checkout(product_id, PaymentMethod::DirectTransfer))
            .await
            .unwrap();

        // Shipping an unpaid order skips the paid state.
        let result = service
            .admin_update_status(order.id, OrderStatus::Shipped, None, None, None)
            .await;
        assert!(matches!(result, Err(AppError::InvalidOrderState(_))));
    }

    #[tokio::test]
    async fn checkout_applies_promo_capped_at_subtotal() {
        use crate::models::DiscountType;

        let db = test_pool().await;
        let service = OrdersService::new(db.clone(), test_config());
        let user_id = seed_user(&db, "0").await;
        let product_id = seed_product(&db, "100", 10).await;

        PromoService::new(db.clone())
            .create("BIG", DiscountType::Fixed, "10000", None, None, None, None)
            .await
            .unwrap();

        let mut input = checkout(product_id, PaymentMethod::DirectTransfer);
        input.promo_code = Some("BIG".into());

        let order = service.create_order(user_id, &input).await.unwrap();

        // Discount caps at the 200 subtotal; delivery still applies.
        assert_eq!(order.promo_code_discount.as_deref(), Some("200"));
        assert_eq!(order.total_amount, "350");
    }

    #[tokio::test]
    async fn admin_delete_restores_stock_and_promo() {
        use crate::models::DiscountType;

        let db = test_pool().await;
        let service = OrdersService::new(db.clone(), test_config());
        let user_id = seed_user(&db, "1000").await;
        let product_id = seed_product(&db, "100", 10).await;

        PromoService::new(db.clone())
            .create("SPRING", DiscountType::Percentage, "10", None, None, None, None)
            .await
            .unwrap();

        let mut input = checkout(product_id, PaymentMethod::Balance);
        input.promo_code = Some("SPRING".into());
        let order = service.create_order(user_id, &input).await.unwrap();
        assert_eq!(product_quantity(&db, product_id).await, 8);

        service.admin_delete_order(order.id).await.unwrap();

        assert_eq!(product_quantity(&db, product_id).await, 10);
        let uses: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM promo_code_uses")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(uses, 0);
        let current: i64 =
            sqlx::query_scalar("SELECT current_uses FROM promo_codes WHERE code = 'SPRING'")
                .fetch_one(&db)
                .await
                .unwrap();
        assert_eq!(current, 0);
    }

    fn signed_webhook(order: &Order, status: &str) -> WebhookPayload {
        let config = test_config();
        let mut payload = WebhookPayload {
            order_id: "oz-1".into(),
            transaction_id: "tx-1".into(),
            ext_order_id: order.id.to_string(),
            amount: money::to_minor_units(money::parse_amount(&order.total_amount).unwrap()),
            currency_code: "RUB".into(),
            status: status.into(),
            request_sign: String::new(),
        };
        payload.request_sign = crate::services::ozonpay::webhook_signature(
            &payload,
            &config.ozonpay.notification_secret_key,
        );
        payload
    }

    #[tokio::test]
    async fn duplicate_completed_webhook_decrements_once() {
        let db = test_pool().await;
        let service = OrdersService::new(db.clone(), test_config());
        let user_id = seed_user(&db, "0").await;
        let product_id = seed_product(&db, "100", 10).await;

        let order = service
            .create_order(user_id, &checkout(product_id, PaymentMethod::Ozonpay))
            .await
            .unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Pending);

        let payload = signed_webhook(&order, "Completed");

        let (first, outcome) = service.handle_webhook(&payload).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Paid);
        assert_eq!(first.payment_status, PaymentStatus::Completed);
        assert_eq!(product_quantity(&db, product_id).await, 8);

        // Second identical delivery: order mutation is idempotent.
        let (second, outcome) = service.handle_webhook(&payload).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Paid);
        assert_eq!(second.payment_status, PaymentStatus::Completed);
        assert_eq!(product_quantity(&db, product_id).await, 8);
    }

    #[tokio::test]
    async fn tampered_webhook_is_rejected() {
        let db = test_pool().await;
        let service = OrdersService::new(db.clone(), test_config());
        let user_id = seed_user(&db, "0").await;
        let product_id = seed_product(&db, "100", 10).await;

        let order = service
            .create_order(user_id, &checkout(product_id, PaymentMethod::Ozonpay))
            .await
            .unwrap();

        let mut payload = signed_webhook(&order, "Failed");
        payload.status = "Completed".into();

        let result = service.handle_webhook(&payload).await;
        assert!(matches!(result, Err(AppError::InvalidWebhookSignature)));
        assert_eq!(product_quantity(&db, product_id).await, 10);
    }

    #[tokio::test]
    async fn failed_webhook_allows_retry() {
        let db = test_pool().await;
        let service = OrdersService::new(db.clone(), test_config());
        let user_id = seed_user(&db, "0").await;
        let product_id = seed_product(&db, "100", 10).await;

        let order = service
            .create_order(user_id, &checkout(product_id, PaymentMethod::Ozonpay))
            .await
            .unwrap();

        let payload = signed_webhook(&order, "Failed");
        let (order, outcome) = service.handle_webhook(&payload).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Failed);
        assert_eq!(order.payment_status, PaymentStatus::Failed);
        assert_eq!(order.order_status, OrderStatus::Pending);

        // An unknown intermediate status leaves the order untouched.
        let payload = signed_webhook(&order, "Processing");
        let (order, outcome) = service.handle_webhook(&payload).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
        assert_eq!(order.payment_status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn oversell_rolls_back_the_whole_order() {
        let db = test_pool().await;
        let service = OrdersService::new(db.clone(), test_config());
        let user_id = seed_user(&db, "1000").await;
        let product_id = seed_product(&db, "100", 1).await;

        let result = service
            .create_order(user_id, &checkout(product_id, PaymentMethod::Balance))
            .await;
        assert!(matches!(result, Err(AppError::OutOfStock(_))));

        let orders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(orders, 0);
    }
}
