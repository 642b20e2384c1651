use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Item snapshots taken at order time, denormalized from the catalog.
    pub items: sqlx::types::Json<Vec<OrderItem>>,
    pub subtotal_amount: String,
    pub delivery_amount: String,
    pub total_amount: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    /// One-shot gate: inventory is reduced exactly once per order no matter
    /// how many status transitions touch it.
    pub product_quantities_reduced: bool,
    pub promo_code: Option<String>,
    pub promo_code_discount: Option<String>,
    pub full_name: String,
    pub phone: String,
    pub address: String,
    pub payment_proof_url: Option<String>,
    pub tracking_number: Option<String>,
    pub cancel_reason: Option<String>,
    pub admin_comment: Option<String>,
    pub external_order_id: Option<String>,
    pub payment_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub name: String,
    pub price: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum PaymentMethod {
    Balance,
    DirectTransfer,
    Ozonpay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    PendingVerification,
    Verification,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Completed,
    Cancelled,
}

/// The order lifecycle as a single tagged state.
///
/// The database keeps the `payment_status`/`order_status` column pair for
/// the API contract, but every read and write goes through this type, so
/// only the combinations enumerated here can exist and every transition is
/// checked in one place.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderState {
    /// Awaiting gateway payment (or a retry after failure was reset).
    AwaitingPayment,
    /// Gateway reported the payment failed; retry is possible.
    PaymentFailed,
    /// Direct transfer: waiting for the customer's payment proof, then for
    /// an admin to review it.
    PendingVerification { proof_url: Option<String> },
    /// Payment confirmed; inventory decrement has been triggered.
    Paid { method: PaymentMethod },
    Shipped { tracking: Option<String> },
    Completed,
    Cancelled {
        payment_status: PaymentStatus,
        reason: Option<String>,
    },
}

impl OrderState {
    /// Reconstruct the state from the persisted column pair. Combinations
    /// outside the enumerated set fail loudly instead of round-tripping.
    pub fn from_columns(order: &Order) -> AppResult<OrderState> {
        use OrderStatus as O;
        use PaymentStatus as P;

        let state = match (order.payment_status, order.order_status) {
            (payment_status, O::Cancelled) => OrderState::Cancelled {
                payment_status,
                reason: order.cancel_reason.clone(),
            },
            (P::Pending, O::Pending) => OrderState::AwaitingPayment,
            (P::Failed, O::Pending) => OrderState::PaymentFailed,
            (P::PendingVerification, O::Pending) => {
                OrderState::PendingVerification { proof_url: None }
            }
            (P::Verification, O::Pending) => OrderState::PendingVerification {
                proof_url: order.payment_proof_url.clone(),
            },
            (P::Completed, O::Processing) => OrderState::Paid {
                method: order.payment_method,
            },
            (P::Completed, O::Shipped) => OrderState::Shipped {
                tracking: order.tracking_number.clone(),
            },
            (P::Completed, O::Completed) => OrderState::Completed,
            (payment, order_status) => {
                return Err(AppError::InvalidOrderState(format!(
                    "{:?}/{:?}",
                    payment, order_status
                )))
            }
        };

        Ok(state)
    }

    /// The column pair this state persists as.
    pub fn columns(&self) -> (PaymentStatus, OrderStatus) {
        match self {
            OrderState::AwaitingPayment => (PaymentStatus::Pending, OrderStatus::Pending),
            OrderState::PaymentFailed => (PaymentStatus::Failed, OrderStatus::Pending),
            OrderState::PendingVerification { proof_url: None } => {
                (PaymentStatus::PendingVerification, OrderStatus::Pending)
            }
            OrderState::PendingVerification { proof_url: Some(_) } => {
                (PaymentStatus::Verification, OrderStatus::Pending)
            }
            OrderState::Paid { .. } => (PaymentStatus::Completed, OrderStatus::Processing),
            OrderState::Shipped { .. } => (PaymentStatus::Completed, OrderStatus::Shipped),
            OrderState::Completed => (PaymentStatus::Completed, OrderStatus::Completed),
            OrderState::Cancelled { payment_status, .. } => {
                (*payment_status, OrderStatus::Cancelled)
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Completed | OrderState::Cancelled { .. })
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition(&self, next: &OrderState) -> bool {
        use OrderState::*;

        match (self, next) {
            // Cancellation is reachable from any non-terminal state.
            (state, Cancelled { .. }) => !state.is_terminal(),

            (AwaitingPayment, Paid { .. }) => true,
            (AwaitingPayment, PaymentFailed) => true,
            (AwaitingPayment, PendingVerification { .. }) => true,

            (PaymentFailed, AwaitingPayment) => true,

            // Proof upload / re-upload keeps the order under verification.
            (PendingVerification { .. }, PendingVerification { .. }) => true,
            (PendingVerification { .. }, Paid { .. }) => true,

            (Paid { .. }, Shipped { .. }) => true,
            (Paid { .. }, Completed) => true,

            (Shipped { .. }, Completed) => true,

            _ => false,
        }
    }

    /// Paid is the state whose entry triggers the stock decrement.
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            OrderState::Paid { .. } | OrderState::Shipped { .. } | OrderState::Completed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_with(payment: PaymentStatus, status: OrderStatus) -> Order {
        Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            items: sqlx::types::Json(vec![]),
            subtotal_amount: "100".into(),
            delivery_amount: "0".into(),
            total_amount: "100".into(),
            payment_method: PaymentMethod::Ozonpay,
            payment_status: payment,
            order_status: status,
            product_quantities_reduced: false,
            promo_code: None,
            promo_code_discount: None,
            full_name: "Test".into(),
            phone: "+79991234567".into(),
            address: "Somewhere".into(),
            payment_proof_url: None,
            tracking_number: None,
            cancel_reason: None,
            admin_comment: None,
            external_order_id: None,
            payment_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn legal_states_round_trip() {
        let states = [
            OrderState::AwaitingPayment,
            OrderState::PaymentFailed,
            OrderState::PendingVerification { proof_url: None },
            OrderState::Paid {
                method: PaymentMethod::Ozonpay,
            },
            OrderState::Completed,
        ];
        for state in states {
            let (payment, status) = state.columns();
            let order = order_with(payment, status);
            assert_eq!(OrderState::from_columns(&order).unwrap(), state);
        }
    }

    #[test]
    fn illegal_column_pairs_are_rejected() {
        // orderStatus=completed with paymentStatus=pending was representable
        // in the old two-field model; here it fails to load.
        let order = order_with(PaymentStatus::Pending, OrderStatus::Completed);
        assert!(OrderState::from_columns(&order).is_err());

        let order = order_with(PaymentStatus::Failed, OrderStatus::Shipped);
        assert!(OrderState::from_columns(&order).is_err());
    }

    #[test]
    fn cancellation_reachable_from_non_terminal_only() {
        let cancelled = OrderState::Cancelled {
            payment_status: PaymentStatus::Pending,
            reason: None,
        };
        assert!(OrderState::AwaitingPayment.can_transition(&cancelled));
        assert!(OrderState::Paid { method: PaymentMethod::Balance }.can_transition(&cancelled));
        assert!(!OrderState::Completed.can_transition(&cancelled));
        assert!(!cancelled.clone().can_transition(&cancelled));
    }

    #[test]
    fn payment_flow_transitions() {
        let paid = OrderState::Paid {
            method: PaymentMethod::Ozonpay,
        };
        assert!(OrderState::AwaitingPayment.can_transition(&paid));
        assert!(OrderState::AwaitingPayment.can_transition(&OrderState::PaymentFailed));
        assert!(OrderState::PaymentFailed.can_transition(&OrderState::AwaitingPayment));
        assert!(!OrderState::Completed.can_transition(&paid));
        assert!(!paid.can_transition(&OrderState::AwaitingPayment));
    }

    #[test]
    fn verification_flow_transitions() {
        let waiting = OrderState::PendingVerification { proof_url: None };
        let with_proof = OrderState::PendingVerification {
            proof_url: Some("uploads/proof.jpg".into()),
        };
        let paid = OrderState::Paid {
            method: PaymentMethod::DirectTransfer,
        };
        assert!(waiting.can_transition(&with_proof));
        assert!(with_proof.can_transition(&paid));
        assert!(!paid.can_transition(&waiting));
    }
}
