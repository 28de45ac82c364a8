use crate::db::{StoreError, TradeStore};
use crate::domain::{Decimal, Order, OrderId};
use thiserror::Error;
use tracing::info;

/// How an order that reverses a position is divided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPlan {
    pub order_id: OrderId,
    /// Quantity that closes the existing position.
    pub closing_quantity: Decimal,
    /// Quantity left over to open the opposite position.
    pub opening_quantity: Decimal,
}

impl SplitPlan {
    pub fn total(&self) -> Decimal {
        self.closing_quantity + self.opening_quantity
    }

    /// Check the plan describes `order` and both parts are positive.
    pub fn validate(&self, order: &Order) -> Result<(), SplitError> {
        if self.order_id != order.id {
            return Err(SplitError::WrongOrder {
                expected: self.order_id,
                actual: order.id,
            });
        }
        if !self.closing_quantity.is_positive() || !self.opening_quantity.is_positive() {
            return Err(SplitError::NonPositivePart {
                order_id: order.id,
                closing: self.closing_quantity,
                opening: self.opening_quantity,
            });
        }
        if self.total() != order.quantity {
            return Err(SplitError::QuantityMismatch {
                order_id: order.id,
                order_quantity: order.quantity,
                split_total: self.total(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("split plan is for order {expected}, got order {actual}")]
    WrongOrder { expected: OrderId, actual: OrderId },
    #[error("split of order {order_id} has a non-positive part ({closing} + {opening})")]
    NonPositivePart {
        order_id: OrderId,
        closing: Decimal,
        opening: Decimal,
    },
    #[error("split of order {order_id} sums to {split_total}, order quantity is {order_quantity}")]
    QuantityMismatch {
        order_id: OrderId,
        order_quantity: Decimal,
        split_total: Decimal,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The two orders a split produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOrders {
    /// Closes the existing position; apply first.
    pub closing: Order,
    /// Opens the reversed position.
    pub opening: Order,
}

/// Divides reversing orders into a closing and an opening part.
pub struct OrderSplitter;

impl OrderSplitter {
    /// Replace `order` in storage with two orders following `plan`.
    ///
    /// Both parts inherit every attribute of the original except id and
    /// quantity. Nothing is written when the plan is inconsistent.
    ///
    /// # Errors
    /// Returns an error if the plan does not match the order or storage fails.
    pub async fn split(
        store: &dyn TradeStore,
        order: &Order,
        plan: &SplitPlan,
    ) -> Result<SplitOrders, SplitError> {
        plan.validate(order)?;

        let (closing_id, opening_id) = store
            .split_order(order.id, plan.closing_quantity, plan.opening_quantity)
            .await?;

        info!(
            user = %order.user,
            order_id = %order.id,
            closing_order_id = %closing_id,
            opening_order_id = %opening_id,
            closing_quantity = %plan.closing_quantity,
            opening_quantity = %plan.opening_quantity,
            "Split reversing order"
        );

        Ok(SplitOrders {
            closing: order.split_part(closing_id, plan.closing_quantity),
            opening: order.split_part(opening_id, plan.opening_quantity),
        })
    }
}
