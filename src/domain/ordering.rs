//! Stable order ordering for deterministic matching.

use crate::domain::{Order, OrderId, TimeMs};

/// Stable ordering key for orders.
///
/// Orders sharing an execution timestamp are matched in ascending id order,
/// which is import order for a single batch. Split parts take the place of
/// the order they were split from, so a resumed run matches them in the
/// same position as the run that created them.
/// Ordering: executed_at -> root id -> id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderOrderingKey {
    /// Execution time (primary sort). Orders without one sort first.
    pub executed_at: Option<TimeMs>,
    /// Id of the order before any split.
    pub root_id: OrderId,
    /// Order id (tie-breaker between split parts).
    pub id: OrderId,
}

impl OrderOrderingKey {
    pub fn from_order(order: &Order) -> Self {
        OrderOrderingKey {
            executed_at: order.executed_at,
            root_id: order.split_from.unwrap_or(order.id),
            id: order.id,
        }
    }
}

/// Sort orders deterministically.
pub fn sort_orders_deterministic(orders: &mut [Order]) {
    orders.sort_by_key(OrderOrderingKey::from_order);
}
