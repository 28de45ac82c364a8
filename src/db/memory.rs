//! In-memory store for tests and dry runs.

use super::{StoreError, TradeStore};
use crate::domain::{
    sort_orders_deterministic, Decimal, NewOrder, Order, OrderId, Trade, TradeData, TradeId,
    TradeStatus, UserId,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    orders: BTreeMap<OrderId, Order>,
    trades: BTreeMap<TradeId, Trade>,
    next_order_id: i64,
    next_trade_id: i64,
    trade_writes: usize,
    fail_writes: bool,
}

impl State {
    fn next_order_id(&mut self) -> OrderId {
        self.next_order_id += 1;
        OrderId(self.next_order_id)
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Db(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

/// Store that keeps orders and trades in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add orders to the store, assigning ids in the given order.
    pub fn with_orders(self, orders: Vec<NewOrder>) -> Self {
        for order in orders {
            self.insert_order(order);
        }
        self
    }

    /// Insert an order and return it with its assigned id.
    pub fn insert_order(&self, order: NewOrder) -> Order {
        let mut state = self.lock();
        let id = state.next_order_id();
        let order = order.into_order(id);
        state.orders.insert(id, order.clone());
        order
    }

    /// Insert a trade as-is, without touching order links.
    pub fn insert_trade(&self, data: TradeData) -> Trade {
        let mut state = self.lock();
        state.next_trade_id += 1;
        let trade = Trade::new(TradeId(state.next_trade_id), data);
        state.trades.insert(trade.id, trade.clone());
        trade
    }

    /// All stored orders, ascending by id.
    pub fn orders(&self) -> Vec<Order> {
        self.lock().orders.values().cloned().collect()
    }

    /// All stored trades, ascending by id.
    pub fn trades(&self) -> Vec<Trade> {
        self.lock().trades.values().cloned().collect()
    }

    /// Number of trade inserts and updates performed so far.
    pub fn trade_writes(&self) -> usize {
        self.lock().trade_writes
    }

    /// Make every subsequent write fail, simulating a lost database.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn get_unprocessed_orders(&self, user: &UserId) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .lock()
            .orders
            .values()
            .filter(|o| &o.user == user && o.is_unprocessed())
            .cloned()
            .collect();
        sort_orders_deterministic(&mut orders);
        Ok(orders)
    }

    async fn get_all_open_trades(&self, user: &UserId) -> Result<Vec<Trade>, StoreError> {
        Ok(self
            .lock()
            .trades
            .values()
            .filter(|t| &t.data.user == user && t.data.status == TradeStatus::Open)
            .cloned()
            .collect())
    }

    async fn get_orders_by_ids(&self, ids: &[OrderId]) -> Result<Vec<Order>, StoreError> {
        let state = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| state.orders.get(id).cloned())
            .collect())
    }

    async fn update_orders_with_trade_id(
        &self,
        ids: &[OrderId],
        trade_id: TradeId,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.check_writable()?;
        for id in ids {
            if let Some(order) = state.orders.get_mut(id) {
                order.trade_id = Some(trade_id);
            }
        }
        Ok(())
    }

    async fn split_order(
        &self,
        id: OrderId,
        first: Decimal,
        second: Decimal,
    ) -> Result<(OrderId, OrderId), StoreError> {
        let mut state = self.lock();
        state.check_writable()?;
        let original = state
            .orders
            .get(&id)
            .cloned()
            .ok_or(StoreError::OrderNotFound(id))?;
        if first + second != original.quantity || !first.is_positive() || !second.is_positive() {
            return Err(StoreError::InvalidSplit {
                id,
                reason: format!(
                    "{} + {} does not split quantity {}",
                    first, second, original.quantity
                ),
            });
        }

        let first_id = state.next_order_id();
        let second_id = state.next_order_id();
        state.orders.remove(&id);
        state
            .orders
            .insert(first_id, original.split_part(first_id, first));
        state
            .orders
            .insert(second_id, original.split_part(second_id, second));
        Ok((first_id, second_id))
    }

    async fn save_trade(&self, data: &TradeData) -> Result<Trade, StoreError> {
        let mut state = self.lock();
        state.check_writable()?;
        state.next_trade_id += 1;
        state.trade_writes += 1;
        let trade = Trade::new(TradeId(state.next_trade_id), data.clone());
        state.trades.insert(trade.id, trade.clone());
        Ok(trade)
    }

    async fn update_trade(&self, id: TradeId, data: &TradeData) -> Result<bool, StoreError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.check_writable()?;
        match state.trades.get_mut(&id) {
            Some(trade) => {
                trade.data = data.clone();
                state.trade_writes += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Side, Symbol, TimeMs};

    fn order(side: Side, qty: i64, time_ms: i64) -> NewOrder {
        NewOrder::new(
            UserId::new("u1"),
            Symbol::new("AAPL"),
            side,
            Decimal::from_i64(qty),
            Decimal::from_i64(10),
            TimeMs::new(time_ms),
        )
    }

    #[tokio::test]
    async fn test_unprocessed_orders_filtered_and_sorted() {
        let store = MemoryStore::new().with_orders(vec![
            order(Side::Buy, 1, 3000),
            order(Side::Buy, 1, 1000),
            order(Side::Buy, 1, 2000).with_cancelled_at(TimeMs::new(2500)),
            order(Side::Buy, 1, 500).without_execution_time(),
        ]);

        let orders = store
            .get_unprocessed_orders(&UserId::new("u1"))
            .await
            .unwrap();
        let times: Vec<_> = orders.iter().map(|o| o.executed_at).collect();
        assert_eq!(times, vec![Some(TimeMs::new(1000)), Some(TimeMs::new(3000))]);

        let other = store
            .get_unprocessed_orders(&UserId::new("u2"))
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_split_order_replaces_original() {
        let store = MemoryStore::new();
        let original = store.insert_order(order(Side::Sell, 200, 1000));

        let (a, b) = store
            .split_order(original.id, Decimal::from_i64(120), Decimal::from_i64(80))
            .await
            .unwrap();

        let orders = store.orders();
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|o| o.id != original.id));
        assert_eq!(orders[0].id, a);
        assert_eq!(orders[0].quantity, Decimal::from_i64(120));
        assert_eq!(orders[1].id, b);
        assert_eq!(orders[1].quantity, Decimal::from_i64(80));
        assert!(orders.iter().all(|o| o.split_from == Some(original.id)));
    }

    #[tokio::test]
    async fn test_split_order_rejects_mismatched_quantities() {
        let store = MemoryStore::new();
        let original = store.insert_order(order(Side::Sell, 200, 1000));

        let err = store
            .split_order(original.id, Decimal::from_i64(100), Decimal::from_i64(50))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSplit { .. }));
        assert_eq!(store.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_split_order_rejects_non_positive_parts() {
        let store = MemoryStore::new();
        let original = store.insert_order(order(Side::Sell, 200, 1000));

        for (first, second) in [(200, 0), (0, 200), (250, -50)] {
            let err = store
                .split_order(
                    original.id,
                    Decimal::from_i64(first),
                    Decimal::from_i64(second),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidSplit { .. }));
        }
        assert_eq!(store.orders(), vec![original]);
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let store = MemoryStore::new();
        let original = store.insert_order(order(Side::Buy, 1, 1000));
        store.set_fail_writes(true);

        let err = store
            .update_orders_with_trade_id(&[original.id], TradeId(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Db(_)));
    }
}
