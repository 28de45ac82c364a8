use crate::db::{StoreError, TradeStore};
use crate::domain::{
    AssetClass, BrokerId, Decimal, Execution, Order, OrderId, PositionSide, Side, Symbol, TimeMs,
    Trade, TradeId, UserId,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

/// Positions are tracked per symbol per broker account; the same symbol held
/// at two brokers is two positions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionKey {
    pub symbol: Symbol,
    pub broker: Option<BrokerId>,
}

impl PositionKey {
    pub fn new(symbol: Symbol, broker: Option<BrokerId>) -> Self {
        Self { symbol, broker }
    }

    pub fn for_order(order: &Order) -> Self {
        Self::new(order.symbol.clone(), order.broker.clone())
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.broker {
            Some(broker) => write!(f, "{}@{}", self.symbol, broker),
            None => write!(f, "{}", self.symbol),
        }
    }
}

/// One order's contribution to a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionFill {
    pub order_id: OrderId,
    pub side: Side,
    pub quantity: Decimal,
    /// Known for every order matched in a run; may be missing on orders loaded from storage.
    pub price: Option<Decimal>,
    pub executed_at: TimeMs,
}

impl PositionFill {
    fn from_execution(order: &Order, exec: Execution) -> Self {
        Self {
            order_id: order.id,
            side: order.side,
            quantity: exec.quantity,
            price: Some(exec.price),
            executed_at: exec.executed_at,
        }
    }
}

/// Current state of an open position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenPosition {
    pub key: PositionKey,
    pub side: PositionSide,
    /// Quantity still open.
    pub quantity: Decimal,
    /// Cost of the open quantity; re-based at the average cost on partial closes.
    pub cost_basis: Decimal,
    /// Execution time of the first contributing order.
    pub open_time: TimeMs,
    /// Contributing orders in matching order.
    pub fills: Vec<PositionFill>,
    /// Set when the position was loaded from an OPEN trade.
    pub existing_trade_id: Option<TradeId>,
    pub asset_class: AssetClass,
    /// Whether any order was applied to this position during the current run.
    pub touched: bool,
}

impl OpenPosition {
    /// Start a new position from an order.
    pub fn open(order: &Order, exec: Execution) -> Self {
        Self {
            key: PositionKey::for_order(order),
            side: order.side.position_side(),
            quantity: exec.quantity,
            cost_basis: exec.quantity * exec.price,
            open_time: exec.executed_at,
            fills: vec![PositionFill::from_execution(order, exec)],
            existing_trade_id: None,
            asset_class: order.asset_class,
            touched: true,
        }
    }

    /// Rebuild a position from a persisted OPEN trade and its orders.
    ///
    /// `orders` may be missing entries; fills follow the trade's own order list.
    pub fn from_trade(trade: &Trade, orders: &[Order]) -> Self {
        let by_id: HashMap<OrderId, &Order> = orders.iter().map(|o| (o.id, o)).collect();
        let fills = trade
            .data
            .order_ids
            .iter()
            .filter_map(|id| by_id.get(id))
            .map(|order| PositionFill {
                order_id: order.id,
                side: order.side,
                quantity: order.quantity,
                price: order.price,
                executed_at: order.executed_at.unwrap_or(trade.data.open_time),
            })
            .collect();

        Self {
            key: PositionKey::new(trade.data.symbol.clone(), trade.data.broker.clone()),
            side: trade.data.side,
            quantity: trade.data.remaining_quantity,
            cost_basis: trade.data.remaining_quantity * trade.data.avg_entry_price,
            open_time: trade.data.open_time,
            fills,
            existing_trade_id: Some(trade.id),
            asset_class: trade.data.asset_class,
            touched: false,
        }
    }

    /// Add a same-direction order.
    pub fn accumulate(&mut self, order: &Order, exec: Execution) {
        self.quantity += exec.quantity;
        self.cost_basis += exec.quantity * exec.price;
        self.fills.push(PositionFill::from_execution(order, exec));
        self.touched = true;
    }

    /// Apply an opposing order no larger than the open quantity.
    pub fn reduce(&mut self, order: &Order, exec: Execution) {
        let average_cost = self.average_cost();
        self.quantity -= exec.quantity;
        self.cost_basis = self.quantity * average_cost;
        self.fills.push(PositionFill::from_execution(order, exec));
        self.touched = true;
    }

    /// Cost basis per unit of the open quantity.
    pub fn average_cost(&self) -> Decimal {
        self.cost_basis
            .checked_div(self.quantity)
            .unwrap_or_else(Decimal::zero)
    }

    pub fn is_flat(&self) -> bool {
        !self.quantity.is_positive()
    }

    pub fn order_ids(&self) -> Vec<OrderId> {
        self.fills.iter().map(|f| f.order_id).collect()
    }
}

/// Open positions of a single user for the duration of one run.
#[derive(Debug, Default)]
pub struct PositionTracker {
    positions: HashMap<PositionKey, OpenPosition>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a tracker with the user's OPEN trades so new orders update them
    /// instead of starting fresh trades.
    ///
    /// OPEN trades with nothing left to close, or a second OPEN trade for a key
    /// that is already tracked, are logged and left alone.
    pub async fn load_existing(
        store: &dyn TradeStore,
        user: &UserId,
    ) -> Result<Self, StoreError> {
        let mut tracker = Self::new();

        for trade in store.get_all_open_trades(user).await? {
            if !trade.data.remaining_quantity.is_positive() {
                warn!(
                    user = %user,
                    trade_id = %trade.id,
                    remaining = %trade.data.remaining_quantity,
                    "OPEN trade has no remaining quantity, skipping"
                );
                continue;
            }

            let orders = store.get_orders_by_ids(&trade.data.order_ids).await?;
            if orders.len() != trade.data.order_ids.len() {
                let found: HashSet<OrderId> = orders.iter().map(|o| o.id).collect();
                let missing: Vec<OrderId> = trade
                    .data
                    .order_ids
                    .iter()
                    .copied()
                    .filter(|id| !found.contains(id))
                    .collect();
                warn!(
                    user = %user,
                    trade_id = %trade.id,
                    ?missing,
                    "OPEN trade references orders that no longer exist"
                );
            }

            let position = OpenPosition::from_trade(&trade, &orders);
            if let Some(existing) = tracker.get(&position.key) {
                warn!(
                    user = %user,
                    key = %position.key,
                    trade_id = %trade.id,
                    kept_trade_id = ?existing.existing_trade_id,
                    "Multiple OPEN trades for one position, keeping the oldest"
                );
                continue;
            }

            debug!(
                user = %user,
                key = %position.key,
                trade_id = %trade.id,
                quantity = %position.quantity,
                "Loaded open position"
            );
            tracker.insert(position);
        }

        Ok(tracker)
    }

    pub fn get(&self, key: &PositionKey) -> Option<&OpenPosition> {
        self.positions.get(key)
    }

    pub fn get_mut(&mut self, key: &PositionKey) -> Option<&mut OpenPosition> {
        self.positions.get_mut(key)
    }

    /// Track a position under its own key, replacing any previous one.
    pub fn insert(&mut self, position: OpenPosition) -> Option<OpenPosition> {
        self.positions.insert(position.key.clone(), position)
    }

    pub fn remove(&mut self, key: &PositionKey) -> Option<OpenPosition> {
        self.positions.remove(key)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Drain all positions, oldest first (ties by key).
    pub fn into_positions(self) -> Vec<OpenPosition> {
        let mut positions: Vec<OpenPosition> = self.positions.into_values().collect();
        positions.sort_by(|a, b| (a.open_time, &a.key).cmp(&(b.open_time, &b.key)));
        positions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::domain::{
        HoldingPeriod, MarketSession, NewOrder, TradeData, TradeStatus,
    };

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn order(id: i64, side: Side, qty: &str, px: &str, time_ms: i64) -> Order {
        NewOrder::new(
            UserId::new("u1"),
            Symbol::new("AAPL"),
            side,
            d(qty),
            d(px),
            TimeMs::new(time_ms),
        )
        .into_order(OrderId(id))
    }

    fn apply_open(o: &Order) -> OpenPosition {
        OpenPosition::open(o, o.execution().unwrap())
    }

    #[test]
    fn test_open_accumulate_and_reduce() {
        let first = order(1, Side::Buy, "100", "10", 1000);
        let mut position = apply_open(&first);
        assert_eq!(position.side, PositionSide::Long);
        assert_eq!(position.cost_basis, d("1000"));

        let second = order(2, Side::Buy, "100", "11", 2000);
        position.accumulate(&second, second.execution().unwrap());
        assert_eq!(position.quantity, d("200"));
        assert_eq!(position.cost_basis, d("2100"));
        assert_eq!(position.average_cost(), d("10.5"));
        assert_eq!(position.open_time, TimeMs::new(1000));

        let close = order(3, Side::Sell, "50", "12", 3000);
        position.reduce(&close, close.execution().unwrap());
        assert_eq!(position.quantity, d("150"));
        assert_eq!(position.average_cost(), d("10.5"));
        assert_eq!(position.cost_basis, d("1575"));
        assert_eq!(position.order_ids(), vec![OrderId(1), OrderId(2), OrderId(3)]);
        assert!(!position.is_flat());
    }

    #[test]
    fn test_position_key_includes_broker() {
        let a = order(1, Side::Buy, "1", "10", 1000);
        let mut b = order(2, Side::Buy, "1", "10", 1000);
        b.broker = Some(BrokerId::new("schwab"));

        assert_ne!(PositionKey::for_order(&a), PositionKey::for_order(&b));
        assert_eq!(PositionKey::for_order(&b).to_string(), "AAPL@schwab");
    }

    #[test]
    fn test_into_positions_is_ordered_by_open_time() {
        let mut tracker = PositionTracker::new();
        let mut late = order(1, Side::Buy, "1", "10", 5000);
        late.symbol = Symbol::new("MSFT");
        tracker.insert(apply_open(&late));
        tracker.insert(apply_open(&order(2, Side::Buy, "1", "10", 1000)));

        let positions = tracker.into_positions();
        let symbols: Vec<&str> = positions.iter().map(|p| p.key.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);
    }

    fn open_trade_data(order_ids: Vec<OrderId>, remaining: &str) -> TradeData {
        TradeData {
            user: UserId::new("u1"),
            symbol: Symbol::new("AAPL"),
            side: PositionSide::Long,
            status: TradeStatus::Open,
            open_time: TimeMs::new(1000),
            close_time: None,
            avg_entry_price: d("10"),
            avg_exit_price: None,
            open_quantity: d(remaining),
            close_quantity: Decimal::zero(),
            total_quantity: d(remaining),
            remaining_quantity: d(remaining),
            pnl: Decimal::zero(),
            order_count: order_ids.len(),
            order_ids,
            holding_period: HoldingPeriod::Intraday,
            market_session: MarketSession::Regular,
            broker: None,
            asset_class: AssetClass::Equity,
        }
    }

    #[tokio::test]
    async fn test_load_existing_builds_positions_from_open_trades() {
        let store = MemoryStore::new();
        let buy = store.insert_order(NewOrder::new(
            UserId::new("u1"),
            Symbol::new("AAPL"),
            Side::Buy,
            d("100"),
            d("10"),
            TimeMs::new(1000),
        ));
        let trade = store.insert_trade(open_trade_data(vec![buy.id], "100"));

        let tracker = PositionTracker::load_existing(&store, &UserId::new("u1"))
            .await
            .unwrap();

        assert_eq!(tracker.len(), 1);
        let position = tracker
            .get(&PositionKey::new(Symbol::new("AAPL"), None))
            .unwrap();
        assert_eq!(position.existing_trade_id, Some(trade.id));
        assert_eq!(position.quantity, d("100"));
        assert_eq!(position.cost_basis, d("1000"));
        assert_eq!(position.order_ids(), vec![buy.id]);
        assert!(!position.touched);
    }

    #[tokio::test]
    async fn test_load_existing_skips_inconsistent_trades() {
        let store = MemoryStore::new();
        let first = store.insert_trade(open_trade_data(vec![], "100"));
        // Duplicate OPEN trade on the same key.
        store.insert_trade(open_trade_data(vec![], "50"));
        // OPEN trade with nothing remaining.
        let mut drained = open_trade_data(vec![], "0");
        drained.symbol = Symbol::new("MSFT");
        store.insert_trade(drained);

        let tracker = PositionTracker::load_existing(&store, &UserId::new("u1"))
            .await
            .unwrap();

        assert_eq!(tracker.len(), 1);
        let position = tracker
            .get(&PositionKey::new(Symbol::new("AAPL"), None))
            .unwrap();
        assert_eq!(position.existing_trade_id, Some(first.id));
    }
}
