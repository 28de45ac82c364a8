//! Persistence for orders and trades.
//!
//! This module provides:
//! - The `TradeStore` trait the reconstruction engine talks to
//! - A SQLite implementation (`Repository`) with schema initialization
//! - An in-memory implementation (`MemoryStore`) for tests and dry runs

pub mod memory;
pub mod migrations;
pub mod repo;

pub use memory::MemoryStore;
pub use migrations::init_db;
pub use repo::Repository;

use crate::domain::{Decimal, Order, OrderId, Trade, TradeData, TradeId, UserId};
use async_trait::async_trait;
use thiserror::Error;

/// Storage operations consumed by the reconstruction engine.
///
/// Every call is awaited sequentially by a single run; implementations do not
/// need to coordinate concurrent runs for the same user.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Orders for `user` that are executed, not cancelled and not yet linked
    /// to a trade, ascending by execution time then id.
    async fn get_unprocessed_orders(&self, user: &UserId) -> Result<Vec<Order>, StoreError>;

    /// Trades for `user` whose status is OPEN.
    async fn get_all_open_trades(&self, user: &UserId) -> Result<Vec<Trade>, StoreError>;

    /// Orders with the given ids. Unknown ids are omitted.
    async fn get_orders_by_ids(&self, ids: &[OrderId]) -> Result<Vec<Order>, StoreError>;

    /// Point every listed order at `trade_id`.
    async fn update_orders_with_trade_id(
        &self,
        ids: &[OrderId],
        trade_id: TradeId,
    ) -> Result<(), StoreError>;

    /// Atomically replace order `id` with two copies carrying `first` and
    /// `second` as quantities. Returns the ids of the two new records.
    async fn split_order(
        &self,
        id: OrderId,
        first: Decimal,
        second: Decimal,
    ) -> Result<(OrderId, OrderId), StoreError>;

    /// Insert a new trade.
    async fn save_trade(&self, data: &TradeData) -> Result<Trade, StoreError>;

    /// Overwrite an existing trade. Returns `false` when no such trade exists.
    async fn update_trade(&self, id: TradeId, data: &TradeData) -> Result<bool, StoreError>;

    /// Insert a trade and link its orders to it.
    ///
    /// The default composes `save_trade` and `update_orders_with_trade_id`;
    /// stores with transactions should override it so both land together.
    async fn save_trade_with_orders(&self, data: &TradeData) -> Result<Trade, StoreError> {
        let trade = self.save_trade(data).await?;
        self.update_orders_with_trade_id(&data.order_ids, trade.id)
            .await?;
        Ok(trade)
    }

    /// Update a trade and link its orders to it. Returns `false` (and links
    /// nothing) when the trade does not exist.
    async fn update_trade_with_orders(
        &self,
        id: TradeId,
        data: &TradeData,
    ) -> Result<bool, StoreError> {
        if !self.update_trade(id, data).await? {
            return Ok(false);
        }
        self.update_orders_with_trade_id(&data.order_ids, id).await?;
        Ok(true)
    }
}

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error("failed to encode order list: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid {field} value in storage: {value}")]
    Decode { field: &'static str, value: String },
    #[error("order {0} not found")]
    OrderNotFound(OrderId),
    #[error("invalid split of order {id}: {reason}")]
    InvalidSplit { id: OrderId, reason: String },
}
