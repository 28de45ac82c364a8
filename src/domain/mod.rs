//! Domain types for trade reconstruction.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: TimeMs, UserId, Symbol, BrokerId, Side, PositionSide
//! - Order and Trade records
//! - Stable order ordering helper for deterministic matching

pub mod decimal;
pub mod order;
pub mod ordering;
pub mod primitives;
pub mod trade;

pub use decimal::Decimal;
pub use order::{Execution, InvalidOrder, NewOrder, Order};
pub use ordering::{sort_orders_deterministic, OrderOrderingKey};
pub use primitives::{
    AssetClass, BrokerId, OrderId, PositionSide, Side, Symbol, TimeMs, TradeId, UserId,
};
pub use trade::{HoldingPeriod, MarketSession, Trade, TradeData, TradeStatus};
