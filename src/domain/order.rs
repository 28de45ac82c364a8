//! Order type representing a single brokerage execution.

use crate::domain::{AssetClass, BrokerId, Decimal, OrderId, Side, Symbol, TimeMs, TradeId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A brokerage order execution as stored by the import pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Storage identifier.
    pub id: OrderId,
    /// Owner of the order.
    pub user: UserId,
    /// Instrument traded.
    pub symbol: Symbol,
    /// Buy or Sell.
    pub side: Side,
    /// Filled quantity (always positive for a valid order).
    pub quantity: Decimal,
    /// Average fill price. Missing for some broker exports.
    pub price: Option<Decimal>,
    /// Execution time. Missing for orders that never filled.
    pub executed_at: Option<TimeMs>,
    /// Cancellation time, if the order was cancelled.
    pub cancelled_at: Option<TimeMs>,
    /// Broker account the order was placed through.
    pub broker: Option<BrokerId>,
    /// Trade this order has been attributed to.
    pub trade_id: Option<TradeId>,
    pub asset_class: AssetClass,
    /// Import batch that brought this order in.
    pub import_batch: Option<String>,
    /// Original order this record was split from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_from: Option<OrderId>,
}

/// Reasons an order cannot take part in matching.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidOrder {
    #[error("order has no execution time")]
    MissingExecutionTime,
    #[error("order has no fill price")]
    MissingPrice,
    #[error("order quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),
}

/// The fields of an order that matching relies on, once validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execution {
    pub executed_at: TimeMs,
    pub price: Decimal,
    pub quantity: Decimal,
}

impl Order {
    /// Whether the order is still waiting to be attributed to a trade.
    pub fn is_unprocessed(&self) -> bool {
        self.executed_at.is_some() && self.cancelled_at.is_none() && self.trade_id.is_none()
    }

    /// Check the fields required for matching.
    pub fn execution(&self) -> Result<Execution, InvalidOrder> {
        let executed_at = self
            .executed_at
            .ok_or(InvalidOrder::MissingExecutionTime)?;
        let price = self.price.ok_or(InvalidOrder::MissingPrice)?;
        if !self.quantity.is_positive() {
            return Err(InvalidOrder::NonPositiveQuantity(self.quantity));
        }
        Ok(Execution {
            executed_at,
            price,
            quantity: self.quantity,
        })
    }

    /// Copy of this order under a new id and quantity, recording its lineage.
    pub fn split_part(&self, id: OrderId, quantity: Decimal) -> Order {
        Order {
            id,
            quantity,
            split_from: Some(self.split_from.unwrap_or(self.id)),
            ..self.clone()
        }
    }
}

/// An order that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub user: UserId,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub executed_at: Option<TimeMs>,
    pub cancelled_at: Option<TimeMs>,
    pub broker: Option<BrokerId>,
    pub asset_class: AssetClass,
    pub import_batch: Option<String>,
}

impl NewOrder {
    /// Create an executed, uncancelled order with no broker.
    pub fn new(
        user: UserId,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        executed_at: TimeMs,
    ) -> Self {
        NewOrder {
            user,
            symbol,
            side,
            quantity,
            price: Some(price),
            executed_at: Some(executed_at),
            cancelled_at: None,
            broker: None,
            asset_class: AssetClass::default(),
            import_batch: None,
        }
    }

    pub fn with_broker(mut self, broker: BrokerId) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_asset_class(mut self, asset_class: AssetClass) -> Self {
        self.asset_class = asset_class;
        self
    }

    pub fn with_import_batch(mut self, batch: impl Into<String>) -> Self {
        self.import_batch = Some(batch.into());
        self
    }

    pub fn with_cancelled_at(mut self, cancelled_at: TimeMs) -> Self {
        self.cancelled_at = Some(cancelled_at);
        self
    }

    pub fn without_price(mut self) -> Self {
        self.price = None;
        self
    }

    pub fn without_execution_time(mut self) -> Self {
        self.executed_at = None;
        self
    }

    /// Attach a storage id, producing an unlinked [`Order`].
    pub fn into_order(self, id: OrderId) -> Order {
        Order {
            id,
            user: self.user,
            symbol: self.symbol,
            side: self.side,
            quantity: self.quantity,
            price: self.price,
            executed_at: self.executed_at,
            cancelled_at: self.cancelled_at,
            broker: self.broker,
            trade_id: None,
            asset_class: self.asset_class,
            import_batch: self.import_batch,
            split_from: None,
        }
    }
}
