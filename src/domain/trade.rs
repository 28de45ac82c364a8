//! Trade record produced by reconstruction, plus its classifications.

use crate::domain::{
    AssetClass, BrokerId, Decimal, OrderId, PositionSide, Symbol, TimeMs, TradeId, UserId,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Open,
    Closed,
}

/// Holding-period classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldingPeriod {
    /// Closed within 24 hours of opening (or still open).
    Intraday,
    /// Held longer than 24 hours.
    Swing,
}

/// Market session the trade was opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketSession {
    PreMarket,
    Regular,
    AfterHours,
}

macro_rules! db_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Storage representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($ty), ": {}"), other)),
                }
            }
        }
    };
}

db_enum!(TradeStatus { Open => "OPEN", Closed => "CLOSED" });
db_enum!(HoldingPeriod { Intraday => "INTRADAY", Swing => "SWING" });
db_enum!(MarketSession {
    PreMarket => "PRE_MARKET",
    Regular => "REGULAR",
    AfterHours => "AFTER_HOURS",
});

/// Every field of a trade except its storage id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeData {
    pub user: UserId,
    pub symbol: Symbol,
    pub side: PositionSide,
    pub status: TradeStatus,
    pub open_time: TimeMs,
    /// Time of the final closing order. `None` while open.
    pub close_time: Option<TimeMs>,
    pub avg_entry_price: Decimal,
    /// `None` when no closing order has executed yet.
    pub avg_exit_price: Option<Decimal>,
    pub open_quantity: Decimal,
    pub close_quantity: Decimal,
    /// Sum of all order quantities in the trade.
    pub total_quantity: Decimal,
    /// `open_quantity - close_quantity`; zero once closed.
    pub remaining_quantity: Decimal,
    /// Realized P&L rounded to cents. Zero while open.
    pub pnl: Decimal,
    /// Orders composing the trade, in execution order.
    pub order_ids: Vec<OrderId>,
    pub order_count: usize,
    pub holding_period: HoldingPeriod,
    pub market_session: MarketSession,
    pub broker: Option<BrokerId>,
    pub asset_class: AssetClass,
}

impl TradeData {
    pub fn is_closed(&self) -> bool {
        self.status == TradeStatus::Closed
    }
}

/// A persisted trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    #[serde(flatten)]
    pub data: TradeData,
}

impl Trade {
    pub fn new(id: TradeId, data: TradeData) -> Self {
        Trade { id, data }
    }
}
