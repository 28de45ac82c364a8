//! Trade reconstruction engine: positions, matching, splitting and finalization.
//!
//! Everything here except [`PositionTracker::load_existing`] and
//! [`OrderSplitter::split`] is pure, synchronous computation over one user's
//! orders. Storage happens through [`crate::db::TradeStore`].

use crate::domain::{TradeData, TradeId, TradeStatus};

pub mod finalizer;
pub mod matcher;
pub mod position_tracker;
pub mod splitter;

pub use finalizer::{holding_period, realized_pnl, weighted_average_price, TradeFinalizer};
pub use matcher::{MatchOutcome, OrderMatcher};
pub use position_tracker::{OpenPosition, PositionFill, PositionKey, PositionTracker};
pub use splitter::{OrderSplitter, SplitError, SplitOrders, SplitPlan};

/// A trade produced by a reconstruction run, not yet written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconstructedTrade {
    /// A trade opened during this run; to be inserted.
    New(TradeData),
    /// A previously persisted OPEN trade whose order set changed; to be updated in place.
    Existing { trade_id: TradeId, data: TradeData },
}

impl ReconstructedTrade {
    pub fn data(&self) -> &TradeData {
        match self {
            ReconstructedTrade::New(data) => data,
            ReconstructedTrade::Existing { data, .. } => data,
        }
    }

    /// Id of the stored trade this result updates, if any.
    pub fn trade_id(&self) -> Option<TradeId> {
        match self {
            ReconstructedTrade::New(_) => None,
            ReconstructedTrade::Existing { trade_id, .. } => Some(*trade_id),
        }
    }

    pub fn status(&self) -> TradeStatus {
        self.data().status
    }
}
