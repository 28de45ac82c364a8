//! FIFO matching of orders against open positions.

use crate::domain::{Decimal, InvalidOrder, Order, UserId};
use crate::engine::{
    OpenPosition, PositionKey, PositionTracker, ReconstructedTrade, SplitPlan, TradeFinalizer,
};
use tracing::{debug, warn};

/// What applying a single order did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The order cannot be matched; nothing changed.
    Skipped(InvalidOrder),
    /// A new position was opened.
    Opened,
    /// The order added to a same-direction position.
    Accumulated,
    /// The order reduced a position that stays open.
    PartiallyClosed { remaining: Decimal },
    /// The order closed a position exactly; its trade is complete.
    Closed,
    /// The order is larger than the position it opposes and must be split
    /// first. Nothing changed.
    SplitRequired(SplitPlan),
}

/// Applies one user's orders, in sequence, to that user's positions.
#[derive(Debug)]
pub struct OrderMatcher {
    user: UserId,
    tracker: PositionTracker,
    finalizer: TradeFinalizer,
    completed: Vec<ReconstructedTrade>,
}

impl OrderMatcher {
    pub fn new(user: UserId, tracker: PositionTracker, finalizer: TradeFinalizer) -> Self {
        Self {
            user,
            tracker,
            finalizer,
            completed: Vec::new(),
        }
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    /// Apply `order` to the position for its symbol and broker.
    ///
    /// Orders must be fed in execution order. When the result is
    /// [`MatchOutcome::SplitRequired`] the caller splits the order and applies
    /// the closing part, then the opening part.
    pub fn apply(&mut self, order: &Order) -> MatchOutcome {
        let exec = match order.execution() {
            Ok(exec) => exec,
            Err(reason) => {
                warn!(
                    user = %self.user,
                    order_id = %order.id,
                    symbol = %order.symbol,
                    %reason,
                    "Skipping unmatchable order"
                );
                return MatchOutcome::Skipped(reason);
            }
        };

        let key = PositionKey::for_order(order);
        let Some(position) = self.tracker.get_mut(&key) else {
            debug!(order_id = %order.id, %key, side = %order.side, "Opening position");
            self.tracker.insert(OpenPosition::open(order, exec));
            return MatchOutcome::Opened;
        };

        if position.side == order.side.position_side() {
            position.accumulate(order, exec);
            return MatchOutcome::Accumulated;
        }

        let closing_quantity = exec.quantity.min(position.quantity);
        let opening_quantity = exec.quantity - closing_quantity;
        if opening_quantity.is_positive() {
            debug!(
                order_id = %order.id,
                %key,
                %closing_quantity,
                %opening_quantity,
                "Order reverses position"
            );
            return MatchOutcome::SplitRequired(SplitPlan {
                order_id: order.id,
                closing_quantity,
                opening_quantity,
            });
        }

        position.reduce(order, exec);
        if !position.is_flat() {
            return MatchOutcome::PartiallyClosed {
                remaining: position.quantity,
            };
        }

        if let Some(closed) = self.tracker.remove(&key) {
            debug!(%key, orders = closed.fills.len(), "Position closed");
            self.completed.push(self.finalizer.finalize(&self.user, &closed));
        }
        MatchOutcome::Closed
    }

    /// Finish the run: closed trades in closing order, then every position
    /// still open that is new or was changed by this run.
    ///
    /// Positions loaded from storage that no order touched produce nothing.
    pub fn finish(self) -> Vec<ReconstructedTrade> {
        let Self {
            user,
            tracker,
            finalizer,
            mut completed,
        } = self;

        completed.extend(
            tracker
                .into_positions()
                .into_iter()
                .filter(|p| p.existing_trade_id.is_none() || p.touched)
                .map(|p| finalizer.finalize(&user, &p)),
        );
        completed
    }
}
