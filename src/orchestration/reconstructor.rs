use crate::db::TradeStore;
use crate::domain::{sort_orders_deterministic, InvalidOrder, OrderId, TradeStatus, UserId};
use crate::engine::{
    MatchOutcome, OrderMatcher, OrderSplitter, PositionTracker, ReconstructedTrade, TradeFinalizer,
};
use crate::error::ReconstructionError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// An order left out of matching, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedOrder {
    pub order_id: OrderId,
    pub reason: InvalidOrder,
}

/// Result of matching one user's unprocessed orders; nothing written yet
/// except order splits.
#[derive(Debug, Clone)]
pub struct ReconstructionRun {
    pub run_id: Uuid,
    pub user: UserId,
    pub trades: Vec<ReconstructedTrade>,
    pub skipped: Vec<SkippedOrder>,
    /// Orders read from storage at the start of the run.
    pub orders_processed: usize,
    /// Reversing orders that were split.
    pub splits: usize,
}

impl ReconstructionRun {
    pub fn closed_trades(&self) -> usize {
        self.trades
            .iter()
            .filter(|t| t.status() == TradeStatus::Closed)
            .count()
    }

    pub fn open_trades(&self) -> usize {
        self.trades.len() - self.closed_trades()
    }
}

/// What [`Reconstructor::persist_trades`] wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistSummary {
    pub inserted: usize,
    pub updated: usize,
    /// Updates dropped because the stored trade no longer exists.
    pub skipped: usize,
    pub orders_linked: usize,
}

/// Rebuilds a user's trades from their unprocessed orders.
#[derive(Clone)]
pub struct Reconstructor {
    store: Arc<dyn TradeStore>,
    finalizer: TradeFinalizer,
}

impl Reconstructor {
    pub fn new(store: Arc<dyn TradeStore>, finalizer: TradeFinalizer) -> Self {
        Self { store, finalizer }
    }

    /// Match every unprocessed order of `user` against their open positions.
    ///
    /// Reversing orders are split in storage as they are met; everything else
    /// is left for [`Reconstructor::persist_trades`].
    ///
    /// # Errors
    /// Returns an error if storage fails or a split cannot be applied.
    pub async fn process_orders(
        &self,
        user: &UserId,
    ) -> Result<ReconstructionRun, ReconstructionError> {
        let run_id = Uuid::new_v4();
        let store = self.store.as_ref();

        let mut orders = store.get_unprocessed_orders(user).await?;
        sort_orders_deterministic(&mut orders);
        let tracker = PositionTracker::load_existing(store, user).await?;

        info!(
            %run_id,
            user = %user,
            orders = orders.len(),
            open_positions = tracker.len(),
            "Starting reconstruction"
        );

        let mut matcher = OrderMatcher::new(user.clone(), tracker, self.finalizer);
        let mut skipped = Vec::new();
        let mut splits = 0;

        for order in &orders {
            match matcher.apply(order) {
                MatchOutcome::Skipped(reason) => skipped.push(SkippedOrder {
                    order_id: order.id,
                    reason,
                }),
                MatchOutcome::SplitRequired(plan) => {
                    let parts = OrderSplitter::split(store, order, &plan).await?;
                    splits += 1;
                    let closed = matcher.apply(&parts.closing);
                    let opened = matcher.apply(&parts.opening);
                    if closed != MatchOutcome::Closed || opened != MatchOutcome::Opened {
                        return Err(ReconstructionError::SplitNotApplied { order_id: order.id });
                    }
                }
                outcome => {
                    debug!(%run_id, order_id = %order.id, ?outcome, "Applied order");
                }
            }
        }

        let run = ReconstructionRun {
            run_id,
            user: user.clone(),
            trades: matcher.finish(),
            skipped,
            orders_processed: orders.len(),
            splits,
        };

        info!(
            %run_id,
            user = %user,
            closed = run.closed_trades(),
            open = run.open_trades(),
            skipped = run.skipped.len(),
            splits,
            "Matched orders"
        );

        Ok(run)
    }

    /// Write the run's trades and link their orders.
    ///
    /// # Errors
    /// Returns an error on the first storage failure; trades written before it stay written.
    pub async fn persist_trades(
        &self,
        run: &ReconstructionRun,
    ) -> Result<PersistSummary, ReconstructionError> {
        let mut summary = PersistSummary::default();

        for trade in &run.trades {
            match trade {
                ReconstructedTrade::New(data) => {
                    let saved = self.store.save_trade_with_orders(data).await?;
                    debug!(
                        run_id = %run.run_id,
                        trade_id = %saved.id,
                        symbol = %data.symbol,
                        status = %data.status,
                        "Inserted trade"
                    );
                    summary.inserted += 1;
                    summary.orders_linked += data.order_ids.len();
                }
                ReconstructedTrade::Existing { trade_id, data } => {
                    if self.store.update_trade_with_orders(*trade_id, data).await? {
                        debug!(
                            run_id = %run.run_id,
                            trade_id = %trade_id,
                            symbol = %data.symbol,
                            status = %data.status,
                            "Updated trade"
                        );
                        summary.updated += 1;
                        summary.orders_linked += data.order_ids.len();
                    } else {
                        warn!(
                            run_id = %run.run_id,
                            user = %run.user,
                            trade_id = %trade_id,
                            symbol = %data.symbol,
                            "Trade to update no longer exists, skipping"
                        );
                        summary.skipped += 1;
                    }
                }
            }
        }

        info!(
            run_id = %run.run_id,
            user = %run.user,
            inserted = summary.inserted,
            updated = summary.updated,
            skipped = summary.skipped,
            orders_linked = summary.orders_linked,
            "Persisted trades"
        );

        Ok(summary)
    }

    /// Match and persist in one go.
    ///
    /// # Errors
    /// Returns an error if either step fails.
    pub async fn run(
        &self,
        user: &UserId,
    ) -> Result<(ReconstructionRun, PersistSummary), ReconstructionError> {
        let run = self.process_orders(user).await?;
        let summary = self.persist_trades(&run).await?;
        Ok((run, summary))
    }
}
