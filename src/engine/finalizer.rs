//! Derives trade records from positions.

use crate::domain::{
    Decimal, HoldingPeriod, MarketSession, PositionSide, TimeMs, TradeData, TradeStatus, UserId,
};
use crate::engine::{OpenPosition, PositionFill, ReconstructedTrade};
use chrono::Timelike;
use chrono_tz::Tz;

/// Trades closed within this many milliseconds of opening are intraday.
pub const INTRADAY_MAX_MS: i64 = 24 * 60 * 60 * 1000;

/// Regular session bounds, seconds after local midnight. Both ends inclusive.
const REGULAR_OPEN_SECS: u32 = 9 * 3600 + 30 * 60;
const REGULAR_CLOSE_SECS: u32 = 16 * 3600;

/// Turns an [`OpenPosition`] into the trade record that describes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeFinalizer {
    market_tz: Tz,
}

impl Default for TradeFinalizer {
    fn default() -> Self {
        Self::new(chrono_tz::America::New_York)
    }
}

impl TradeFinalizer {
    pub fn new(market_tz: Tz) -> Self {
        Self { market_tz }
    }

    pub fn market_tz(&self) -> Tz {
        self.market_tz
    }

    /// Build the trade for `position`, as an update when it came from storage.
    pub fn finalize(&self, user: &UserId, position: &OpenPosition) -> ReconstructedTrade {
        let data = self.trade_data(user, position);
        match position.existing_trade_id {
            Some(trade_id) => ReconstructedTrade::Existing { trade_id, data },
            None => ReconstructedTrade::New(data),
        }
    }

    /// Derive every trade field from the position's contributing orders.
    pub fn trade_data(&self, user: &UserId, position: &OpenPosition) -> TradeData {
        let opening_side = position.side.opening_side();
        let (opening, closing): (Vec<&PositionFill>, Vec<&PositionFill>) = position
            .fills
            .iter()
            .partition(|fill| fill.side == opening_side);

        let open_quantity: Decimal = opening.iter().map(|f| f.quantity).sum();
        let close_quantity: Decimal = closing.iter().map(|f| f.quantity).sum();
        let remaining_quantity = open_quantity - close_quantity;

        let avg_entry_price = weighted_average_price(opening.iter().copied())
            .unwrap_or_else(|| position.average_cost());
        let avg_exit_price = weighted_average_price(closing.iter().copied());

        let status = if remaining_quantity.is_positive() {
            TradeStatus::Open
        } else {
            TradeStatus::Closed
        };

        let (close_time, pnl) = match status {
            TradeStatus::Open => (None, Decimal::zero()),
            TradeStatus::Closed => {
                let close_time = closing.iter().map(|f| f.executed_at).max();
                let pnl = avg_exit_price
                    .map(|exit| realized_pnl(position.side, avg_entry_price, exit, close_quantity))
                    .unwrap_or_else(Decimal::zero);
                (close_time, pnl)
            }
        };

        TradeData {
            user: user.clone(),
            symbol: position.key.symbol.clone(),
            side: position.side,
            status,
            open_time: position.open_time,
            close_time,
            avg_entry_price,
            avg_exit_price,
            open_quantity,
            close_quantity,
            total_quantity: open_quantity + close_quantity,
            remaining_quantity,
            pnl,
            order_ids: position.order_ids(),
            order_count: position.fills.len(),
            holding_period: holding_period(position.open_time, close_time),
            market_session: self.market_session(position.open_time),
            broker: position.key.broker.clone(),
            asset_class: position.asset_class,
        }
    }

    /// Session of the exchange day `time` falls in, in the market's local time.
    pub fn market_session(&self, time: TimeMs) -> MarketSession {
        let local = time.to_datetime().with_timezone(&self.market_tz);
        let secs = local.num_seconds_from_midnight();
        if secs < REGULAR_OPEN_SECS {
            MarketSession::PreMarket
        } else if secs <= REGULAR_CLOSE_SECS {
            MarketSession::Regular
        } else {
            MarketSession::AfterHours
        }
    }
}

/// INTRADAY when the trade is still open or closed within 24 hours; SWING otherwise.
pub fn holding_period(open_time: TimeMs, close_time: Option<TimeMs>) -> HoldingPeriod {
    match close_time {
        Some(close) if close.as_i64() - open_time.as_i64() > INTRADAY_MAX_MS => HoldingPeriod::Swing,
        _ => HoldingPeriod::Intraday,
    }
}

/// Quantity-weighted mean price of the priced fills, `None` if there are none.
pub fn weighted_average_price<'a>(fills: impl IntoIterator<Item = &'a PositionFill>) -> Option<Decimal> {
    let (notional, quantity) = fills
        .into_iter()
        .filter_map(|f| f.price.map(|price| (price * f.quantity, f.quantity)))
        .fold((Decimal::zero(), Decimal::zero()), |(n, q), (fill_n, fill_q)| (n + fill_n, q + fill_q));
    notional.checked_div(quantity)
}

/// Realized P&L on `quantity` units, rounded to cents.
pub fn realized_pnl(side: PositionSide, entry: Decimal, exit: Decimal, quantity: Decimal) -> Decimal {
    let per_unit = match side {
        PositionSide::Long => exit - entry,
        PositionSide::Short => entry - exit,
    };
    (per_unit * quantity).round_dp(2)
}
