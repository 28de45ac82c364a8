//! Trade operations for the repository.

use super::{decode_decimal, decode_enum, decode_opt_decimal, Repository};
use crate::db::StoreError;
use crate::domain::{
    BrokerId, OrderId, Symbol, TimeMs, Trade, TradeData, TradeId, TradeStatus, UserId,
};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

const TRADE_COLUMNS: &str = r#"
    id, user_id, symbol, side, status, open_time_ms, close_time_ms,
    avg_entry_price, avg_exit_price, open_quantity, close_quantity, total_quantity,
    remaining_quantity, pnl, order_ids, order_count, holding_period, market_session,
    broker_id, asset_class
"#;

fn trade_from_row(row: &SqliteRow) -> Result<Trade, StoreError> {
    let text = |name: &str| -> String { row.get(name) };
    let order_ids: Vec<OrderId> = serde_json::from_str(&text("order_ids"))?;
    let order_count: i64 = row.get("order_count");

    let data = TradeData {
        user: UserId::new(text("user_id")),
        symbol: Symbol::new(text("symbol")),
        side: decode_enum("side", &text("side"))?,
        status: decode_enum("status", &text("status"))?,
        open_time: TimeMs::new(row.get("open_time_ms")),
        close_time: row.get::<Option<i64>, _>("close_time_ms").map(TimeMs::new),
        avg_entry_price: decode_decimal("avg_entry_price", &text("avg_entry_price"))?,
        avg_exit_price: decode_opt_decimal("avg_exit_price", row.get("avg_exit_price"))?,
        open_quantity: decode_decimal("open_quantity", &text("open_quantity"))?,
        close_quantity: decode_decimal("close_quantity", &text("close_quantity"))?,
        total_quantity: decode_decimal("total_quantity", &text("total_quantity"))?,
        remaining_quantity: decode_decimal("remaining_quantity", &text("remaining_quantity"))?,
        pnl: decode_decimal("pnl", &text("pnl"))?,
        order_ids,
        order_count: usize::try_from(order_count).map_err(|_| StoreError::Decode {
            field: "order_count",
            value: order_count.to_string(),
        })?,
        holding_period: decode_enum("holding_period", &text("holding_period"))?,
        market_session: decode_enum("market_session", &text("market_session"))?,
        broker: row.get::<Option<String>, _>("broker_id").map(BrokerId::new),
        asset_class: decode_enum("asset_class", &text("asset_class"))?,
    };

    Ok(Trade::new(TradeId(row.get("id")), data))
}

/// Insert a trade row on the given connection and return its id.
pub(super) async fn insert_trade(
    conn: &mut SqliteConnection,
    data: &TradeData,
) -> Result<TradeId, StoreError> {
    let now = chrono::Utc::now().timestamp_millis();
    let order_ids = serde_json::to_string(&data.order_ids)?;

    let result = sqlx::query(
        r#"
        INSERT INTO trades (
            user_id, symbol, side, status, open_time_ms, close_time_ms,
            avg_entry_price, avg_exit_price, open_quantity, close_quantity, total_quantity,
            remaining_quantity, pnl, order_ids, order_count, holding_period, market_session,
            broker_id, asset_class, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(data.user.as_str())
    .bind(data.symbol.as_str())
    .bind(data.side.to_string())
    .bind(data.status.as_str())
    .bind(data.open_time.as_i64())
    .bind(data.close_time.map(|t| t.as_i64()))
    .bind(data.avg_entry_price.to_canonical_string())
    .bind(data.avg_exit_price.map(|p| p.to_canonical_string()))
    .bind(data.open_quantity.to_canonical_string())
    .bind(data.close_quantity.to_canonical_string())
    .bind(data.total_quantity.to_canonical_string())
    .bind(data.remaining_quantity.to_canonical_string())
    .bind(data.pnl.to_canonical_string())
    .bind(order_ids)
    .bind(data.order_count as i64)
    .bind(data.holding_period.as_str())
    .bind(data.market_session.as_str())
    .bind(data.broker.as_ref().map(|b| b.as_str().to_string()))
    .bind(data.asset_class.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(TradeId(result.last_insert_rowid()))
}

/// Overwrite every derived column of trade `id`. Returns `false` if it does not exist.
pub(super) async fn overwrite_trade(
    conn: &mut SqliteConnection,
    id: TradeId,
    data: &TradeData,
) -> Result<bool, StoreError> {
    let order_ids = serde_json::to_string(&data.order_ids)?;

    let result = sqlx::query(
        r#"
        UPDATE trades SET
            user_id = ?, symbol = ?, side = ?, status = ?, open_time_ms = ?, close_time_ms = ?,
            avg_entry_price = ?, avg_exit_price = ?, open_quantity = ?, close_quantity = ?,
            total_quantity = ?, remaining_quantity = ?, pnl = ?, order_ids = ?, order_count = ?,
            holding_period = ?, market_session = ?, broker_id = ?, asset_class = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(data.user.as_str())
    .bind(data.symbol.as_str())
    .bind(data.side.to_string())
    .bind(data.status.as_str())
    .bind(data.open_time.as_i64())
    .bind(data.close_time.map(|t| t.as_i64()))
    .bind(data.avg_entry_price.to_canonical_string())
    .bind(data.avg_exit_price.map(|p| p.to_canonical_string()))
    .bind(data.open_quantity.to_canonical_string())
    .bind(data.close_quantity.to_canonical_string())
    .bind(data.total_quantity.to_canonical_string())
    .bind(data.remaining_quantity.to_canonical_string())
    .bind(data.pnl.to_canonical_string())
    .bind(order_ids)
    .bind(data.order_count as i64)
    .bind(data.holding_period.as_str())
    .bind(data.market_session.as_str())
    .bind(data.broker.as_ref().map(|b| b.as_str().to_string()))
    .bind(data.asset_class.as_str())
    .bind(chrono::Utc::now().timestamp_millis())
    .bind(id.as_i64())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

impl Repository {
    /// OPEN trades for a user, oldest first.
    pub(super) async fn query_open_trades(&self, user: &UserId) -> Result<Vec<Trade>, StoreError> {
        let sql = format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE user_id = ? AND status = ? ORDER BY open_time_ms ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(user.as_str())
            .bind(TradeStatus::Open.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(trade_from_row).collect()
    }

    /// All trades for a user, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn query_trades(&self, user: &UserId) -> Result<Vec<Trade>, StoreError> {
        let sql = format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE user_id = ? ORDER BY open_time_ms ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(user.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(trade_from_row).collect()
    }
}
