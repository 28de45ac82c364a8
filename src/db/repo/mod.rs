//! SQLite repository for orders and trades.
//!
//! Methods are organized across submodules by table:
//! - `orders.rs` - order reads, links and splits
//! - `trades.rs` - trade inserts/updates, including the transactional
//!   trade-plus-links writes

mod orders;
mod trades;

use super::{StoreError, TradeStore};
use crate::domain::{Decimal, Order, OrderId, Trade, TradeData, TradeId, UserId};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use std::str::FromStr;

/// Orders linked per UPDATE statement; keeps IN-lists under SQLite's variable limit.
pub const DEFAULT_LINK_CHUNK_SIZE: usize = 500;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
    link_chunk_size: usize,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository {
            pool,
            link_chunk_size: DEFAULT_LINK_CHUNK_SIZE,
        }
    }

    /// Override how many order ids are written per statement.
    pub fn with_link_chunk_size(mut self, chunk_size: usize) -> Self {
        self.link_chunk_size = chunk_size.max(1);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Link `ids` to `trade_id` in chunks. Runs on whatever connection or transaction it is given.
async fn link_orders(
    conn: &mut SqliteConnection,
    ids: &[OrderId],
    trade_id: TradeId,
    chunk_size: usize,
) -> Result<u64, sqlx::Error> {
    let mut linked = 0;
    for chunk in ids.chunks(chunk_size.max(1)) {
        let sql = format!(
            "UPDATE orders SET trade_id = ? WHERE id IN ({})",
            placeholders(chunk.len())
        );
        let mut query = sqlx::query(&sql).bind(trade_id.as_i64());
        for id in chunk {
            query = query.bind(id.as_i64());
        }
        linked += query.execute(&mut *conn).await?.rows_affected();
    }
    Ok(linked)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn decode_decimal(field: &'static str, raw: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(raw).map_err(|_| StoreError::Decode {
        field,
        value: raw.to_string(),
    })
}

fn decode_opt_decimal(field: &'static str, raw: Option<String>) -> Result<Option<Decimal>, StoreError> {
    raw.map(|s| decode_decimal(field, &s)).transpose()
}

fn decode_enum<T: FromStr>(field: &'static str, raw: &str) -> Result<T, StoreError> {
    raw.parse::<T>().map_err(|_| StoreError::Decode {
        field,
        value: raw.to_string(),
    })
}

#[async_trait]
impl TradeStore for Repository {
    async fn get_unprocessed_orders(&self, user: &UserId) -> Result<Vec<Order>, StoreError> {
        self.query_unprocessed_orders(user).await
    }

    async fn get_all_open_trades(&self, user: &UserId) -> Result<Vec<Trade>, StoreError> {
        self.query_open_trades(user).await
    }

    async fn get_orders_by_ids(&self, ids: &[OrderId]) -> Result<Vec<Order>, StoreError> {
        self.query_orders_by_ids(ids).await
    }

    async fn update_orders_with_trade_id(
        &self,
        ids: &[OrderId],
        trade_id: TradeId,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        link_orders(&mut conn, ids, trade_id, self.link_chunk_size).await?;
        Ok(())
    }

    async fn split_order(
        &self,
        id: OrderId,
        first: Decimal,
        second: Decimal,
    ) -> Result<(OrderId, OrderId), StoreError> {
        self.split_order_atomic(id, first, second).await
    }

    async fn save_trade(&self, data: &TradeData) -> Result<Trade, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let id = trades::insert_trade(&mut conn, data).await?;
        Ok(Trade::new(id, data.clone()))
    }

    async fn update_trade(&self, id: TradeId, data: &TradeData) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        trades::overwrite_trade(&mut conn, id, data).await
    }

    async fn save_trade_with_orders(&self, data: &TradeData) -> Result<Trade, StoreError> {
        let mut tx = self.pool.begin().await?;
        let id = trades::insert_trade(&mut tx, data).await?;
        link_orders(&mut tx, &data.order_ids, id, self.link_chunk_size).await?;
        tx.commit().await?;
        Ok(Trade::new(id, data.clone()))
    }

    async fn update_trade_with_orders(
        &self,
        id: TradeId,
        data: &TradeData,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        if !trades::overwrite_trade(&mut tx, id, data).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        link_orders(&mut tx, &data.order_ids, id, self.link_chunk_size).await?;
        tx.commit().await?;
        Ok(true)
    }
}
