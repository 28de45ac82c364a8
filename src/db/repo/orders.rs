//! Order operations for the repository.

use super::{decode_decimal, decode_enum, decode_opt_decimal, placeholders, Repository};
use crate::db::StoreError;
use crate::domain::{
    sort_orders_deterministic, BrokerId, Decimal, NewOrder, Order, OrderId, Symbol, TimeMs,
    TradeId, UserId,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const ORDER_COLUMNS: &str = r#"
    id, user_id, symbol, side, quantity, price, executed_at_ms, cancelled_at_ms,
    broker_id, asset_class, import_batch, trade_id, split_from
"#;

fn order_from_row(row: &SqliteRow) -> Result<Order, StoreError> {
    let side: String = row.get("side");
    let quantity: String = row.get("quantity");
    let asset_class: String = row.get("asset_class");

    Ok(Order {
        id: OrderId(row.get("id")),
        user: UserId::new(row.get::<String, _>("user_id")),
        symbol: Symbol::new(row.get::<String, _>("symbol")),
        side: decode_enum("side", &side)?,
        quantity: decode_decimal("quantity", &quantity)?,
        price: decode_opt_decimal("price", row.get("price"))?,
        executed_at: row.get::<Option<i64>, _>("executed_at_ms").map(TimeMs::new),
        cancelled_at: row.get::<Option<i64>, _>("cancelled_at_ms").map(TimeMs::new),
        broker: row.get::<Option<String>, _>("broker_id").map(BrokerId::new),
        trade_id: row.get::<Option<i64>, _>("trade_id").map(TradeId),
        asset_class: decode_enum("asset_class", &asset_class)?,
        import_batch: row.get("import_batch"),
        split_from: row.get::<Option<i64>, _>("split_from").map(OrderId),
    })
}

impl Repository {
    /// Insert a single order and return it with its assigned id.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_order(&self, order: &NewOrder) -> Result<Order, StoreError> {
        let mut orders = self.insert_orders_batch(std::slice::from_ref(order)).await?;
        orders.pop().ok_or(StoreError::Db(sqlx::Error::RowNotFound))
    }

    /// Insert multiple orders in a single transaction.
    ///
    /// Ids are assigned in slice order, so orders sharing an execution time
    /// are later matched in the order given here.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_orders_batch(&self, orders: &[NewOrder]) -> Result<Vec<Order>, StoreError> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let created_at = chrono::Utc::now().timestamp_millis();
        let mut inserted = Vec::with_capacity(orders.len());
        let mut tx = self.pool.begin().await?;

        for order in orders {
            let result = sqlx::query(
                r#"
                INSERT INTO orders (
                    user_id, symbol, side, quantity, price, executed_at_ms, cancelled_at_ms,
                    broker_id, asset_class, import_batch, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(order.user.as_str())
            .bind(order.symbol.as_str())
            .bind(order.side.to_string())
            .bind(order.quantity.to_canonical_string())
            .bind(order.price.map(|p| p.to_canonical_string()))
            .bind(order.executed_at.map(|t| t.as_i64()))
            .bind(order.cancelled_at.map(|t| t.as_i64()))
            .bind(order.broker.as_ref().map(|b| b.as_str().to_string()))
            .bind(order.asset_class.as_str())
            .bind(order.import_batch.as_deref())
            .bind(created_at)
            .execute(&mut *tx)
            .await?;

            inserted.push(order.clone().into_order(OrderId(result.last_insert_rowid())));
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Orders awaiting reconstruction, ascending by execution time then id.
    pub(super) async fn query_unprocessed_orders(
        &self,
        user: &UserId,
    ) -> Result<Vec<Order>, StoreError> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE user_id = ?
              AND executed_at_ms IS NOT NULL
              AND cancelled_at_ms IS NULL
              AND trade_id IS NULL
            ORDER BY executed_at_ms ASC, COALESCE(split_from, id) ASC, id ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(user.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(order_from_row).collect()
    }

    /// Orders with the given ids, in matching order.
    pub(super) async fn query_orders_by_ids(
        &self,
        ids: &[OrderId],
    ) -> Result<Vec<Order>, StoreError> {
        let mut orders = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.link_chunk_size) {
            let sql = format!(
                "SELECT {ORDER_COLUMNS} FROM orders WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id.as_i64());
            }
            for row in query.fetch_all(&self.pool).await? {
                orders.push(order_from_row(&row)?);
            }
        }
        sort_orders_deterministic(&mut orders);
        Ok(orders)
    }

    /// All orders for a user, ascending by id.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn query_orders(&self, user: &UserId) -> Result<Vec<Order>, StoreError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = ? ORDER BY id ASC");
        let rows = sqlx::query(&sql)
            .bind(user.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(order_from_row).collect()
    }

    /// Replace order `id` with two copies carrying `first` and `second` as quantities.
    ///
    /// Both copies keep every other column and record the original in `split_from`.
    pub(super) async fn split_order_atomic(
        &self,
        id: OrderId,
        first: Decimal,
        second: Decimal,
    ) -> Result<(OrderId, OrderId), StoreError> {
        let mut tx = self.pool.begin().await?;

        let quantity: Option<String> = sqlx::query("SELECT quantity FROM orders WHERE id = ?")
            .bind(id.as_i64())
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.get("quantity"));
        let quantity = match quantity {
            Some(q) => decode_decimal("quantity", &q)?,
            None => return Err(StoreError::OrderNotFound(id)),
        };
        if first + second != quantity || !first.is_positive() || !second.is_positive() {
            return Err(StoreError::InvalidSplit {
                id,
                reason: format!("{} + {} does not split quantity {}", first, second, quantity),
            });
        }

        let created_at = chrono::Utc::now().timestamp_millis();
        let mut new_ids = Vec::with_capacity(2);
        for part in [first, second] {
            let result = sqlx::query(
                r#"
                INSERT INTO orders (
                    user_id, symbol, side, quantity, price, executed_at_ms, cancelled_at_ms,
                    broker_id, asset_class, import_batch, trade_id, split_from, created_at
                )
                SELECT user_id, symbol, side, ?, price, executed_at_ms, cancelled_at_ms,
                       broker_id, asset_class, import_batch, trade_id, COALESCE(split_from, id), ?
                FROM orders WHERE id = ?
                "#,
            )
            .bind(part.to_canonical_string())
            .bind(created_at)
            .bind(id.as_i64())
            .execute(&mut *tx)
            .await?;
            new_ids.push(OrderId(result.last_insert_rowid()));
        }

        sqlx::query("DELETE FROM orders WHERE id = ?")
            .bind(id.as_i64())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((new_ids[0], new_ids[1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_db, TradeStore};
    use crate::domain::{AssetClass, Side};

    async fn setup_repo() -> Repository {
        let pool = init_db(":memory:").await.expect("init_db failed");
        Repository::new(pool)
    }

    fn new_order(side: Side, qty: i64, time_ms: i64) -> NewOrder {
        NewOrder::new(
            UserId::new("u1"),
            Symbol::new("AAPL"),
            side,
            Decimal::from_i64(qty),
            Decimal::from_str_canonical("10.25").unwrap(),
            TimeMs::new(time_ms),
        )
    }

    #[tokio::test]
    async fn test_insert_and_query_orders() {
        let repo = setup_repo().await;

        let order = new_order(Side::Buy, 100, 1000)
            .with_broker(BrokerId::new("ibkr"))
            .with_asset_class(AssetClass::Option)
            .with_import_batch("batch-1");
        let inserted = repo.insert_order(&order).await.unwrap();

        let orders = repo.query_orders(&UserId::new("u1")).await.unwrap();
        assert_eq!(orders, vec![inserted.clone()]);
        assert_eq!(inserted.price, Some(Decimal::from_str_canonical("10.25").unwrap()));
        assert_eq!(inserted.broker, Some(BrokerId::new("ibkr")));
        assert_eq!(inserted.asset_class, AssetClass::Option);
    }

    #[tokio::test]
    async fn test_unprocessed_orders_excludes_cancelled_unexecuted_and_linked() {
        let repo = setup_repo().await;
        let user = UserId::new("u1");

        let orders = repo
            .insert_orders_batch(&[
                new_order(Side::Buy, 1, 2000),
                new_order(Side::Buy, 1, 1000),
                new_order(Side::Buy, 1, 1500).with_cancelled_at(TimeMs::new(1600)),
                new_order(Side::Buy, 1, 1200).without_execution_time(),
                new_order(Side::Sell, 1, 1000),
            ])
            .await
            .unwrap();

        let unprocessed = repo.get_unprocessed_orders(&user).await.unwrap();
        let ids: Vec<OrderId> = unprocessed.iter().map(|o| o.id).collect();
        // Same-time orders fall back to id order.
        assert_eq!(ids, vec![orders[1].id, orders[4].id, orders[0].id]);
    }

    #[tokio::test]
    async fn test_unprocessed_split_parts_sort_in_place_of_original() {
        let repo = setup_repo().await;
        let orders = repo
            .insert_orders_batch(&[
                new_order(Side::Buy, 1, 1000),
                new_order(Side::Sell, 2, 1000),
                new_order(Side::Buy, 1, 1000),
            ])
            .await
            .unwrap();

        let (closing, opening) = repo
            .split_order(orders[1].id, Decimal::from_i64(1), Decimal::from_i64(1))
            .await
            .unwrap();

        let unprocessed = repo
            .get_unprocessed_orders(&UserId::new("u1"))
            .await
            .unwrap();
        let ids: Vec<OrderId> = unprocessed.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![orders[0].id, closing, opening, orders[2].id]);
    }

    #[tokio::test]
    async fn test_split_order_atomic_replaces_row() {
        let repo = setup_repo().await;
        let original = repo
            .insert_order(&new_order(Side::Sell, 200, 1000).with_broker(BrokerId::new("ibkr")))
            .await
            .unwrap();

        let (a, b) = repo
            .split_order(original.id, Decimal::from_i64(100), Decimal::from_i64(100))
            .await
            .unwrap();

        let orders = repo.query_orders(&UserId::new("u1")).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].id, a);
        assert_eq!(orders[1].id, b);
        for part in &orders {
            assert_eq!(part.quantity, Decimal::from_i64(100));
            assert_eq!(part.split_from, Some(original.id));
            assert_eq!(part.broker, original.broker);
            assert_eq!(part.executed_at, original.executed_at);
        }
    }

    #[tokio::test]
    async fn test_split_order_rejects_bad_quantities_and_missing_order() {
        let repo = setup_repo().await;
        let original = repo
            .insert_order(&new_order(Side::Sell, 200, 1000))
            .await
            .unwrap();

        let err = repo
            .split_order(original.id, Decimal::from_i64(150), Decimal::from_i64(100))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSplit { .. }));

        let err = repo
            .split_order(original.id, Decimal::from_i64(200), Decimal::zero())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSplit { .. }));

        let err = repo
            .split_order(OrderId(999), Decimal::from_i64(1), Decimal::from_i64(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::OrderNotFound(OrderId(999))));

        assert_eq!(repo.query_orders(&UserId::new("u1")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_orders_by_ids_chunks() {
        let pool = init_db(":memory:").await.expect("init_db failed");
        let repo = Repository::new(pool).with_link_chunk_size(2);
        let batch: Vec<NewOrder> = (0..5).map(|i| new_order(Side::Buy, 1, 1000 + i)).collect();
        let inserted = repo.insert_orders_batch(&batch).await.unwrap();
        let ids: Vec<OrderId> = inserted.iter().map(|o| o.id).collect();

        let fetched = repo.get_orders_by_ids(&ids).await.unwrap();
        assert_eq!(fetched, inserted);
    }
}
