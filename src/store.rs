use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::money::PairName;
use crate::offer::{Offer, Side};
use crate::order::{Order, OrderKind, OrderStatus};
use crate::reversal_queue::ReversalQueue;
use crate::venues::Venues;

/// The relational store backing `orders`, `trade_history` and
/// `order_pairs`.
///
/// Grounded on `cryptotrader.commands.execute.get_db` (a sqlalchemy
/// engine with autoloaded table metadata) and `Order.save`/`Order.delete`
/// (hand-written insert-or-update/delete against the `orders` table).
/// Table schemas are owned externally; this store assumes they already
/// exist and only issues runtime-checked queries (no compile-time
/// `query!` macro, since no live database is reachable while building
/// this crate).
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

struct OrderRow {
    uuid: Uuid,
    id_on_venue: Option<String>,
    status: String,
    pair: String,
    side: String,
    price: f64,
    base: f64,
    quote: f64,
    venue: String,
    strategy: String,
    created_at: DateTime<Utc>,
    expired_at: Option<DateTime<Utc>>,
    executed_at: Option<DateTime<Utc>>,
}

fn status_to_str(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Created => "created",
        OrderStatus::Placed => "placed",
        OrderStatus::Rejected => "rejected",
        OrderStatus::Cancelled => "cancelled",
        OrderStatus::Fulfilled => "fulfilled",
    }
}

fn status_from_str(status: &str) -> OrderStatus {
    match status {
        "placed" => OrderStatus::Placed,
        "rejected" => OrderStatus::Rejected,
        "cancelled" => OrderStatus::Cancelled,
        "fulfilled" => OrderStatus::Fulfilled,
        _ => OrderStatus::Created,
    }
}

fn side_to_str(side: Side) -> &'static str {
    match side {
        Side::Ask => "ask",
        Side::Bid => "bid",
    }
}

fn side_from_str(side: &str) -> Side {
    if side == "bid" {
        Side::Bid
    } else {
        Side::Ask
    }
}

impl Store {
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(dsn).await?;
        Ok(Store { pool })
    }

    fn row_to_order(&self, row: OrderRow, fee: f64) -> Option<Order> {
        let offer = Offer::new(
            side_from_str(&row.side),
            PairName::parse(&row.pair),
            row.price,
            row.quote,
            row.venue,
            fee,
            row.created_at.timestamp_millis() as f64 / 1000.0,
        )?;
        Some(Order {
            uuid: Some(row.uuid),
            id_on_venue: row.id_on_venue,
            kind: OrderKind::Limit,
            offer,
            status: status_from_str(&row.status),
            strategy: row.strategy,
            created_at: row.created_at,
            executed_at: row.executed_at,
            expired_at: row.expired_at,
            commission: 0.0,
        })
    }

    /// Insert a new order row, or update the existing one if `order.uuid`
    /// is already set — mirrors `Order.save`'s insert-or-update behavior.
    pub async fn save_order(&self, order: &mut Order) -> Result<()> {
        match order.uuid {
            None => {
                let uuid: Uuid = sqlx::query(
                    "INSERT INTO orders \
                     (id_on_venue, status, pair, side, price, base, quote, venue, strategy, created_at, expired_at, executed_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING uuid",
                )
                .bind(&order.id_on_venue)
                .bind(status_to_str(order.status))
                .bind(order.offer.pair.to_string())
                .bind(side_to_str(order.offer.side))
                .bind(order.offer.price)
                .bind(order.base().amount)
                .bind(order.quote().amount)
                .bind(&order.offer.venue)
                .bind(&order.strategy)
                .bind(order.created_at)
                .bind(order.expired_at)
                .bind(order.executed_at)
                .fetch_one(&self.pool)
                .await?
                .get("uuid");
                order.uuid = Some(uuid);
            }
            Some(uuid) => {
                sqlx::query(
                    "UPDATE orders SET id_on_venue = $1, status = $2, pair = $3, side = $4, \
                     price = $5, base = $6, quote = $7, venue = $8, strategy = $9, \
                     expired_at = $10, executed_at = $11 WHERE uuid = $12",
                )
                .bind(&order.id_on_venue)
                .bind(status_to_str(order.status))
                .bind(order.offer.pair.to_string())
                .bind(side_to_str(order.offer.side))
                .bind(order.offer.price)
                .bind(order.base().amount)
                .bind(order.quote().amount)
                .bind(&order.offer.venue)
                .bind(&order.strategy)
                .bind(order.expired_at)
                .bind(order.executed_at)
                .bind(uuid)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    pub async fn delete_order(&self, order: &mut Order) -> Result<()> {
        let uuid = order
            .uuid
            .ok_or_else(|| Error::InconsistentState("order has no uuid".into()))?;
        sqlx::query("DELETE FROM orders WHERE uuid = $1")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        order.uuid = None;
        Ok(())
    }

    /// Every order currently in `placed` status, for the warm-up's
    /// dangling-order cancellation sweep.
    pub async fn placed_orders(&self, venues: &Venues) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT uuid, id_on_venue, status, pair, side, price, base, quote, venue, strategy, \
             created_at, expired_at, executed_at FROM orders WHERE status = 'placed'",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut orders = Vec::new();
        for row in rows {
            let order_row = OrderRow {
                uuid: row.get("uuid"),
                id_on_venue: row.get("id_on_venue"),
                status: row.get("status"),
                pair: row.get("pair"),
                side: row.get("side"),
                price: row.get("price"),
                base: row.get("base"),
                quote: row.get("quote"),
                venue: row.get("venue"),
                strategy: row.get("strategy"),
                created_at: row.get("created_at"),
                expired_at: row.get("expired_at"),
                executed_at: row.get("executed_at"),
            };
            let fee = venues.get(&order_row.venue).map(|v| v.fee).unwrap_or(0.0);
            if let Some(order) = self.row_to_order(order_row, fee) {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    /// Append one pair ticker snapshot to `trade_history`.
    pub async fn record_ticker(
        &self,
        venue: &str,
        pair: &str,
        bid: f64,
        ask: f64,
        bid_size: f64,
        ask_size: f64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO trade_history (venue, pair, bid, ask, bid_size, ask_size, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, now())",
        )
        .bind(venue)
        .bind(pair)
        .bind(bid)
        .bind(ask)
        .bind(bid_size)
        .bind(ask_size)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn reversal_queue(&self, venues: Arc<Venues>) -> PgReversalQueue {
        PgReversalQueue {
            pool: self.pool.clone(),
            venues,
        }
    }
}

/// Postgres-backed [`ReversalQueue`].
///
/// `pop` runs the same atomic "delete the oldest `order_pairs` row,
/// return the two joined `orders` rows" query as the original's
/// `PostgresQueue.pop`, including its "ensure the buy leg comes first"
/// swap.
pub struct PgReversalQueue {
    pool: PgPool,
    venues: Arc<Venues>,
}

#[async_trait]
impl ReversalQueue for PgReversalQueue {
    async fn push(&self, pair: (Order, Order)) -> Result<()> {
        let (left, right) = pair;
        let left_uuid = left.uuid.ok_or_else(|| Error::InconsistentState("order missing uuid".into()))?;
        let right_uuid = right
            .uuid
            .ok_or_else(|| Error::InconsistentState("order missing uuid".into()))?;
        sqlx::query(
            "INSERT INTO order_pairs (left_order_uuid, right_order_uuid, time) VALUES ($1, $2, now())",
        )
        .bind(left_uuid)
        .bind(right_uuid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pop(&self) -> Result<(Order, Order)> {
        let rows = sqlx::query(
            "WITH r AS ( \
                DELETE FROM order_pairs \
                WHERE uuid IN (SELECT uuid FROM order_pairs ORDER BY time LIMIT 1) \
                RETURNING * \
             ) \
             SELECT orders.* FROM orders \
             JOIN r ON orders.uuid IN (r.left_order_uuid, r.right_order_uuid) \
             ORDER BY orders.side",
        )
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(Error::QueueEmpty);
        }

        let mut orders: Vec<Order> = Vec::new();
        for row in &rows {
            let order_row = OrderRow {
                uuid: row.get("uuid"),
                id_on_venue: row.get("id_on_venue"),
                status: row.get("status"),
                pair: row.get("pair"),
                side: row.get("side"),
                price: row.get("price"),
                base: row.get("base"),
                quote: row.get("quote"),
                venue: row.get("venue"),
                strategy: row.get("strategy"),
                created_at: row.get("created_at"),
                expired_at: row.get("expired_at"),
                executed_at: row.get("executed_at"),
            };
            let fee = self.venues.get(&order_row.venue).map(|v| v.fee).unwrap_or(0.0);
            let store = Store { pool: self.pool.clone() };
            if let Some(order) = store.row_to_order(order_row, fee) {
                orders.push(order);
            }
        }

        if orders.len() != 2 {
            return Err(Error::InconsistentState(
                "reversal queue pop returned something other than a pair".into(),
            ));
        }
        let mut iter = orders.into_iter();
        let (first, second) = (iter.next().unwrap(), iter.next().unwrap());
        let (buy_order, sell_order) = if first.side() == crate::offer::OrderSide::Buy {
            (first, second)
        } else {
            (second, first)
        };
        Ok((buy_order, sell_order))
    }

    async fn length(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM order_pairs")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get("count");
        Ok(count as usize)
    }
}
