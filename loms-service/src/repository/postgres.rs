use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Timestamptz};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared::OrderItem;

use super::{OrderRepository, OutboxRepository, Repositories, StockRepository};
use crate::errors::{storage, LomsError};
use crate::models::*;
use crate::schema::*;

impl Repositories<AsyncPgConnection> {
    pub fn postgres() -> Self {
        Self {
            stocks: Arc::new(PgStockRepository),
            orders: Arc::new(PgOrderRepository),
            outbox: Arc::new(PgOutboxRepository),
        }
    }
}

const AVAILABLE_STOCKS_QUERY: &str = r#"
SELECT s.warehouse_id,
       (s.count - COALESCE((
            SELECT SUM(r.count)
              FROM reservations r
             WHERE r.sku = s.sku
               AND r.warehouse_id = s.warehouse_id
               AND r.active_until > $2
       ), 0))::BIGINT AS available
  FROM stocks s
 WHERE s.sku = $1
 ORDER BY s.warehouse_id
"#;

#[derive(Debug, QueryableByName)]
struct AvailableStockRow {
    #[diesel(sql_type = BigInt)]
    warehouse_id: i64,
    #[diesel(sql_type = BigInt)]
    available: i64,
}

pub struct PgStockRepository;

#[async_trait]
impl StockRepository for PgStockRepository {
    type Conn = AsyncPgConnection;

    async fn available_stocks(
        &self,
        conn: &mut AsyncPgConnection,
        sku: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Stock>, LomsError> {
        let rows = diesel::sql_query(AVAILABLE_STOCKS_QUERY)
            .bind::<BigInt, _>(i64::from(sku))
            .bind::<Timestamptz, _>(now)
            .load::<AvailableStockRow>(conn)
            .await
            .map_err(storage("load available stocks"))?;

        Ok(rows
            .into_iter()
            .map(|row| Stock {
                sku,
                warehouse_id: row.warehouse_id,
                count: row.available.max(0) as u64,
            })
            .collect())
    }

    async fn make_reservation(
        &self,
        conn: &mut AsyncPgConnection,
        reservation: &Reservation,
    ) -> Result<(), LomsError> {
        let row = DbReservation::from(reservation);
        diesel::insert_into(reservations::table)
            .values(&row)
            .on_conflict((
                reservations::order_id,
                reservations::sku,
                reservations::warehouse_id,
            ))
            .do_update()
            .set((
                reservations::count.eq(reservations::count + row.count),
                reservations::active_until.eq(row.active_until),
            ))
            .execute(conn)
            .await
            .map_err(storage("make reservation"))?;
        Ok(())
    }

    async fn reservations_for_order(
        &self,
        conn: &mut AsyncPgConnection,
        order_id: i64,
    ) -> Result<Vec<Reservation>, LomsError> {
        let rows = reservations::table
            .filter(reservations::order_id.eq(order_id))
            .order((reservations::sku.asc(), reservations::warehouse_id.asc()))
            .load::<DbReservation>(conn)
            .await
            .map_err(storage("load reservations"))?;
        Ok(rows.into_iter().map(Reservation::from).collect())
    }

    async fn delete_reservations_for_order(
        &self,
        conn: &mut AsyncPgConnection,
        order_id: i64,
    ) -> Result<u64, LomsError> {
        let deleted =
            diesel::delete(reservations::table.filter(reservations::order_id.eq(order_id)))
                .execute(conn)
                .await
                .map_err(storage("delete order reservations"))?;
        Ok(deleted as u64)
    }

    async fn delete_stale_reservations(
        &self,
        conn: &mut AsyncPgConnection,
        now: DateTime<Utc>,
    ) -> Result<u64, LomsError> {
        let deleted =
            diesel::delete(reservations::table.filter(reservations::active_until.le(now)))
                .execute(conn)
                .await
                .map_err(storage("delete stale reservations"))?;
        Ok(deleted as u64)
    }

    async fn ship_stock(
        &self,
        conn: &mut AsyncPgConnection,
        sku: u32,
        warehouse_id: i64,
        count: u64,
    ) -> Result<(), LomsError> {
        let sku = i64::from(sku);
        let count = count as i64;
        let updated = diesel::update(
            stocks::table
                .filter(stocks::sku.eq(sku))
                .filter(stocks::warehouse_id.eq(warehouse_id))
                .filter(stocks::count.ge(count)),
        )
        .set(stocks::count.eq(stocks::count - count))
        .execute(conn)
        .await
        .map_err(storage("ship stock"))?;
        if updated == 0 {
            return Err(LomsError::InsufficientStocks);
        }

        diesel::delete(
            stocks::table
                .filter(stocks::sku.eq(sku))
                .filter(stocks::warehouse_id.eq(warehouse_id))
                .filter(stocks::count.eq(0)),
        )
        .execute(conn)
        .await
        .map_err(storage("delete empty stock"))?;
        Ok(())
    }
}

pub struct PgOrderRepository;

#[async_trait]
impl OrderRepository for PgOrderRepository {
    type Conn = AsyncPgConnection;

    async fn create_order(
        &self,
        conn: &mut AsyncPgConnection,
        user: i64,
        items: &[OrderItem],
    ) -> Result<i64, LomsError> {
        let order_id = diesel::insert_into(orders::table)
            .values(&NewDbOrder {
                user_id: user,
                status: OrderStatus::New.code(),
            })
            .returning(orders::order_id)
            .get_result::<i64>(conn)
            .await
            .map_err(storage("insert order"))?;

        if !items.is_empty() {
            let rows: Vec<DbOrderItem> = items
                .iter()
                .enumerate()
                .map(|(position, item)| DbOrderItem {
                    order_id,
                    position: position as i32,
                    sku: i64::from(item.sku),
                    count: i32::from(item.count),
                })
                .collect();
            diesel::insert_into(order_items::table)
                .values(&rows)
                .execute(conn)
                .await
                .map_err(storage("insert order items"))?;
        }

        Ok(order_id)
    }

    async fn get_order(
        &self,
        conn: &mut AsyncPgConnection,
        order_id: i64,
    ) -> Result<Order, LomsError> {
        let order = orders::table
            .find(order_id)
            .first::<DbOrder>(conn)
            .await
            .optional()
            .map_err(storage("load order"))?
            .ok_or(LomsError::OrderNotFound(order_id))?;

        let items = order_items::table
            .filter(order_items::order_id.eq(order_id))
            .order(order_items::position.asc())
            .load::<DbOrderItem>(conn)
            .await
            .map_err(storage("load order items"))?;

        order.into_order(items)
    }

    async fn set_order_status(
        &self,
        conn: &mut AsyncPgConnection,
        order_id: i64,
        status: OrderStatus,
    ) -> Result<(), LomsError> {
        diesel::update(orders::table.find(order_id))
            .set(orders::status.eq(status.code()))
            .execute(conn)
            .await
            .map_err(storage("update order status"))?;
        Ok(())
    }

    async fn fail_unpaid_orders(
        &self,
        conn: &mut AsyncPgConnection,
        created_before: DateTime<Utc>,
    ) -> Result<u64, LomsError> {
        let updated = diesel::update(
            orders::table
                .filter(orders::status.eq(OrderStatus::AwaitingPayment.code()))
                .filter(orders::created_at.le(created_before)),
        )
        .set(orders::status.eq(OrderStatus::Failed.code()))
        .execute(conn)
        .await
        .map_err(storage("fail unpaid orders"))?;
        Ok(updated as u64)
    }
}

pub struct PgOutboxRepository;

#[async_trait]
impl OutboxRepository for PgOutboxRepository {
    type Conn = AsyncPgConnection;

    async fn add_message(
        &self,
        conn: &mut AsyncPgConnection,
        key: &str,
        message: &str,
    ) -> Result<(), LomsError> {
        diesel::insert_into(outbox::table)
            .values(&NewDbOutboxMessage { key, message })
            .execute(conn)
            .await
            .map_err(storage("insert outbox message"))?;
        Ok(())
    }

    async fn pending_messages(
        &self,
        conn: &mut AsyncPgConnection,
    ) -> Result<Vec<OutboxMessage>, LomsError> {
        let rows = outbox::table
            .order(outbox::msg_id.asc())
            .load::<DbOutboxMessage>(conn)
            .await
            .map_err(storage("load outbox"))?;
        Ok(rows.into_iter().map(OutboxMessage::from).collect())
    }

    async fn delete_message(
        &self,
        conn: &mut AsyncPgConnection,
        msg_id: i64,
    ) -> Result<(), LomsError> {
        diesel::delete(outbox::table.find(msg_id))
            .execute(conn)
            .await
            .map_err(storage("delete outbox message"))?;
        Ok(())
    }
}
