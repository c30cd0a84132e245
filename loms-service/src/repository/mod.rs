//! Storage interfaces used by the engine. Every call receives the executor it runs on.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::OrderItem;

use crate::errors::LomsError;
use crate::models::{Order, OrderStatus, OutboxMessage, Reservation, Stock};

#[cfg(test)]
pub mod memory;
pub mod postgres;

#[async_trait]
pub trait StockRepository: Send + Sync {
    type Conn: Send + 'static;

    /// Units per warehouse that are neither shipped nor held by a reservation active at `now`.
    async fn available_stocks(
        &self,
        conn: &mut Self::Conn,
        sku: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Stock>, LomsError>;

    async fn make_reservation(
        &self,
        conn: &mut Self::Conn,
        reservation: &Reservation,
    ) -> Result<(), LomsError>;

    async fn reservations_for_order(
        &self,
        conn: &mut Self::Conn,
        order_id: i64,
    ) -> Result<Vec<Reservation>, LomsError>;

    async fn delete_reservations_for_order(
        &self,
        conn: &mut Self::Conn,
        order_id: i64,
    ) -> Result<u64, LomsError>;

    /// Removes every reservation with `active_until <= now`.
    async fn delete_stale_reservations(
        &self,
        conn: &mut Self::Conn,
        now: DateTime<Utc>,
    ) -> Result<u64, LomsError>;

    /// Takes `count` units out of a warehouse. Fails with `InsufficientStocks` when the
    /// warehouse holds fewer; a row that reaches zero is deleted.
    async fn ship_stock(
        &self,
        conn: &mut Self::Conn,
        sku: u32,
        warehouse_id: i64,
        count: u64,
    ) -> Result<(), LomsError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    type Conn: Send + 'static;

    /// Inserts an order in the `New` state with its items and returns the new id.
    async fn create_order(
        &self,
        conn: &mut Self::Conn,
        user: i64,
        items: &[OrderItem],
    ) -> Result<i64, LomsError>;

    async fn get_order(&self, conn: &mut Self::Conn, order_id: i64) -> Result<Order, LomsError>;

    async fn set_order_status(
        &self,
        conn: &mut Self::Conn,
        order_id: i64,
        status: OrderStatus,
    ) -> Result<(), LomsError>;

    /// Moves orders still awaiting payment that were created at or before `created_before`
    /// to `Failed`.
    async fn fail_unpaid_orders(
        &self,
        conn: &mut Self::Conn,
        created_before: DateTime<Utc>,
    ) -> Result<u64, LomsError>;
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    type Conn: Send + 'static;

    async fn add_message(
        &self,
        conn: &mut Self::Conn,
        key: &str,
        message: &str,
    ) -> Result<(), LomsError>;

    /// Every pending message, oldest first.
    async fn pending_messages(&self, conn: &mut Self::Conn)
        -> Result<Vec<OutboxMessage>, LomsError>;

    async fn delete_message(&self, conn: &mut Self::Conn, msg_id: i64) -> Result<(), LomsError>;
}

pub struct Repositories<C> {
    pub stocks: Arc<dyn StockRepository<Conn = C>>,
    pub orders: Arc<dyn OrderRepository<Conn = C>>,
    pub outbox: Arc<dyn OutboxRepository<Conn = C>>,
}

impl<C> Clone for Repositories<C> {
    fn clone(&self) -> Self {
        Self {
            stocks: self.stocks.clone(),
            orders: self.orders.clone(),
            outbox: self.outbox.clone(),
        }
    }
}
