//! In-memory storage for engine tests. A transaction works on a copy of the state that is
//! written back only on commit.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::OrderItem;
use tokio::sync::Mutex;

use super::{OrderRepository, OutboxRepository, Repositories, StockRepository};
use crate::errors::LomsError;
use crate::models::{Order, OrderStatus, OutboxMessage, Reservation, Stock};
use crate::tranman::{IsolationLevel, TransactionManager, TxFuture};

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub orders: BTreeMap<i64, Order>,
    /// Physical units keyed by `(sku, warehouse_id)`.
    pub stocks: BTreeMap<(u32, i64), u64>,
    pub reservations: Vec<Reservation>,
    pub outbox: BTreeMap<i64, OutboxMessage>,
    next_order_id: i64,
    next_msg_id: i64,
    failing: HashSet<&'static str>,
}

impl MemoryState {
    fn check(&self, operation: &'static str) -> Result<(), LomsError> {
        if self.failing.contains(operation) {
            return Err(LomsError::Storage {
                context: operation,
                source: diesel::result::Error::BrokenTransactionManager,
            });
        }
        Ok(())
    }

    pub fn reserved(&self, order_id: i64) -> u64 {
        self.reservations
            .iter()
            .filter(|r| r.order_id == order_id)
            .map(|r| r.count)
            .sum()
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    levels: Arc<Mutex<Vec<IsolationLevel>>>,
}

impl MemoryStore {
    pub async fn put_stock(&self, sku: u32, warehouse_id: i64, count: u64) {
        self.state
            .lock()
            .await
            .stocks
            .insert((sku, warehouse_id), count);
    }

    /// Makes every later call of the named repository operation fail.
    pub async fn fail_on(&self, operation: &'static str) {
        self.state.lock().await.failing.insert(operation);
    }

    pub async fn heal(&self) {
        self.state.lock().await.failing.clear();
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    pub async fn update(&self, f: impl FnOnce(&mut MemoryState)) {
        f(&mut *self.state.lock().await)
    }

    /// Isolation levels of every transaction run so far.
    pub async fn levels(&self) -> Vec<IsolationLevel> {
        self.levels.lock().await.clone()
    }
}

#[async_trait]
impl TransactionManager for MemoryStore {
    type Conn = MemoryState;

    async fn run_transaction<T, F>(&self, level: IsolationLevel, f: F) -> Result<T, LomsError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c mut Self::Conn) -> TxFuture<'c, T> + Send + 'static,
    {
        self.levels.lock().await.push(level);
        let mut state = self.state.lock().await;
        let mut working = state.clone();
        let result = f(&mut working).await;
        if result.is_ok() {
            *state = working;
        }
        result
    }

    async fn run_standalone<T, F>(&self, f: F) -> Result<T, LomsError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c mut Self::Conn) -> TxFuture<'c, T> + Send + 'static,
    {
        let mut state = self.state.lock().await;
        f(&mut *state).await
    }
}

pub struct MemoryStockRepository;

#[async_trait]
impl StockRepository for MemoryStockRepository {
    type Conn = MemoryState;

    async fn available_stocks(
        &self,
        conn: &mut MemoryState,
        sku: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Stock>, LomsError> {
        conn.check("available_stocks")?;
        Ok(conn
            .stocks
            .iter()
            .filter(|((stock_sku, _), _)| *stock_sku == sku)
            .map(|(&(sku, warehouse_id), &count)| {
                let reserved: u64 = conn
                    .reservations
                    .iter()
                    .filter(|r| r.sku == sku && r.warehouse_id == warehouse_id)
                    .filter(|r| r.active_until > now)
                    .map(|r| r.count)
                    .sum();
                Stock {
                    sku,
                    warehouse_id,
                    count: count.saturating_sub(reserved),
                }
            })
            .collect())
    }

    async fn make_reservation(
        &self,
        conn: &mut MemoryState,
        reservation: &Reservation,
    ) -> Result<(), LomsError> {
        conn.check("make_reservation")?;
        match conn.reservations.iter_mut().find(|r| {
            r.order_id == reservation.order_id
                && r.sku == reservation.sku
                && r.warehouse_id == reservation.warehouse_id
        }) {
            Some(existing) => {
                existing.count += reservation.count;
                existing.active_until = reservation.active_until;
            }
            None => conn.reservations.push(*reservation),
        }
        Ok(())
    }

    async fn reservations_for_order(
        &self,
        conn: &mut MemoryState,
        order_id: i64,
    ) -> Result<Vec<Reservation>, LomsError> {
        conn.check("reservations_for_order")?;
        Ok(conn
            .reservations
            .iter()
            .filter(|r| r.order_id == order_id)
            .copied()
            .collect())
    }

    async fn delete_reservations_for_order(
        &self,
        conn: &mut MemoryState,
        order_id: i64,
    ) -> Result<u64, LomsError> {
        conn.check("delete_reservations_for_order")?;
        let before = conn.reservations.len();
        conn.reservations.retain(|r| r.order_id != order_id);
        Ok((before - conn.reservations.len()) as u64)
    }

    async fn delete_stale_reservations(
        &self,
        conn: &mut MemoryState,
        now: DateTime<Utc>,
    ) -> Result<u64, LomsError> {
        conn.check("delete_stale_reservations")?;
        let before = conn.reservations.len();
        conn.reservations.retain(|r| r.active_until > now);
        Ok((before - conn.reservations.len()) as u64)
    }

    async fn ship_stock(
        &self,
        conn: &mut MemoryState,
        sku: u32,
        warehouse_id: i64,
        count: u64,
    ) -> Result<(), LomsError> {
        conn.check("ship_stock")?;
        let Some(stock) = conn.stocks.get_mut(&(sku, warehouse_id)) else {
            return Err(LomsError::InsufficientStocks);
        };
        if *stock < count {
            return Err(LomsError::InsufficientStocks);
        }
        *stock -= count;
        if *stock == 0 {
            conn.stocks.remove(&(sku, warehouse_id));
        }
        Ok(())
    }
}

pub struct MemoryOrderRepository;

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    type Conn = MemoryState;

    async fn create_order(
        &self,
        conn: &mut MemoryState,
        user: i64,
        items: &[OrderItem],
    ) -> Result<i64, LomsError> {
        conn.check("create_order")?;
        conn.next_order_id += 1;
        let order_id = conn.next_order_id;
        conn.orders.insert(
            order_id,
            Order {
                order_id,
                user,
                status: OrderStatus::New,
                items: items.to_vec(),
                created_at: Utc::now(),
            },
        );
        Ok(order_id)
    }

    async fn get_order(&self, conn: &mut MemoryState, order_id: i64) -> Result<Order, LomsError> {
        conn.check("get_order")?;
        conn.orders
            .get(&order_id)
            .cloned()
            .ok_or(LomsError::OrderNotFound(order_id))
    }

    async fn set_order_status(
        &self,
        conn: &mut MemoryState,
        order_id: i64,
        status: OrderStatus,
    ) -> Result<(), LomsError> {
        conn.check("set_order_status")?;
        if let Some(order) = conn.orders.get_mut(&order_id) {
            order.status = status;
        }
        Ok(())
    }

    async fn fail_unpaid_orders(
        &self,
        conn: &mut MemoryState,
        created_before: DateTime<Utc>,
    ) -> Result<u64, LomsError> {
        conn.check("fail_unpaid_orders")?;
        let mut failed = 0;
        for order in conn.orders.values_mut() {
            if order.status == OrderStatus::AwaitingPayment && order.created_at <= created_before {
                order.status = OrderStatus::Failed;
                failed += 1;
            }
        }
        Ok(failed)
    }
}

pub struct MemoryOutboxRepository;

#[async_trait]
impl OutboxRepository for MemoryOutboxRepository {
    type Conn = MemoryState;

    async fn add_message(
        &self,
        conn: &mut MemoryState,
        key: &str,
        message: &str,
    ) -> Result<(), LomsError> {
        conn.check("add_message")?;
        conn.next_msg_id += 1;
        let msg_id = conn.next_msg_id;
        conn.outbox.insert(
            msg_id,
            OutboxMessage {
                msg_id,
                key: key.to_string(),
                message: message.to_string(),
            },
        );
        Ok(())
    }

    async fn pending_messages(
        &self,
        conn: &mut MemoryState,
    ) -> Result<Vec<OutboxMessage>, LomsError> {
        conn.check("pending_messages")?;
        Ok(conn.outbox.values().cloned().collect())
    }

    async fn delete_message(&self, conn: &mut MemoryState, msg_id: i64) -> Result<(), LomsError> {
        conn.check("delete_message")?;
        conn.outbox.remove(&msg_id);
        Ok(())
    }
}

impl Repositories<MemoryState> {
    pub fn memory() -> Self {
        Self {
            stocks: Arc::new(MemoryStockRepository),
            orders: Arc::new(MemoryOrderRepository),
            outbox: Arc::new(MemoryOutboxRepository),
        }
    }
}
