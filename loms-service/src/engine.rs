//! Order lifecycle, stock reservations and the notification outbox.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use shared::{OrderItem, StockInfo};
use tracing::{info, warn};

use crate::errors::LomsError;
use crate::models::{Order, OrderStatus, Reservation};
use crate::repository::{Repositories, StockRepository};
use crate::sender::NotificationSender;
use crate::tranman::TransactionManager;

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// How long an order may await payment before the unpaid-orders sweep fails it.
    pub unpaid_order_ttl: Duration,
    /// Lifetime of a reservation made by `create_order`.
    pub reservation_ttl: Duration,
    /// Roll back the whole order when any item cannot be fully reserved, instead of keeping
    /// it as `Failed` with partial reservations.
    pub strict_reservations: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            unpaid_order_ttl: Duration::seconds(600),
            reservation_ttl: Duration::seconds(900),
            strict_reservations: false,
        }
    }
}

pub struct LomsEngine<T: TransactionManager> {
    tx: Arc<T>,
    repos: Repositories<T::Conn>,
    sender: Arc<dyn NotificationSender>,
    settings: EngineSettings,
}

impl<T: TransactionManager> LomsEngine<T> {
    pub fn new(
        tx: T,
        repos: Repositories<T::Conn>,
        sender: Arc<dyn NotificationSender>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            tx: Arc::new(tx),
            repos,
            sender,
            settings,
        }
    }

    /// Registers the order and reserves its items across warehouses. An order whose items
    /// cannot all be reserved ends up `Failed`, keeping whatever was reserved; with strict
    /// reservations it is rolled back instead.
    pub async fn create_order(&self, user: i64, items: Vec<OrderItem>) -> Result<i64, LomsError> {
        let repos = self.repos.clone();
        let EngineSettings {
            reservation_ttl,
            strict_reservations,
            ..
        } = self.settings;

        let (order_id, status) = self
            .tx
            .run_serializable(move |conn| {
                Box::pin(async move {
                    let order_id = repos.orders.create_order(conn, user, &items).await?;
                    let now = Utc::now();
                    let active_until = now + reservation_ttl;

                    let mut fully_reserved = true;
                    for item in &items {
                        let reserved = reserve_item(
                            &*repos.stocks,
                            conn,
                            order_id,
                            item,
                            now,
                            active_until,
                        )
                        .await?;
                        if reserved < u64::from(item.count) {
                            warn!(
                                order_id,
                                sku = item.sku,
                                requested = item.count,
                                reserved,
                                "not enough stock to reserve"
                            );
                            fully_reserved = false;
                        }
                    }

                    if !fully_reserved && strict_reservations {
                        return Err(LomsError::InsufficientStocks);
                    }
                    let status = if fully_reserved {
                        OrderStatus::AwaitingPayment
                    } else {
                        OrderStatus::Failed
                    };
                    ensure_transition(OrderStatus::New, status)?;
                    repos.orders.set_order_status(conn, order_id, status).await?;
                    Ok((order_id, status))
                })
            })
            .await?;

        info!(order_id, user, %status, "order created");
        Ok(order_id)
    }

    pub async fn list_order(&self, order_id: i64) -> Result<Order, LomsError> {
        let orders = self.repos.orders.clone();
        self.tx
            .run_standalone(move |conn| {
                Box::pin(async move { orders.get_order(conn, order_id).await })
            })
            .await
    }

    /// Ships the reserved units, releases the reservations and queues a `payed` notification.
    pub async fn order_payed(&self, order_id: i64) -> Result<(), LomsError> {
        let repos = self.repos.clone();
        self.tx
            .run_serializable(move |conn| {
                Box::pin(async move {
                    let order = repos.orders.get_order(conn, order_id).await?;
                    ensure_transition(order.status, OrderStatus::Payed)?;

                    for reservation in repos.stocks.reservations_for_order(conn, order_id).await? {
                        repos
                            .stocks
                            .ship_stock(
                                conn,
                                reservation.sku,
                                reservation.warehouse_id,
                                reservation.count,
                            )
                            .await?;
                    }
                    repos
                        .stocks
                        .delete_reservations_for_order(conn, order_id)
                        .await?;
                    repos
                        .outbox
                        .add_message(conn, &order_id.to_string(), OrderStatus::Payed.label())
                        .await?;
                    repos
                        .orders
                        .set_order_status(conn, order_id, OrderStatus::Payed)
                        .await
                })
            })
            .await?;

        info!(order_id, "order payed");
        Ok(())
    }

    /// Releases the reservations and queues a `cancelled` notification.
    pub async fn cancel_order(&self, order_id: i64) -> Result<(), LomsError> {
        let repos = self.repos.clone();
        self.tx
            .run_repeatable_read(move |conn| {
                Box::pin(async move {
                    let order = repos.orders.get_order(conn, order_id).await?;
                    ensure_transition(order.status, OrderStatus::Cancelled)?;

                    repos
                        .stocks
                        .delete_reservations_for_order(conn, order_id)
                        .await?;
                    repos
                        .outbox
                        .add_message(conn, &order_id.to_string(), OrderStatus::Cancelled.label())
                        .await?;
                    repos
                        .orders
                        .set_order_status(conn, order_id, OrderStatus::Cancelled)
                        .await
                })
            })
            .await?;

        info!(order_id, "order cancelled");
        Ok(())
    }

    /// Units of `sku` currently available per warehouse. Warehouses with nothing left are
    /// omitted.
    pub async fn stocks(&self, sku: u32) -> Result<Vec<StockInfo>, LomsError> {
        let stocks = self.repos.stocks.clone();
        let available = self
            .tx
            .run_standalone(move |conn| {
                Box::pin(async move { stocks.available_stocks(conn, sku, Utc::now()).await })
            })
            .await?;

        Ok(available
            .into_iter()
            .filter(|stock| stock.count > 0)
            .map(|stock| StockInfo {
                warehouse_id: stock.warehouse_id,
                count: stock.count,
            })
            .collect())
    }

    /// Fails every order that has been awaiting payment for longer than the configured TTL.
    pub async fn unpayed_orders(&self) -> Result<u64, LomsError> {
        self.fail_unpaid_orders_at(Utc::now()).await
    }

    async fn fail_unpaid_orders_at(&self, now: DateTime<Utc>) -> Result<u64, LomsError> {
        let orders = self.repos.orders.clone();
        let created_before = now - self.settings.unpaid_order_ttl;
        let failed = self
            .tx
            .run_standalone(move |conn| {
                Box::pin(async move { orders.fail_unpaid_orders(conn, created_before).await })
            })
            .await?;
        if failed > 0 {
            info!(failed, "unpaid orders marked as failed");
        }
        Ok(failed)
    }

    /// Drops reservations whose lifetime is over.
    pub async fn stale_reservations(&self) -> Result<u64, LomsError> {
        self.delete_stale_reservations_at(Utc::now()).await
    }

    async fn delete_stale_reservations_at(&self, now: DateTime<Utc>) -> Result<u64, LomsError> {
        let stocks = self.repos.stocks.clone();
        let deleted = self
            .tx
            .run_standalone(move |conn| {
                Box::pin(async move { stocks.delete_stale_reservations(conn, now).await })
            })
            .await?;
        if deleted > 0 {
            info!(deleted, "stale reservations deleted");
        }
        Ok(deleted)
    }

    /// Sends pending outbox messages oldest first and deletes each one once it is delivered.
    /// A message that fails stays in the outbox for the next pass.
    ///
    /// This pass deliberately does not attempt every pending message: after a failure, later
    /// messages with the same key are skipped until the next pass, so an order's notifications
    /// never overtake each other. Messages with other keys are still sent. Returns how many
    /// messages were delivered, or every failure of this pass.
    pub async fn send_order_notifications(&self) -> Result<usize, LomsError> {
        let outbox = self.repos.outbox.clone();
        let pending = self
            .tx
            .run_standalone(move |conn| {
                Box::pin(async move { outbox.pending_messages(conn).await })
            })
            .await?;

        let mut failures = Vec::new();
        let mut blocked_keys = HashSet::new();
        let mut delivered = 0;
        for message in pending {
            if blocked_keys.contains(&message.key) {
                continue;
            }
            if let Err(e) = self.sender.send_notification(&message).await {
                warn!(msg_id = message.msg_id, key = %message.key, "notification failed: {}", e);
                blocked_keys.insert(message.key);
                failures.push(e);
                continue;
            }

            let outbox = self.repos.outbox.clone();
            let msg_id = message.msg_id;
            let deleted = self
                .tx
                .run_standalone(move |conn| {
                    Box::pin(async move { outbox.delete_message(conn, msg_id).await })
                })
                .await;
            match deleted {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(msg_id, "delivered notification stays in the outbox: {}", e);
                    blocked_keys.insert(message.key);
                    failures.push(e);
                }
            }
        }

        if failures.is_empty() {
            Ok(delivered)
        } else {
            Err(LomsError::Notifications(failures))
        }
    }
}

fn ensure_transition(from: OrderStatus, to: OrderStatus) -> Result<(), LomsError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(LomsError::IncorrectOrderState)
    }
}

/// Reserves up to `item.count` units, taking warehouses in the order the repository returns
/// them. Returns how many units were reserved.
async fn reserve_item<C: Send + 'static>(
    stocks: &dyn StockRepository<Conn = C>,
    conn: &mut C,
    order_id: i64,
    item: &OrderItem,
    now: DateTime<Utc>,
    active_until: DateTime<Utc>,
) -> Result<u64, LomsError> {
    let requested = u64::from(item.count);
    let mut reserved = 0;
    for stock in stocks.available_stocks(conn, item.sku, now).await? {
        if reserved == requested {
            break;
        }
        let count = stock.count.min(requested - reserved);
        if count == 0 {
            continue;
        }
        stocks
            .make_reservation(
                conn,
                &Reservation {
                    order_id,
                    sku: item.sku,
                    warehouse_id: stock.warehouse_id,
                    count,
                    active_until,
                },
            )
            .await?;
        reserved += count;
    }
    Ok(reserved)
}
