use std::fmt;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::OrderItem;

use crate::errors::LomsError;

macro_rules! order_statuses {
    ($($variant:ident = $code:literal, $label:literal;)+) => {
        /// Lifecycle state of an order. Codes are what the database stores, labels are what
        /// clients and notification consumers see.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum OrderStatus {
            $($variant,)+
        }

        impl OrderStatus {
            pub fn code(self) -> i16 {
                match self {
                    $(Self::$variant => $code,)+
                }
            }

            pub fn label(self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }

            pub fn from_code(code: i16) -> Option<Self> {
                match code {
                    $($code => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn from_label(label: &str) -> Option<Self> {
                match label {
                    $($label => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

order_statuses! {
    New = 0, "new";
    AwaitingPayment = 1, "awaiting payment";
    Payed = 2, "payed";
    Failed = -1, "failed";
    Cancelled = -2, "cancelled";
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Payed | Self::Failed | Self::Cancelled)
    }

    /// The only moves an order is allowed to make.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (New, AwaitingPayment)
                | (New, Failed)
                | (AwaitingPayment, Payed)
                | (AwaitingPayment, Cancelled)
                | (AwaitingPayment, Failed)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub order_id: i64,
    pub user: i64,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
}

/// Units of a SKU at one warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stock {
    pub sku: u32,
    pub warehouse_id: i64,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub order_id: i64,
    pub sku: u32,
    pub warehouse_id: i64,
    pub count: u64,
    pub active_until: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
    pub msg_id: i64,
    pub key: String,
    pub message: String,
}

#[derive(Debug, Clone, Queryable)]
pub struct DbOrder {
    pub order_id: i64,
    pub user_id: i64,
    pub status: i16,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewDbOrder {
    pub user_id: i64,
    pub status: i16,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::order_items)]
pub struct DbOrderItem {
    pub order_id: i64,
    pub position: i32,
    pub sku: i64,
    pub count: i32,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::reservations)]
pub struct DbReservation {
    pub order_id: i64,
    pub sku: i64,
    pub warehouse_id: i64,
    pub count: i64,
    pub active_until: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable)]
pub struct DbOutboxMessage {
    pub msg_id: i64,
    pub key: String,
    pub message: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox)]
pub struct NewDbOutboxMessage<'a> {
    pub key: &'a str,
    pub message: &'a str,
}

impl DbOrder {
    pub fn into_order(self, items: Vec<DbOrderItem>) -> Result<Order, LomsError> {
        let status =
            OrderStatus::from_code(self.status).ok_or(LomsError::UnknownStatus(self.status))?;
        Ok(Order {
            order_id: self.order_id,
            user: self.user_id,
            status,
            items: items.into_iter().map(OrderItem::from).collect(),
            created_at: self.created_at,
        })
    }
}

impl From<DbOrderItem> for OrderItem {
    fn from(item: DbOrderItem) -> Self {
        Self {
            sku: item.sku as u32,
            count: item.count as u16,
        }
    }
}

impl From<DbReservation> for Reservation {
    fn from(row: DbReservation) -> Self {
        Self {
            order_id: row.order_id,
            sku: row.sku as u32,
            warehouse_id: row.warehouse_id,
            count: row.count as u64,
            active_until: row.active_until,
        }
    }
}

impl From<&Reservation> for DbReservation {
    fn from(reservation: &Reservation) -> Self {
        Self {
            order_id: reservation.order_id,
            sku: i64::from(reservation.sku),
            warehouse_id: reservation.warehouse_id,
            count: reservation.count as i64,
            active_until: reservation.active_until,
        }
    }
}

impl From<DbOutboxMessage> for OutboxMessage {
    fn from(row: DbOutboxMessage) -> Self {
        Self {
            msg_id: row.msg_id,
            key: row.key,
            message: row.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 5] = [
        OrderStatus::New,
        OrderStatus::AwaitingPayment,
        OrderStatus::Payed,
        OrderStatus::Failed,
        OrderStatus::Cancelled,
    ];

    #[test]
    fn codes_and_labels_are_stable() {
        assert_eq!(OrderStatus::AwaitingPayment.code(), 1);
        assert_eq!(OrderStatus::Cancelled.code(), -2);
        assert_eq!(OrderStatus::AwaitingPayment.label(), "awaiting payment");
        assert_eq!(OrderStatus::from_code(-1), Some(OrderStatus::Failed));
        assert_eq!(OrderStatus::from_label("payed"), Some(OrderStatus::Payed));
        assert_eq!(OrderStatus::from_code(3), None);
        assert_eq!(OrderStatus::from_label("paid"), None);
        for status in ALL {
            assert_eq!(OrderStatus::from_code(status.code()), Some(status));
            assert_eq!(OrderStatus::from_label(status.label()), Some(status));
        }
    }

    #[test]
    fn terminal_states_have_no_way_out() {
        for from in ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
        assert!(OrderStatus::New.can_transition_to(OrderStatus::Failed));
        assert!(!OrderStatus::New.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::New.can_transition_to(OrderStatus::Payed));
    }

    #[test]
    fn unknown_status_code_is_rejected() {
        let row = DbOrder {
            order_id: 1,
            user_id: 2,
            status: 9,
            created_at: Utc::now(),
        };
        assert!(matches!(row.into_order(vec![]), Err(LomsError::UnknownStatus(9))));
    }
}
