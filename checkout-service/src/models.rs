use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::OrderItem;

use crate::errors::CheckoutError;

/// Name and unit price of a SKU as reported by the product service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub price: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub sku: u32,
    pub count: u16,
    pub name: String,
    pub price: u32,
}

impl From<OrderItem> for CartItem {
    fn from(item: OrderItem) -> Self {
        Self {
            sku: item.sku,
            count: item.count,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub items: Vec<CartItem>,
    pub total_price: u32,
}

impl Cart {
    pub fn new(items: Vec<CartItem>) -> Self {
        let total_price = items.iter().fold(0u32, |total, item| {
            total.saturating_add(u32::from(item.count).saturating_mul(item.price))
        });
        Self { items, total_price }
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::carts)]
pub struct DbCartItem {
    pub user_id: i64,
    pub sku: i64,
    pub count: i32,
}

impl TryFrom<DbCartItem> for OrderItem {
    type Error = CheckoutError;

    fn try_from(row: DbCartItem) -> Result<Self, Self::Error> {
        let invalid = || CheckoutError::InvalidCartLine {
            sku: row.sku,
            count: row.count,
        };
        Ok(Self {
            sku: u32::try_from(row.sku).map_err(|_| invalid())?,
            count: u16::try_from(row.count).map_err(|_| invalid())?,
        })
    }
}
