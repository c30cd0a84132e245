use async_trait::async_trait;
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::OrderItem;

use crate::errors::{storage, CheckoutError};
use crate::models::DbCartItem;
use crate::schema::carts;

pub type DbPool = Pool<AsyncPgConnection>;

#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn get_cart_item(&self, user: i64, sku: u32) -> Result<Option<OrderItem>, CheckoutError>;

    /// Adds `count` units, on top of whatever the cart already holds for the SKU.
    async fn add_to_cart(&self, user: i64, sku: u32, count: u16) -> Result<(), CheckoutError>;

    /// Takes `count` units out; the line disappears once nothing is left.
    async fn delete_from_cart(&self, user: i64, sku: u32, count: u16)
        -> Result<(), CheckoutError>;

    async fn get_cart(&self, user: i64) -> Result<Vec<OrderItem>, CheckoutError>;

    async fn clean_cart(&self, user: i64) -> Result<(), CheckoutError>;
}

pub struct PgCartRepository {
    pool: DbPool,
}

impl PgCartRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CartRepository for PgCartRepository {
    async fn get_cart_item(&self, user: i64, sku: u32) -> Result<Option<OrderItem>, CheckoutError> {
        let mut conn = self.pool.get().await?;
        let item = carts::table
            .find((user, i64::from(sku)))
            .first::<DbCartItem>(&mut conn)
            .await
            .optional()
            .map_err(storage("load cart item"))?;
        item.map(OrderItem::try_from).transpose()
    }

    async fn add_to_cart(&self, user: i64, sku: u32, count: u16) -> Result<(), CheckoutError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(carts::table)
            .values(&DbCartItem {
                user_id: user,
                sku: i64::from(sku),
                count: i32::from(count),
            })
            .on_conflict((carts::user_id, carts::sku))
            .do_update()
            .set(carts::count.eq(carts::count + excluded(carts::count)))
            .execute(&mut conn)
            .await
            .map_err(storage("add to cart"))?;
        Ok(())
    }

    async fn delete_from_cart(
        &self,
        user: i64,
        sku: u32,
        count: u16,
    ) -> Result<(), CheckoutError> {
        let mut conn = self.pool.get().await?;
        let sku = i64::from(sku);
        let count = i32::from(count);

        conn.transaction::<_, CheckoutError, _>(|conn| {
            Box::pin(async move {
                let current = carts::table
                    .find((user, sku))
                    .select(carts::count)
                    .for_update()
                    .first::<i32>(conn)
                    .await
                    .optional()
                    .map_err(storage("load cart item"))?;

                match current {
                    None => {}
                    Some(current) if current <= count => {
                        diesel::delete(carts::table.find((user, sku)))
                            .execute(conn)
                            .await
                            .map_err(storage("delete cart item"))?;
                    }
                    Some(current) => {
                        diesel::update(carts::table.find((user, sku)))
                            .set(carts::count.eq(current - count))
                            .execute(conn)
                            .await
                            .map_err(storage("update cart item"))?;
                    }
                }
                Ok(())
            })
        })
        .await
    }

    async fn get_cart(&self, user: i64) -> Result<Vec<OrderItem>, CheckoutError> {
        let mut conn = self.pool.get().await?;
        let rows = carts::table
            .filter(carts::user_id.eq(user))
            .order(carts::sku.asc())
            .load::<DbCartItem>(&mut conn)
            .await
            .map_err(storage("load cart"))?;
        rows.into_iter().map(OrderItem::try_from).collect()
    }

    async fn clean_cart(&self, user: i64) -> Result<(), CheckoutError> {
        let mut conn = self.pool.get().await?;
        diesel::delete(carts::table.filter(carts::user_id.eq(user)))
            .execute(&mut conn)
            .await
            .map_err(storage("clean cart"))?;
        Ok(())
    }
}
