use std::sync::Arc;
use std::time::Duration;

use shared::OrderItem;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clients::loms::LomsClient;
use crate::clients::products::ProductClient;
use crate::errors::CheckoutError;
use crate::models::{Cart, CartItem};
use crate::repository::CartRepository;

const CART_CLEANUP_ATTEMPTS: u32 = 3;
const CART_CLEANUP_BACKOFF: Duration = Duration::from_millis(100);

pub struct CheckoutEngine {
    carts: Arc<dyn CartRepository>,
    loms: Arc<dyn LomsClient>,
    products: Arc<dyn ProductClient>,
}

impl CheckoutEngine {
    pub fn new(
        carts: Arc<dyn CartRepository>,
        loms: Arc<dyn LomsClient>,
        products: Arc<dyn ProductClient>,
    ) -> Self {
        Self {
            carts,
            loms,
            products,
        }
    }

    /// Adds units of a SKU to the cart if the warehouses hold enough for what the cart would
    /// then contain.
    pub async fn add_to_cart(&self, user: i64, sku: u32, count: u16) -> Result<(), CheckoutError> {
        let in_cart = self
            .carts
            .get_cart_item(user, sku)
            .await?
            .map_or(0, |item| i64::from(item.count));
        if in_cart + i64::from(count) > i64::from(u16::MAX) {
            return Err(CheckoutError::CartLineLimit { sku });
        }
        let stocks = self.loms.stocks(sku).await?;

        let mut missing = i64::from(count) + in_cart;
        for stock in stocks {
            missing -= stock.count as i64;
            if missing <= 0 {
                self.carts.add_to_cart(user, sku, count).await?;
                info!(user, sku, count, "added to cart");
                return Ok(());
            }
        }
        Err(CheckoutError::InsufficientStocks)
    }

    pub async fn delete_from_cart(
        &self,
        user: i64,
        sku: u32,
        count: u16,
    ) -> Result<(), CheckoutError> {
        self.carts.delete_from_cart(user, sku, count).await
    }

    pub async fn list_cart(
        &self,
        user: i64,
        cancel: &CancellationToken,
    ) -> Result<Cart, CheckoutError> {
        let mut items: Vec<CartItem> = self
            .carts
            .get_cart(user)
            .await?
            .into_iter()
            .map(CartItem::from)
            .collect();
        self.products.get_products_info(&mut items, cancel).await?;
        Ok(Cart::new(items))
    }

    /// Turns the cart into an order and empties the cart. When the order exists but the cart
    /// cannot be emptied, the error carries the order id.
    pub async fn purchase(&self, user: i64) -> Result<i64, CheckoutError> {
        let items: Vec<OrderItem> = self.carts.get_cart(user).await?;
        if items.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let order_id = self.loms.create_order(user, items).await?;
        info!(user, order_id, "order created from cart");

        let mut attempt = 1;
        loop {
            match self.carts.clean_cart(user).await {
                Ok(()) => return Ok(order_id),
                Err(e) if attempt < CART_CLEANUP_ATTEMPTS => {
                    warn!(user, order_id, attempt, "cart cleanup failed, retrying: {}", e);
                    tokio::time::sleep(CART_CLEANUP_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(user, order_id, "cart cleanup failed: {}", e);
                    return Err(CheckoutError::CartCleanup {
                        order_id,
                        source: Box::new(e),
                    });
                }
            }
        }
    }
}
