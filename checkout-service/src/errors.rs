use diesel_async::pooled_connection::PoolError;
use shared::limiter::Cancelled;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("can't create order from empty cart")]
    EmptyCart,
    #[error("insufficient stocks")]
    InsufficientStocks,
    #[error("cart can't hold more than 65535 units of sku {sku}")]
    CartLineLimit { sku: u32 },
    #[error("cart line for sku {sku} holds {count} units, which doesn't fit an order item")]
    InvalidCartLine { sku: i64, count: i32 },
    #[error("database error while trying to {context}: {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: diesel::result::Error,
    },
    #[error("could not get a database connection: {0}")]
    Pool(#[from] bb8::RunError<PoolError>),
    #[error("loms request failed: {0}")]
    Loms(String),
    #[error("product service request failed: {0}")]
    ProductService(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("order {order_id} was created but the cart could not be cleaned: {source}")]
    CartCleanup {
        order_id: i64,
        #[source]
        source: Box<CheckoutError>,
    },
}

impl CheckoutError {
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyCart | Self::InsufficientStocks | Self::CartLineLimit { .. }
        )
    }
}

impl From<diesel::result::Error> for CheckoutError {
    fn from(source: diesel::result::Error) -> Self {
        Self::Storage {
            context: "run transaction",
            source,
        }
    }
}

impl From<Cancelled> for CheckoutError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

pub fn storage(context: &'static str) -> impl FnOnce(diesel::result::Error) -> CheckoutError {
    move |source| CheckoutError::Storage { context, source }
}
