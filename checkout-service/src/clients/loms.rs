use async_trait::async_trait;
use shared::{
    CreateOrderRequest, CreateOrderResponse, OrderItem, StockInfo, StocksRequest, StocksResponse,
};
use tracing::debug;

use super::post_json;
use crate::errors::CheckoutError;

#[async_trait]
pub trait LomsClient: Send + Sync {
    async fn create_order(&self, user: i64, items: Vec<OrderItem>) -> Result<i64, CheckoutError>;
    async fn stocks(&self, sku: u32) -> Result<Vec<StockInfo>, CheckoutError>;
}

pub struct HttpLomsClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLomsClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl LomsClient for HttpLomsClient {
    async fn create_order(&self, user: i64, items: Vec<OrderItem>) -> Result<i64, CheckoutError> {
        let url = format!("{}/createOrder", self.base_url);
        let response: CreateOrderResponse =
            post_json(&self.client, &url, &CreateOrderRequest { user, items })
                .await
                .map_err(CheckoutError::Loms)?;
        debug!(user, order_id = response.order_id, "order created in loms");
        Ok(response.order_id)
    }

    async fn stocks(&self, sku: u32) -> Result<Vec<StockInfo>, CheckoutError> {
        let url = format!("{}/stocks", self.base_url);
        let response: StocksResponse = post_json(&self.client, &url, &StocksRequest { sku })
            .await
            .map_err(CheckoutError::Loms)?;
        Ok(response.stocks)
    }
}
