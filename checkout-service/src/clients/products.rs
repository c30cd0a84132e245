//! Product information lookups: a read-through cache in front of a rate-limited upstream.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use shared::cache::{Cache, CacheConfig};
use shared::limiter::RateLimiter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::post_json;
use crate::errors::CheckoutError;
use crate::models::{CartItem, Product};

/// The raw product service.
#[async_trait]
pub trait ProductApi: Send + Sync {
    async fn get_product(&self, sku: u32) -> Result<Product, CheckoutError>;
}

/// Product lookups as the checkout engine sees them.
#[async_trait]
pub trait ProductClient: Send + Sync {
    async fn get_product(
        &self,
        sku: u32,
        cancel: &CancellationToken,
    ) -> Result<Product, CheckoutError>;

    /// Fills in name and price of every item. Any failed lookup fails the whole call.
    async fn get_products_info(
        &self,
        items: &mut [CartItem],
        cancel: &CancellationToken,
    ) -> Result<(), CheckoutError>;
}

#[derive(Serialize)]
struct ProductRequest<'a> {
    token: &'a str,
    sku: u32,
}

pub struct HttpProductApi {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl HttpProductApi {
    pub fn new(client: reqwest::Client, base_url: &str, token: impl Into<String>) -> Self {
        Self {
            client,
            url: format!("{}/get_product", base_url.trim_end_matches('/')),
            token: token.into(),
        }
    }
}

#[async_trait]
impl ProductApi for HttpProductApi {
    async fn get_product(&self, sku: u32) -> Result<Product, CheckoutError> {
        let request = ProductRequest {
            token: &self.token,
            sku,
        };
        post_json(&self.client, &self.url, &request)
            .await
            .map_err(CheckoutError::ProductService)
    }
}

pub struct ProductInfoClient {
    api: Arc<dyn ProductApi>,
    cache: Cache<u32, Product>,
    limiter: RateLimiter,
    max_concurrent: usize,
}

impl ProductInfoClient {
    /// `max_concurrent` bounds the lookups in flight for one batch; 0 means one per item.
    pub fn new(
        api: Arc<dyn ProductApi>,
        cache_config: CacheConfig,
        limiter: RateLimiter,
        max_concurrent: usize,
    ) -> Self {
        let client = Self {
            api,
            cache: Cache::new(cache_config),
            limiter,
            max_concurrent,
        };
        debug!(cache = ?client.cache.config(), max_concurrent, "created product client");
        client
    }

    async fn lookup(
        &self,
        index: usize,
        sku: u32,
        cancel: &CancellationToken,
    ) -> Result<(usize, Product), CheckoutError> {
        let product = self.get_product(sku, cancel).await?;
        Ok((index, product))
    }

    fn workers(&self, items: usize) -> usize {
        if self.max_concurrent == 0 || self.max_concurrent > items {
            items
        } else {
            self.max_concurrent
        }
    }
}

#[async_trait]
impl ProductClient for ProductInfoClient {
    async fn get_product(
        &self,
        sku: u32,
        cancel: &CancellationToken,
    ) -> Result<Product, CheckoutError> {
        if let Some(product) = self.cache.get(&sku) {
            debug!(sku, "product cache hit");
            return Ok(product);
        }
        debug!(sku, "product cache miss");

        let granted_at = self.limiter.acquire(cancel).await?;
        debug!(sku, ?granted_at, "requesting product");
        let product = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CheckoutError::Cancelled),
            product = self.api.get_product(sku) => product?,
        };

        if !self.cache.set(sku, product.clone()) {
            info!(sku, "can't save product in cache");
        }
        Ok(product)
    }

    async fn get_products_info(
        &self,
        items: &mut [CartItem],
        cancel: &CancellationToken,
    ) -> Result<(), CheckoutError> {
        if items.is_empty() {
            return Ok(());
        }
        let skus: Vec<u32> = items.iter().map(|item| item.sku).collect();
        let workers = self.workers(skus.len());

        let mut queue = skus.into_iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        for (index, sku) in queue.by_ref().take(workers) {
            in_flight.push(self.lookup(index, sku, cancel));
        }
        while let Some(result) = in_flight.next().await {
            let (index, product) = result?;
            items[index].name = product.name;
            items[index].price = product.price;
            if let Some((index, sku)) = queue.next() {
                in_flight.push(self.lookup(index, sku, cancel));
            }
        }
        Ok(())
    }
}
