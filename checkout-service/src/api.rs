use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::{CreateOrderResponse, ErrorResponse};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::engine::CheckoutEngine;
use crate::errors::CheckoutError;
use crate::models::Cart;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

#[derive(Debug, Serialize, Deserialize)]
pub struct CartItemRequest {
    pub user: i64,
    pub sku: u32,
    pub count: u16,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserRequest {
    pub user: i64,
}

pub fn create_router(engine: Arc<CheckoutEngine>) -> Router {
    Router::new()
        .route("/addToCart", post(add_to_cart))
        .route("/deleteFromCart", post(delete_from_cart))
        .route("/listCart", post(list_cart))
        .route("/purchase", post(purchase))
        .route("/health", get(health_check))
        .with_state(engine)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

fn error_response(e: CheckoutError) -> (StatusCode, Json<ErrorResponse>) {
    let status = if e.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        error!("request failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(ErrorResponse::new(e)))
}

pub async fn add_to_cart(
    State(engine): State<Arc<CheckoutEngine>>,
    Json(request): Json<CartItemRequest>,
) -> ApiResult<()> {
    engine
        .add_to_cart(request.user, request.sku, request.count)
        .await
        .map_err(error_response)?;
    Ok(Json(()))
}

pub async fn delete_from_cart(
    State(engine): State<Arc<CheckoutEngine>>,
    Json(request): Json<CartItemRequest>,
) -> ApiResult<()> {
    engine
        .delete_from_cart(request.user, request.sku, request.count)
        .await
        .map_err(error_response)?;
    Ok(Json(()))
}

pub async fn list_cart(
    State(engine): State<Arc<CheckoutEngine>>,
    Json(request): Json<UserRequest>,
) -> ApiResult<Cart> {
    // dropping the request future cancels outstanding product lookups
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let cart = engine
        .list_cart(request.user, &cancel)
        .await
        .map_err(error_response)?;
    Ok(Json(cart))
}

pub async fn purchase(
    State(engine): State<Arc<CheckoutEngine>>,
    Json(request): Json<UserRequest>,
) -> ApiResult<CreateOrderResponse> {
    let order_id = engine.purchase(request.user).await.map_err(error_response)?;
    Ok(Json(CreateOrderResponse { order_id }))
}

pub async fn health_check() -> &'static str {
    "OK"
}
