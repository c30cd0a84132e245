use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use shared::*;
use tracing::error;

use crate::engine::LomsEngine;
use crate::errors::LomsError;
use crate::tranman::TransactionManager;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

pub fn create_router<T: TransactionManager>(engine: Arc<LomsEngine<T>>) -> Router {
    Router::new()
        .route("/createOrder", post(create_order::<T>))
        .route("/listOrder", post(list_order::<T>))
        .route("/orderPayed", post(order_payed::<T>))
        .route("/cancelOrder", post(cancel_order::<T>))
        .route("/stocks", post(stocks::<T>))
        .route("/health", get(health_check))
        .with_state(engine)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

fn error_response(e: LomsError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &e {
        LomsError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        e => {
            error!("request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(ErrorResponse::new(e)))
}

pub async fn create_order<T: TransactionManager>(
    State(engine): State<Arc<LomsEngine<T>>>,
    Json(request): Json<CreateOrderRequest>,
) -> ApiResult<CreateOrderResponse> {
    let order_id = engine
        .create_order(request.user, request.items)
        .await
        .map_err(error_response)?;
    Ok(Json(CreateOrderResponse { order_id }))
}

pub async fn list_order<T: TransactionManager>(
    State(engine): State<Arc<LomsEngine<T>>>,
    Json(request): Json<OrderIdRequest>,
) -> ApiResult<ListOrderResponse> {
    let order = engine
        .list_order(request.order_id)
        .await
        .map_err(error_response)?;
    Ok(Json(ListOrderResponse {
        status: order.status.label().to_string(),
        user: order.user,
        items: order.items,
    }))
}

pub async fn order_payed<T: TransactionManager>(
    State(engine): State<Arc<LomsEngine<T>>>,
    Json(request): Json<OrderIdRequest>,
) -> ApiResult<()> {
    engine
        .order_payed(request.order_id)
        .await
        .map_err(error_response)?;
    Ok(Json(()))
}

pub async fn cancel_order<T: TransactionManager>(
    State(engine): State<Arc<LomsEngine<T>>>,
    Json(request): Json<OrderIdRequest>,
) -> ApiResult<()> {
    engine
        .cancel_order(request.order_id)
        .await
        .map_err(error_response)?;
    Ok(Json(()))
}

pub async fn stocks<T: TransactionManager>(
    State(engine): State<Arc<LomsEngine<T>>>,
    Json(request): Json<StocksRequest>,
) -> ApiResult<StocksResponse> {
    let stocks = engine.stocks(request.sku).await.map_err(error_response)?;
    Ok(Json(StocksResponse { stocks }))
}

pub async fn health_check() -> &'static str {
    "OK"
}
