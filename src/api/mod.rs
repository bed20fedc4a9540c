//! HTTP API for health checks, quotes, and operation status

use crate::config::ApiConfig;
use crate::crosschain::CrossChainCoordinator;
use crate::error::{ErrorKind, ExchangeError, ExchangeResult};
use crate::pool::PoolSummary;
use crate::router::{Route, Router as SwapRouter};

use alloy_primitives::{Address, Bytes, B256, U256};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<SwapRouter>,
    pub coordinator: Arc<CrossChainCoordinator>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/quote", get(get_quote))
        .route("/pools", get(get_pools))
        .route("/operations/:id", get(get_operation))
        .route("/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> ExchangeResult<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ExchangeError::Internal(format!("bind {}: {}", addr, e)))?;
    axum::serve(listener, app(state))
        .await
        .map_err(|e| ExchangeError::Internal(e.to_string()))?;

    Ok(())
}

/// Engine errors as JSON responses
struct ApiError(ExchangeError);

impl From<ExchangeError> for ApiError {
    fn from(e: ExchangeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match (&self.0, self.0.kind()) {
            (ExchangeError::OperationNotFound(_) | ExchangeError::PoolNotFound(_), _) => {
                StatusCode::NOT_FOUND
            }
            (_, ErrorKind::Validation) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::State | ErrorKind::Slippage) => StatusCode::UNPROCESSABLE_ENTITY,
            (_, ErrorKind::Dispatch) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorResponse {
            error: self.0.to_string(),
            kind: format!("{:?}", self.0.kind()).to_lowercase(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - store reachable and router accepting calls
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.coordinator.store().health_check().await.is_ok();
    let paused = state.router.is_paused();
    let ready = store && !paused;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            store,
            paused,
        }),
    )
}

/// Local best route, or a cross-chain quote when `dst_chain` is remote
async fn get_quote(
    State(state): State<AppState>,
    Query(params): Query<QuoteParams>,
) -> Result<Json<QuoteResponse>, ApiError> {
    let amount_in = params
        .amount_in
        .parse::<U256>()
        .map_err(|_| ExchangeError::InvalidAmount(U256::ZERO))?;
    let chain_id = params.chain_id.unwrap_or_else(|| state.router.chain_id());

    match params.dst_chain.filter(|dst| *dst != chain_id) {
        Some(dst_chain) => {
            let quote = state
                .coordinator
                .get_cross_chain_route(params.token_in, params.token_out, amount_in, chain_id, dst_chain)
                .await?;
            Ok(Json(QuoteResponse {
                amount_out: quote.amount_out,
                route: None,
                route_data: Some(quote.route_data),
                use_provider_a: Some(quote.use_provider_a),
                fee: Some(quote.fee),
            }))
        }
        None => {
            let (amount_out, route) = state.router.get_optimal_route(
                params.token_in,
                params.token_out,
                amount_in,
                chain_id,
            )?;
            Ok(Json(QuoteResponse {
                amount_out,
                route: Some(route),
                route_data: None,
                use_provider_a: None,
                fee: None,
            }))
        }
    }
}

async fn get_pools(State(state): State<AppState>) -> impl IntoResponse {
    let mut pools: Vec<PoolSummary> = state
        .router
        .pools()
        .all_pools()
        .iter()
        .map(|pool| pool.summary())
        .collect();
    pools.sort_by_key(|pool| pool.pool_id);
    Json(pools)
}

async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<B256>,
) -> Result<impl IntoResponse, ApiError> {
    let operation = state.coordinator.get_operation(id).await?;
    Ok(Json(operation))
}

/// Operation statistics
async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let operations = state.coordinator.store().stats().await?;
    Ok(Json(StatsResponse {
        chain_id: state.router.chain_id(),
        paused: state.router.is_paused(),
        pools: state.router.pools().pool_count(),
        pending: operations.pending,
        completed: operations.completed,
        failed: operations.failed,
        recovered: operations.recovered,
    }))
}

// Request and response types

#[derive(Deserialize)]
struct QuoteParams {
    token_in: Address,
    token_out: Address,
    /// Decimal or 0x-prefixed amount
    amount_in: String,
    chain_id: Option<u64>,
    dst_chain: Option<u64>,
}

#[derive(Serialize, Deserialize)]
struct QuoteResponse {
    amount_out: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    route: Option<Route>,
    #[serde(skip_serializing_if = "Option::is_none")]
    route_data: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    use_provider_a: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fee: Option<U256>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    store: bool,
    paused: bool,
}

#[derive(Serialize)]
struct StatsResponse {
    chain_id: u64,
    paused: bool,
    pools: usize,
    pending: u64,
    completed: u64,
    failed: u64,
    recovered: u64,
}
