//! HTTP surface
//!
//! Passes provider payloads through unchanged and reports which cache layer
//! answered in the `X-Cache` header (`proxy`, `db-hit`, `db-stale`,
//! `db-fallback` or `derived`).

use crate::{
    error::MarketDataError,
    service::MarketDataService,
    types::{CachedResponse, ChartQuery, MarketsQuery, RangeQuery, SimplePriceQuery},
};
use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Name of the provenance header
pub const CACHE_HEADER: &str = "x-cache";

type AppState = Arc<MarketDataService>;

/// Build the API router with CORS and request tracing
pub fn router(service: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/coingecko/coins/markets", get(markets))
        .route("/api/coingecko/coins/:id/market_chart", get(market_chart))
        .route(
            "/api/coingecko/coins/:id/market_chart/range",
            get(market_chart_range),
        )
        .route("/api/coingecko/coins/:id/ohlc", get(ohlc))
        .route("/api/coingecko/simple/price", get(simple_price))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.payload).into_response();
        response.headers_mut().insert(
            HeaderName::from_static(CACHE_HEADER),
            HeaderValue::from_static(self.source.header_value()),
        );
        response
    }
}

impl IntoResponse for MarketDataError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Market data request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %self, "Market data request failed");
        }

        (status, Json(json!({ "message": self.public_message() }))).into_response()
    }
}

async fn health(State(service): State<AppState>) -> impl IntoResponse {
    Json(service.health_check().await)
}

/// Unwraps an extractor, reporting a rejection as a JSON 400
fn extracted<T, R: std::fmt::Display>(
    result: Result<T, R>,
) -> Result<T, MarketDataError> {
    result.map_err(|rejection| MarketDataError::invalid_request(rejection.to_string()))
}

async fn markets(
    State(service): State<AppState>,
    query: Result<Query<MarketsQuery>, QueryRejection>,
) -> Result<CachedResponse, MarketDataError> {
    let Query(query) = extracted(query)?;
    service.markets(&query).await
}

async fn market_chart(
    State(service): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    query: Result<Query<ChartQuery>, QueryRejection>,
) -> Result<CachedResponse, MarketDataError> {
    let Path(id) = extracted(id)?;
    let Query(query) = extracted(query)?;
    service.market_chart(&id, &query).await
}

async fn market_chart_range(
    State(service): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> Result<CachedResponse, MarketDataError> {
    let Path(id) = extracted(id)?;
    let Query(query) = extracted(query)?;
    service.market_chart_range(&id, &query).await
}

async fn ohlc(
    State(service): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    query: Result<Query<ChartQuery>, QueryRejection>,
) -> Result<CachedResponse, MarketDataError> {
    let Path(id) = extracted(id)?;
    let Query(query) = extracted(query)?;
    service.ohlc(&id, &query).await
}

async fn simple_price(
    State(service): State<AppState>,
    query: Result<Query<SimplePriceQuery>, QueryRejection>,
) -> Result<CachedResponse, MarketDataError> {
    let Query(query) = extracted(query)?;
    service.simple_price(&query).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::error::ProviderError;
    use crate::provider::mock::MockProvider;
    use crate::store::{InMemoryStore, PersistentStore};
    use crate::types::CacheKey;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> (Arc<MockProvider>, Arc<InMemoryStore>, Arc<ManualClock>, Router) {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let service = Arc::new(MarketDataService::new(
            provider.clone(),
            store.clone(),
            clock.clone(),
        ));
        (provider, store, clock, router(service))
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Option<String>, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let cache = response
            .headers()
            .get(CACHE_HEADER)
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, cache, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_proxy_then_db_hit() {
        let (provider, _store, _clock, router) = app();
        provider.set_response("coins/markets", json!([{"id": "bitcoin"}]));

        let uri = "/api/coingecko/coins/markets?vs_currency=brl&per_page=10&order=market_cap_desc";
        let (status, cache, body) = get_json(router.clone(), uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cache.as_deref(), Some("proxy"));
        assert_eq!(body, json!([{"id": "bitcoin"}]));

        // same query, different parameter order
        let uri = "/api/coingecko/coins/markets?order=market_cap_desc&per_page=10&vs_currency=brl";
        let (_, cache, _) = get_json(router, uri).await;
        assert_eq!(cache.as_deref(), Some("db-hit"));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_derived_ohlc_header() {
        let (provider, store, clock, router) = app();
        provider.set_error("ohlc", ProviderError::Timeout(Duration::from_secs(10)));
        store
            .upsert(
                &CacheKey::market_chart("bitcoin", "brl", "1").signature(),
                &json!({"prices": [[1000, 10.0], [2000, 11.0]]}),
                clock.now(),
            )
            .await
            .unwrap();

        let (status, cache, body) =
            get_json(router, "/api/coingecko/coins/bitcoin/ohlc?vs_currency=brl&days=1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(cache.as_deref(), Some("derived"));
        assert_eq!(body, json!([[1000, 10.0, 10.0, 10.0, 10.0], [2000, 11.0, 11.0, 11.0, 11.0]]));
    }

    #[tokio::test]
    async fn test_error_status_and_message() {
        let (provider, _store, _clock, router) = app();
        provider.set_error(
            "market_chart",
            ProviderError::ApiError {
                status: 404,
                message: "coin not found".to_string(),
            },
        );

        let (status, cache, body) =
            get_json(router, "/api/coingecko/coins/nope/market_chart?days=1").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(cache.is_none());
        assert!(body["message"].as_str().unwrap().contains("coin not found"));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_gateway_timeout() {
        let (provider, _store, _clock, router) = app();
        provider.set_error("simple/price", ProviderError::Timeout(Duration::from_secs(10)));

        let (status, _, _) =
            get_json(router, "/api/coingecko/simple/price?ids=bitcoin&vs_currencies=brl").await;

        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_provider, _store, _clock, router) = app();

        let (status, _, body) = get_json(router, "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("Healthy"));
        assert_eq!(body["name"], json!("market_data_cache"));
    }

    #[tokio::test]
    async fn test_missing_ids_is_json_bad_request() {
        let (provider, _store, _clock, router) = app();

        let (status, cache, body) = get_json(router, "/api/coingecko/simple/price").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(cache.is_none());
        assert!(body["message"].as_str().unwrap().contains("ids"));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_query_is_json_bad_request() {
        let (provider, _store, _clock, router) = app();

        let (status, _, body) =
            get_json(router, "/api/coingecko/coins/markets?per_page=abc").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].is_string());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_numeric_sparkline_forwarded() {
        let (provider, _store, _clock, router) = app();
        provider.set_response("coins/markets", json!([]));

        let (status, cache, _) =
            get_json(router, "/api/coingecko/coins/markets?sparkline=1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(cache.as_deref(), Some("proxy"));
        assert!(provider.calls()[0].contains("sparkline=1"));
    }
}
