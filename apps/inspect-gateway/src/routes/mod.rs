use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use inspect_core::ItemDetails;
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::{resolver::ResolveError, state::AppState};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/item", get(get_item))
        .route("/healthz", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct ItemQuery {
    link: Option<String>,
}

async fn get_item(
    State(state): State<AppState>,
    Query(query): Query<ItemQuery>,
) -> Result<Json<ItemDetails>, ApiError> {
    let link = query.link.ok_or(ApiError::InvalidLink)?;
    let details = state.resolver().resolve(&link).await?;
    Ok(Json(details))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "coordinator": state.coordinator_status(),
        "cached_items": state.resolver().cached_items(),
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.render_metrics(),
    )
}

#[derive(Debug)]
pub enum ApiError {
    InvalidLink,
    Upstream(ResolveError),
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::InvalidReference(_) => ApiError::InvalidLink,
            other => ApiError::Upstream(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidLink => {
                (StatusCode::BAD_REQUEST, "Invalid link format.").into_response()
            }
            ApiError::Upstream(err) => {
                warn!(error = %err, "item lookup failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error fetching item details.",
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{LookupPath, Resolver};
    use async_trait::async_trait;
    use axum::{
        body::{self, Body},
        http::Request,
    };
    use backoff_http::{FetchError, LookupError};
    use inspect_core::{RestItemInfo, RestSticker};
    use serde_json::Value;
    use std::{sync::Arc, time::Duration};
    use tower::util::ServiceExt;

    struct StubLookup {
        outcome: fn() -> Result<RestItemInfo, LookupError>,
    }

    #[async_trait]
    impl LookupPath for StubLookup {
        async fn lookup(
            &self,
            _reference: &str,
            _deadline: Option<Duration>,
        ) -> Result<RestItemInfo, LookupError> {
            (self.outcome)()
        }
    }

    fn app(outcome: fn() -> Result<RestItemInfo, LookupError>) -> Router {
        let resolver = Resolver::new(Arc::new(StubLookup { outcome }));
        build_router(AppState::new(resolver))
    }

    fn found() -> Result<RestItemInfo, LookupError> {
        Ok(RestItemInfo {
            floatvalue: Some(0.234),
            paintseed: Some(7),
            paintindex: Some(179),
            stickers: Some(vec![RestSticker {
                sticker_id: Some(201),
                name: None,
                wear: Some(0.1),
            }]),
        })
    }

    fn rate_limited() -> Result<RestItemInfo, LookupError> {
        Err(LookupError::Fetch(FetchError::RateLimited { attempts: 4 }))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    #[test_timeout::tokio_timeout_test]
    async fn item_lookup_returns_camel_case_json() {
        let (status, body) = get(
            app(found),
            "/api/item?link=steam%3A%2F%2Frungame%2F730%2F0%2F%2Bcsgo_econ_action_preview%2520M12345A1D2",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body,
            json!({
                "floatValue": 0.234,
                "paintSeed": 7,
                "paintIndex": 179,
                "stickers": [{ "name": "201", "wear": 0.1 }]
            })
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn missing_or_bad_link_is_400() {
        for uri in ["/api/item", "/api/item?link=", "/api/item?link=no-token"] {
            let (status, body) = get(app(found), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body, b"Invalid link format.");
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn lookup_failure_is_500() {
        let (status, body) = get(app(rate_limited), "/api/item?link=M1A").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, b"Error fetching item details.");
    }

    #[test_timeout::tokio_timeout_test]
    async fn health_reports_coordinator_and_cache() {
        let app = app(found);
        let (status, _) = get(app.clone(), "/api/item?link=M1A").await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = get(app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body,
            json!({ "status": "ok", "coordinator": "disabled", "cached_items": 1 })
        );
    }
}
