//! HTTP routes for the playground.
//!
//! | Route | Handler |
//! |-------|---------|
//! | `GET /` | Landing page |
//! | `POST /check-url` | Admission plus robots.txt pre-flight, always 200 |
//! | `POST /scrape` | Fetch and extract; errors map to 400/429/408/502/500 |
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use playground_webfetch::{
    CheckOutcome, ErrorCategory, ErrorCode, Gateway, ScrapeOutput, ScrapeRequest, WebFetchError,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::assets;

#[derive(Debug, Default, Deserialize)]
pub struct CheckRequest {
    #[serde(default)]
    pub url: String,
}

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/", get(home_handler))
        .route("/check-url", post(check_url_handler))
        .route("/scrape", post(scrape_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

async fn home_handler() -> Html<&'static str> {
    Html(assets::index_html())
}

// An unreadable body is treated as an empty URL.
async fn check_url_handler(
    State(gateway): State<Arc<Gateway>>,
    payload: Result<Json<CheckRequest>, JsonRejection>,
) -> Json<CheckOutcome> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    Json(gateway.check_url(&request.url).await)
}

async fn scrape_handler(
    State(gateway): State<Arc<Gateway>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    payload: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Result<Json<ScrapeOutput>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        ApiError(
            WebFetchError::new(ErrorCode::BadArgs, "invalid request body", false)
                .with_detail("error", rejection.body_text()),
        )
    })?;

    let client_id = peer.ip().to_string();
    gateway
        .scrape(request, &client_id)
        .await
        .map(Json)
        .map_err(ApiError)
}

/// HTTP status for each error category.
pub fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::BadRequest => StatusCode::BAD_REQUEST,
        ErrorCategory::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::Timeout => StatusCode::REQUEST_TIMEOUT,
        ErrorCategory::UpstreamFetch => StatusCode::BAD_GATEWAY,
        ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// Error response wrapper
pub struct ApiError(pub WebFetchError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.category());
        let retry_after_secs = self
            .0
            .detail("retry_after_ms")
            .and_then(|ms| ms.parse::<u64>().ok())
            .map(|ms| ms.div_ceil(1000).max(1));

        let mut response = (status, Json(self.0.to_json())).into_response();
        if let Some(secs) = retry_after_secs {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
