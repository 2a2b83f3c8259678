// Exporter HTTP API implementation
// This file provides the scrape endpoint, a landing page and a health check
//
// Numan Thabit 2025 Nov

use crate::aggregator::Aggregator;
use crate::metrics;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub metrics_path: String,
}

/// Create the HTTP router serving `metrics_path`, `/` and `/health`.
pub fn create_router(aggregator: Arc<Aggregator>, metrics_path: &str) -> Router {
    let state = AppState {
        aggregator,
        metrics_path: metrics_path.to_string(),
    };
    Router::new()
        .route("/", get(landing_page))
        .route("/health", get(health_check))
        .route(metrics_path, get(scrape))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Run one collection cycle and render it
async fn scrape(State(state): State<AppState>) -> Response {
    let reports = state.aggregator.collect().await;
    match metrics::render(state.aggregator.labels(), &reports) {
        Ok(body) => ([(header::CONTENT_TYPE, metrics::CONTENT_TYPE)], body).into_response(),
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn landing_page(State(state): State<AppState>) -> Html<String> {
    let path = &state.metrics_path;
    Html(format!(
        "<html>\n  <head>\n    <title>Downloads Exporter</title>\n  </head>\n  <body>\n    \
         <h1>Downloads Exporter</h1>\n    <p>\n      <a href=\"{path}\">{path}</a>\n    </p>\n  \
         </body>\n</html>\n"
    ))
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}
