//! Request logging middleware
//!
//! The control API exchanges small JSON documents, so logging stops at
//! headers.

use super::super::state::ServerState;
use crate::server::metrics::record_http_request;
use axum::extract::{MatchedPath, State};
use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::info;

#[derive(PartialEq, PartialOrd, Clone, Debug, Default, clap::ValueEnum)]
pub enum RequestsLoggingLevel {
    None,
    #[default]
    Path,
    Headers,
}

impl std::fmt::Display for RequestsLoggingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Route template of the request, so metric labels stay bounded.
fn route_label<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string())
}

fn log_headers(direction: &str, headers: &HeaderMap) {
    info!("  {} Headers:", direction);
    for (name, value) in headers {
        info!("    {:?}: {:?}", name, value);
    }
}

pub async fn log_requests(
    State(state): State<ServerState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let level = state.config.requests_logging_level.clone();
    let start = Instant::now();

    let method = request.method().to_string();
    let route = route_label(&request);

    if level > RequestsLoggingLevel::None {
        info!(">>> {} {}", method, request.uri());
    }
    if level >= RequestsLoggingLevel::Headers {
        log_headers("Req", request.headers());
    }

    let response = next.run(request).await;

    if level >= RequestsLoggingLevel::Headers {
        log_headers("Resp", response.headers());
    }

    let status = response.status().as_u16();
    let duration = start.elapsed();
    if level > RequestsLoggingLevel::None {
        info!("<<< {} {} {} ({}ms)", status, method, route, duration.as_millis());
    }

    record_http_request(&method, &route, status, duration);

    response
}
