use crate::auth::Principal;
use crate::config::UpstreamConfig;
use crate::error::{GateError, Result};
use crate::metrics;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, Response},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Header carrying the authenticated user to the upstream
pub const AUTHENTICATED_USER_HEADER: &str = "x-authenticated-user";

/// Upstream forwarding state
#[derive(Clone)]
pub struct UpstreamState {
    client: reqwest::Client,
    base_url: Arc<str>,
}

impl UpstreamState {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GateError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: Arc::from(config.url.trim_end_matches('/')),
        })
    }

    fn target_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url, path_and_query)
    }
}

/// Forward an allowed request to the upstream service
pub async fn forward_handler(
    State(state): State<UpstreamState>,
    principal: Option<Principal>,
    req: Request,
) -> Result<Response<Body>> {
    let method = req.method().clone();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut headers = req.headers().clone();
    headers.remove(AUTHENTICATED_USER_HEADER);
    if let Some(principal) = principal.as_ref().filter(|p| !p.is_anonymous()) {
        let value = HeaderValue::from_str(&principal.username).map_err(|e| {
            GateError::InvalidHeader(format!("{}: {}", AUTHENTICATED_USER_HEADER, e))
        })?;
        headers.insert(AUTHENTICATED_USER_HEADER, value);
    }

    let body_bytes = req
        .into_body()
        .collect()
        .await
        .map_err(|e| GateError::Upstream(format!("Failed to read request body: {}", e)))?
        .to_bytes();

    let target = state.target_url(&path_and_query);
    debug!(target = %target, "Forwarding to upstream");

    match send_request(&state.client, method.clone(), headers, body_bytes, &target).await {
        Ok(response) => {
            info!(
                method = %method,
                path = %path_and_query,
                status = %response.status(),
                "Request completed"
            );
            metrics::record_upstream_request(response.status().as_u16());
            Ok(response)
        }
        Err(e) => {
            warn!(method = %method, path = %path_and_query, error = %e, "Request failed");
            metrics::record_upstream_request(e.status_code().as_u16());
            Err(e)
        }
    }
}

/// Send request to the upstream service
async fn send_request(
    client: &reqwest::Client,
    method: Method,
    headers: HeaderMap,
    body_bytes: Bytes,
    target: &str,
) -> Result<Response<Body>> {
    let mut upstream_req = client.request(method, target).body(body_bytes);

    // Forward headers (excluding hop-by-hop headers)
    for (name, value) in headers.iter() {
        if !is_hop_by_hop_header(name.as_str()) && *name != axum::http::header::HOST {
            upstream_req = upstream_req.header(name, value);
        }
    }

    let upstream_response = upstream_req.send().await.map_err(|e| {
        if e.is_timeout() {
            GateError::Timeout(format!("Upstream request timed out: {}", e))
        } else {
            GateError::Upstream(format!("Upstream request failed: {}", e))
        }
    })?;

    let mut response_builder = Response::builder().status(upstream_response.status());
    for (name, value) in upstream_response.headers().iter() {
        if !is_hop_by_hop_header(name.as_str()) {
            response_builder = response_builder.header(name, value);
        }
    }

    let body_bytes = upstream_response
        .bytes()
        .await
        .map_err(|e| GateError::Upstream(format!("Failed to read upstream response: {}", e)))?;

    response_builder
        .body(Body::from(body_bytes))
        .map_err(|e| GateError::Internal(format!("Failed to build response: {}", e)))
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
