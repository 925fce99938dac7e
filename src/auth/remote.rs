use crate::config::RemoteAuthConfig;
use crate::error::{GateError, Result};
use crate::sidecar::SideHeaders;
use async_trait::async_trait;
use axum::http::{request::Parts, HeaderName, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::{AuthenticationResult, Authenticator, Principal};

pub const ORIGINAL_METHOD_HEADER: &str = "x-original-method";
pub const ORIGINAL_URI_HEADER: &str = "x-original-uri";

/// Verdict returned by the authentication service
#[derive(Debug, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum Verdict {
    Succeeded {
        principal: Principal,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    Redirected {
        location: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    Failed {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        status: Option<u16>,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    NotHandled {
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

impl Verdict {
    fn into_result(self) -> Result<AuthenticationResult> {
        let (result, headers) = match self {
            Verdict::Succeeded { principal, headers } => {
                (AuthenticationResult::succeeded(principal), headers)
            }
            Verdict::Redirected { location, headers } => {
                (AuthenticationResult::redirected(location), headers)
            }
            Verdict::Failed {
                message,
                status,
                headers,
            } => {
                let message = message.unwrap_or_else(|| "invalid credentials".to_string());
                let cause = if status == Some(StatusCode::FORBIDDEN.as_u16()) {
                    GateError::Forbidden(message)
                } else {
                    GateError::Unauthorized(message)
                };
                (AuthenticationResult::failed(cause), headers)
            }
            Verdict::NotHandled { headers } => (AuthenticationResult::not_handled(), headers),
        };

        if headers.is_empty() {
            return Ok(result);
        }

        let headers = SideHeaders::from_pairs(&headers)
            .map_err(|e| GateError::Provider(format!("Invalid header in verdict: {}", e)))?;
        Ok(result.with_headers(headers))
    }
}

/// Delegates the decision to an external authentication service.
///
/// The service receives the forwarded credentials plus the original method
/// and URI, and answers with a JSON verdict.
pub struct RemoteAuthenticator {
    client: reqwest::Client,
    url: String,
    forward_headers: Vec<HeaderName>,
}

impl RemoteAuthenticator {
    pub fn new(config: &RemoteAuthConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GateError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let forward_headers = config
            .forward_headers
            .iter()
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                    GateError::Config(format!("Invalid forwarded header name: {}", name))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            forward_headers,
        })
    }
}

#[async_trait]
impl Authenticator for RemoteAuthenticator {
    async fn authenticate(&self, request: &Parts) -> Result<AuthenticationResult> {
        let original_uri = request
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let mut verify = self
            .client
            .get(&self.url)
            .header(ORIGINAL_METHOD_HEADER, request.method.as_str())
            .header(ORIGINAL_URI_HEADER, original_uri);

        for name in &self.forward_headers {
            for value in request.headers.get_all(name) {
                verify = verify.header(name, value);
            }
        }

        let response = verify.send().await.map_err(|e| {
            if e.is_timeout() {
                GateError::ProviderUnavailable(format!("Authentication service timed out: {}", e))
            } else if e.is_connect() {
                GateError::ProviderUnavailable(format!(
                    "Failed to connect to authentication service: {}",
                    e
                ))
            } else {
                GateError::Provider(format!("Authentication request failed: {}", e))
            }
        })?;

        let status = response.status();
        debug!(status = %status, "Authentication service responded");

        if !status.is_success() {
            let message = format!("Authentication service returned {}", status);
            return Err(match status {
                StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT => GateError::ProviderUnavailable(message),
                _ => GateError::Provider(message),
            });
        }

        let verdict: Verdict = response
            .json()
            .await
            .map_err(|e| GateError::Provider(format!("Invalid verdict: {}", e)))?;

        verdict.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthenticationOutcome;
    use axum::http::Request;
    use serde_json::json;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn authenticator(url: String) -> RemoteAuthenticator {
        RemoteAuthenticator::new(&RemoteAuthConfig {
            url,
            forward_headers: vec!["authorization".to_string(), "cookie".to_string()],
            timeout_secs: 2,
        })
        .unwrap()
    }

    fn request() -> Parts {
        Request::builder()
            .method("POST")
            .uri("/api/data?x=1")
            .header("Authorization", "Bearer abc")
            .header("X-Unrelated", "not forwarded")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    async fn verdict_server(body: serde_json::Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_forwards_credentials_and_original_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/verify"))
            .and(header("authorization", "Bearer abc"))
            .and(header(ORIGINAL_METHOD_HEADER, "POST"))
            .and(header(ORIGINAL_URI_HEADER, "/api/data?x=1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "outcome": "succeeded",
                "principal": { "username": "alice", "roles": ["admin"] },
                "headers": { "X-Auth-Challenge": "none" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = authenticator(format!("{}/verify", server.uri()))
            .authenticate(&request())
            .await
            .unwrap();

        let (outcome, headers) = result.into_parts();
        match outcome {
            AuthenticationOutcome::Succeeded { principal } => {
                assert_eq!(principal.username, "alice");
                assert_eq!(principal.roles, vec!["admin".to_string()]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(headers.unwrap().get("x-auth-challenge").unwrap(), "none");
    }

    #[tokio::test]
    async fn test_redirect_verdict() {
        let server = verdict_server(json!({ "outcome": "redirected", "location": "/login" })).await;

        let result = authenticator(format!("{}/verify", server.uri()))
            .authenticate(&request())
            .await
            .unwrap();

        assert!(matches!(
            result.outcome(),
            AuthenticationOutcome::Redirected { location } if location == "/login"
        ));
        assert!(result.response_headers().is_none());
    }

    #[tokio::test]
    async fn test_failed_verdict_keeps_message_and_headers() {
        let server = verdict_server(json!({
            "outcome": "failed",
            "message": "bad token",
            "headers": { "WWW-Authenticate": "Negotiate" }
        }))
        .await;

        let (outcome, headers) = authenticator(format!("{}/verify", server.uri()))
            .authenticate(&request())
            .await
            .unwrap()
            .into_parts();

        match outcome {
            AuthenticationOutcome::Failed { cause } => {
                assert!(matches!(cause, GateError::Unauthorized(ref msg) if msg == "bad token"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(headers.unwrap().get("www-authenticate").unwrap(), "Negotiate");
    }

    #[tokio::test]
    async fn test_forbidden_verdict() {
        let server = verdict_server(json!({ "outcome": "failed", "status": 403 })).await;

        let result = authenticator(format!("{}/verify", server.uri()))
            .authenticate(&request())
            .await
            .unwrap();

        assert!(matches!(
            result.outcome(),
            AuthenticationOutcome::Failed {
                cause: GateError::Forbidden(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_not_handled_verdict() {
        let server = verdict_server(json!({ "outcome": "not_handled" })).await;

        let result = authenticator(format!("{}/verify", server.uri()))
            .authenticate(&request())
            .await
            .unwrap();

        assert!(matches!(result.outcome(), AuthenticationOutcome::NotApplicable));
    }

    #[tokio::test]
    async fn test_service_error_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = authenticator(format!("{}/verify", server.uri()))
            .authenticate(&request())
            .await;

        assert!(matches!(result, Err(GateError::Provider(_))));
    }

    #[tokio::test]
    async fn test_unavailable_service_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = authenticator(format!("{}/verify", server.uri()))
            .authenticate(&request())
            .await;

        assert!(matches!(result, Err(GateError::ProviderUnavailable(_))));
    }

    #[tokio::test]
    async fn test_malformed_verdict_is_transport_error() {
        let server = verdict_server(json!({ "outcome": "maybe" })).await;

        let result = authenticator(format!("{}/verify", server.uri()))
            .authenticate(&request())
            .await;

        assert!(matches!(result, Err(GateError::Provider(_))));
    }
}
