//! Per-request authentication decision.
//!
//! [`AuthGate::decide`] runs before the handler and yields a [`Decision`]
//! together with a [`Finalizer`]. The finalizer is the only way to reach the
//! headers authentication recorded for that request, and it is consumed by
//! [`Finalizer::finalize`] once the outgoing response exists. Deciding and
//! finalizing therefore happen once each, in that order, for the same request.

pub mod middleware;

use crate::auth::{AuthenticationOutcome, Authenticator, Principal};
use crate::error::ErrorResponse;
use crate::flags::FeatureFlags;
use crate::metrics;
use crate::sidecar::{HeaderSidecar, RequestContext, RequestId, SideHeaders};
use axum::http::request::Parts;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// What the pipeline should do with a request
#[derive(Debug)]
pub enum Decision {
    /// Run the handler on behalf of this principal
    Allow(Principal),
    /// Answer with a redirect; the handler must not run
    Redirect(String),
    /// Answer with this error; the handler must not run
    Reject(ErrorResponse),
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow(_) => "allow",
            Decision::Redirect(_) => "redirect",
            Decision::Reject(_) => "reject",
        }
    }
}

/// A response type that authentication headers can be merged into
pub trait MergeHeaders {
    fn merge_headers(&mut self, headers: &SideHeaders);
}

impl<B> MergeHeaders for axum::http::Response<B> {
    fn merge_headers(&mut self, headers: &SideHeaders) {
        headers.merge_into(self.headers_mut());
    }
}

impl MergeHeaders for ErrorResponse {
    fn merge_headers(&mut self, headers: &SideHeaders) {
        headers.merge_into(self.headers_mut());
    }
}

/// Pending finalization of one decided request
#[derive(Debug)]
#[must_use = "a decided request has to be finalized to deliver its authentication headers"]
pub struct Finalizer {
    ctx: RequestContext,
}

impl Finalizer {
    pub fn request_id(&self) -> RequestId {
        self.ctx.id()
    }

    /// Merge the headers recorded for this request into its response
    pub fn finalize<R: MergeHeaders>(self, mut response: R) -> R {
        if let Some(headers) = self.ctx.take_headers() {
            response.merge_headers(&headers);
            metrics::record_side_headers_merged(headers.len());
        }
        response
    }
}

/// Authentication gate in front of the handler pipeline
#[derive(Clone)]
pub struct AuthGate {
    flags: Arc<dyn FeatureFlags>,
    authenticator: Arc<dyn Authenticator>,
    sidecar: HeaderSidecar,
}

impl AuthGate {
    pub fn new(flags: Arc<dyn FeatureFlags>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            flags,
            authenticator,
            sidecar: HeaderSidecar::new(),
        }
    }

    pub fn sidecar(&self) -> &HeaderSidecar {
        &self.sidecar
    }

    /// Decide what happens to a request
    pub async fn decide(&self, request: &Parts) -> (Decision, Finalizer) {
        let ctx = self.sidecar.open();
        let decision = self.evaluate(&ctx, request).await;
        (decision, Finalizer { ctx })
    }

    async fn evaluate(&self, ctx: &RequestContext, request: &Parts) -> Decision {
        let request_id = ctx.id();

        // An unavailable feature source falls through to authentication
        if self.flags.is_available() && !self.flags.is_security_enabled() {
            debug!(request_id = %request_id, "Security disabled, continuing without credentials");
            metrics::record_decision("bypass");
            return Decision::Allow(Principal::anonymous());
        }

        let started = Instant::now();
        let result = match self.authenticator.authenticate(request).await {
            Ok(result) => result,
            Err(err) => {
                error!(
                    tags = "error,authentication",
                    request_id = %request_id,
                    error = %err,
                    "Authentication provider failed"
                );
                metrics::record_authenticate_error();
                metrics::record_decision("reject");
                return Decision::Reject(ErrorResponse::from_error(&err));
            }
        };
        metrics::record_authenticate_duration(started.elapsed().as_secs_f64());

        let (outcome, response_headers) = result.into_parts();
        if let Some(headers) = response_headers {
            ctx.record_headers(headers);
        }

        let decision = match outcome {
            AuthenticationOutcome::Succeeded { principal } => {
                debug!(
                    request_id = %request_id,
                    user = %principal.username,
                    "Authentication succeeded"
                );
                Decision::Allow(principal)
            }
            AuthenticationOutcome::Redirected { location } => {
                debug!(
                    request_id = %request_id,
                    location = %location,
                    "Authentication requires redirect"
                );
                Decision::Redirect(location)
            }
            AuthenticationOutcome::Failed { cause } => {
                info!(
                    tags = "info,authentication",
                    request_id = %request_id,
                    cause = %cause,
                    "Authentication attempt failed"
                );
                Decision::Reject(ErrorResponse::from_error(&cause))
            }
            AuthenticationOutcome::NotApplicable => {
                debug!(
                    request_id = %request_id,
                    "No authentication provider handled the request"
                );
                Decision::Reject(ErrorResponse::unauthorized())
            }
        };

        metrics::record_decision(decision.as_str());
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthenticationResult;
    use crate::config::FeatureConfig;
    use crate::error::{GateError, Result};
    use crate::flags::FeatureState;
    use async_trait::async_trait;
    use axum::http::{Request, Response, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Authenticator returning a fixed header and a principal taken from `x-user`
    struct EchoAuthenticator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Authenticator for EchoAuthenticator {
        async fn authenticate(&self, request: &Parts) -> Result<AuthenticationResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let user = request
                .headers
                .get("x-user")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| GateError::Provider("no user".to_string()))?;
            Ok(AuthenticationResult::succeeded(Principal::new(user))
                .with_headers(SideHeaders::from_pairs([("X-Auth-User", user)])?))
        }
    }

    fn gate(features: FeatureConfig) -> (AuthGate, Arc<EchoAuthenticator>) {
        let authenticator = Arc::new(EchoAuthenticator {
            calls: AtomicUsize::new(0),
        });
        let gate = AuthGate::new(Arc::new(FeatureState::new(&features)), authenticator.clone());
        (gate, authenticator)
    }

    fn request(user: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(user) = user {
            builder = builder.header("x-user", user);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_decide_and_finalize() {
        let (gate, authenticator) = gate(FeatureConfig::default());

        let (decision, finalizer) = gate.decide(&request(Some("alice"))).await;
        assert!(matches!(decision, Decision::Allow(ref p) if p.username == "alice"));
        assert_eq!(authenticator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(gate.sidecar().len(), 1);

        let request_id = finalizer.request_id();
        let response = finalizer.finalize(Response::new(()));
        assert_eq!(response.headers().get("x-auth-user").unwrap(), "alice");
        assert!(gate.sidecar().take_for_response(request_id).is_none());
        assert!(gate.sidecar().is_empty());
    }

    #[tokio::test]
    async fn test_security_disabled_bypasses_authenticator() {
        let (gate, authenticator) = gate(FeatureConfig {
            available: true,
            security_enabled: false,
        });

        let (decision, finalizer) = gate.decide(&request(Some("alice"))).await;
        match decision {
            Decision::Allow(principal) => assert!(principal.is_anonymous()),
            other => panic!("unexpected decision: {:?}", other),
        }
        assert_eq!(authenticator.calls.load(Ordering::SeqCst), 0);

        let response = finalizer.finalize(Response::new(()));
        assert!(response.headers().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_flags_fall_through() {
        let (gate, authenticator) = gate(FeatureConfig {
            available: false,
            security_enabled: false,
        });

        let (decision, _finalizer) = gate.decide(&request(Some("bob"))).await;
        assert!(matches!(decision, Decision::Allow(ref p) if p.username == "bob"));
        assert_eq!(authenticator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transport_error_rejects_without_details() {
        let (gate, _) = gate(FeatureConfig::default());

        let (decision, finalizer) = gate.decide(&request(None)).await;
        match decision {
            Decision::Reject(error) => {
                assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
                assert!(!error.message().contains("no user"));
                let error = finalizer.finalize(error);
                assert!(error.headers().is_empty());
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unfinalized_request_leaves_nothing_behind() {
        let (gate, _) = gate(FeatureConfig::default());

        let (_decision, finalizer) = gate.decide(&request(Some("alice"))).await;
        let request_id = finalizer.request_id();
        assert_eq!(gate.sidecar().len(), 1);

        drop(finalizer);

        assert!(gate.sidecar().is_empty());
        assert!(gate.sidecar().take_for_response(request_id).is_none());
    }

    #[test]
    fn test_decision_names() {
        assert_eq!(Decision::Allow(Principal::anonymous()).as_str(), "allow");
        assert_eq!(Decision::Redirect("/login".to_string()).as_str(), "redirect");
        assert_eq!(
            Decision::Reject(ErrorResponse::unauthorized()).as_str(),
            "reject"
        );
    }
}
