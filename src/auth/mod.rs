pub mod remote;
pub mod static_tokens;

use crate::config::AuthProviderConfig;
use crate::error::{GateError, Result};
use crate::sidecar::SideHeaders;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Identity established by authentication
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// User name; empty for the anonymous principal
    #[serde(default)]
    pub username: String,
    /// Roles granted to the user
    #[serde(default)]
    pub roles: Vec<String>,
    /// Additional provider-specific attributes
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Principal {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    /// The principal used when security is switched off
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }
}

/// Handlers behind the gate can take the principal as an extractor.
#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = GateError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(GateError::MissingCredentials)
    }
}

/// Result of one authentication attempt.
///
/// The gate matches this without a wildcard arm.
#[derive(Debug)]
pub enum AuthenticationOutcome {
    Succeeded { principal: Principal },
    Redirected { location: String },
    Failed { cause: GateError },
    NotApplicable,
}

impl AuthenticationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::Redirected { .. } => "redirected",
            Self::Failed { .. } => "failed",
            Self::NotApplicable => "not_applicable",
        }
    }
}

/// Outcome plus the response headers the mechanism wants sent back
#[derive(Debug)]
pub struct AuthenticationResult {
    outcome: AuthenticationOutcome,
    response_headers: Option<SideHeaders>,
}

impl AuthenticationResult {
    pub fn succeeded(principal: Principal) -> Self {
        AuthenticationOutcome::Succeeded { principal }.into()
    }

    pub fn redirected(location: impl Into<String>) -> Self {
        AuthenticationOutcome::Redirected {
            location: location.into(),
        }
        .into()
    }

    pub fn failed(cause: GateError) -> Self {
        AuthenticationOutcome::Failed { cause }.into()
    }

    pub fn not_handled() -> Self {
        AuthenticationOutcome::NotApplicable.into()
    }

    pub fn with_headers(mut self, headers: SideHeaders) -> Self {
        self.response_headers = Some(headers);
        self
    }

    pub fn outcome(&self) -> &AuthenticationOutcome {
        &self.outcome
    }

    pub fn response_headers(&self) -> Option<&SideHeaders> {
        self.response_headers.as_ref()
    }

    pub fn into_parts(self) -> (AuthenticationOutcome, Option<SideHeaders>) {
        (self.outcome, self.response_headers)
    }
}

impl From<AuthenticationOutcome> for AuthenticationResult {
    fn from(outcome: AuthenticationOutcome) -> Self {
        Self {
            outcome,
            response_headers: None,
        }
    }
}

/// Authentication mechanism consulted by the gate.
///
/// `Err` means the mechanism itself is broken (unreachable service, bad
/// response). An expected rejection is `Ok` with a `Failed` outcome.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, request: &Parts) -> Result<AuthenticationResult>;
}

/// Build the authenticator selected in configuration
pub fn build_authenticator(config: &AuthProviderConfig) -> Result<Arc<dyn Authenticator>> {
    let authenticator: Arc<dyn Authenticator> = match config {
        AuthProviderConfig::Static(static_config) => Arc::new(
            static_tokens::StaticTokenAuthenticator::new(static_config)?,
        ),
        AuthProviderConfig::Remote(remote_config) => {
            Arc::new(remote::RemoteAuthenticator::new(remote_config)?)
        }
    };
    Ok(authenticator)
}
