use crate::config::StaticAuthConfig;
use crate::error::{GateError, Result};
use crate::sidecar::SideHeaders;
use async_trait::async_trait;
use axum::http::{header, request::Parts, HeaderMap, HeaderValue};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

use super::{AuthenticationResult, Authenticator, Principal};

type TokenDigest = [u8; 32];

/// Authenticates bearer tokens listed in the configuration.
///
/// Only SHA-256 digests of the tokens are kept in memory.
pub struct StaticTokenAuthenticator {
    principals: HashMap<TokenDigest, Principal>,
    login_url: Option<String>,
    challenge: HeaderValue,
    invalid_token_challenge: HeaderValue,
    success_headers: SideHeaders,
}

impl StaticTokenAuthenticator {
    /// Create a new static authenticator from configuration
    pub fn new(config: &StaticAuthConfig) -> Result<Self> {
        let principals = config
            .tokens
            .iter()
            .map(|entry| {
                let principal =
                    Principal::new(entry.username.clone()).with_roles(entry.roles.iter().cloned());
                (digest(&entry.token), principal)
            })
            .collect();

        let challenge = HeaderValue::from_str(&config.challenge)
            .map_err(|e| GateError::Config(format!("Invalid challenge header: {}", e)))?;
        let invalid_token_challenge =
            HeaderValue::from_str(&format!("{}, error=\"invalid_token\"", config.challenge))
                .map_err(|e| GateError::Config(format!("Invalid challenge header: {}", e)))?;

        let success_headers = SideHeaders::from_pairs(&config.success_headers)
            .map_err(|e| GateError::Config(format!("Invalid success header: {}", e)))?;

        Ok(Self {
            principals,
            login_url: config.login_url.clone(),
            challenge,
            invalid_token_challenge,
            success_headers,
        })
    }

    /// Number of configured tokens
    pub fn token_count(&self) -> usize {
        self.principals.len()
    }

    fn challenge_headers(&self, value: &HeaderValue) -> SideHeaders {
        std::iter::once((header::WWW_AUTHENTICATE, value.clone())).collect()
    }

    /// Where to send a browser that arrived without credentials
    fn login_redirect(&self, request: &Parts) -> Option<String> {
        let login_url = self.login_url.as_ref()?;
        if !accepts_html(&request.headers) {
            return None;
        }

        let next = request
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let separator = if login_url.contains('?') { '&' } else { '?' };

        Some(format!(
            "{}{}next={}",
            login_url,
            separator,
            url::form_urlencoded::byte_serialize(next.as_bytes()).collect::<String>()
        ))
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, request: &Parts) -> Result<AuthenticationResult> {
        let token = match extract_bearer_token(&request.headers) {
            Ok(Some(token)) => token,
            Ok(None) => {
                let challenge = self.challenge_headers(&self.challenge);
                return Ok(match self.login_redirect(request) {
                    Some(location) => {
                        debug!(location = %location, "No credentials, redirecting to login");
                        AuthenticationResult::redirected(location).with_headers(challenge)
                    }
                    None => AuthenticationResult::not_handled().with_headers(challenge),
                });
            }
            Err(cause) => {
                return Ok(AuthenticationResult::failed(cause)
                    .with_headers(self.challenge_headers(&self.invalid_token_challenge)));
            }
        };

        match self.principals.get(&digest(token)) {
            Some(principal) => {
                let result = AuthenticationResult::succeeded(principal.clone());
                if self.success_headers.is_empty() {
                    Ok(result)
                } else {
                    Ok(result.with_headers(self.success_headers.clone()))
                }
            }
            None => Ok(AuthenticationResult::failed(GateError::InvalidToken(
                "Unknown bearer token".to_string(),
            ))
            .with_headers(self.challenge_headers(&self.invalid_token_challenge))),
        }
    }
}

fn digest(token: &str) -> TokenDigest {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(token.as_bytes()));
    out
}

/// Extract a bearer token; `Ok(None)` when no Authorization header is present
fn extract_bearer_token(headers: &HeaderMap) -> Result<Option<&str>> {
    let Some(auth_header) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let auth_str = auth_header
        .to_str()
        .map_err(|_| GateError::InvalidToken("Invalid authorization header".to_string()))?;

    let (scheme, token) = auth_str.split_once(' ').ok_or_else(|| {
        GateError::InvalidToken("Authorization header must start with 'Bearer '".to_string())
    })?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(GateError::InvalidToken(
            "Authorization header must start with 'Bearer '".to_string(),
        ));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(GateError::InvalidToken("Empty bearer token".to_string()));
    }

    Ok(Some(token))
}

fn accepts_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}
