use crate::error::{GateError, Result};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

/// Identity of one in-flight request.
///
/// Always generated by the gate, never taken from the client, so two live
/// requests can't share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Response headers contributed by authentication.
///
/// Keeps insertion order. Names are normalized by `HeaderName`, so inserting
/// `WWW-Authenticate` after `www-authenticate` replaces the first value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideHeaders {
    entries: Vec<(HeaderName, HeaderValue)>,
}

impl SideHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from string pairs, rejecting names or values HTTP can't carry
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut headers = Self::new();
        for (name, value) in pairs {
            headers.try_insert(name.as_ref(), value.as_ref())?;
        }
        Ok(headers)
    }

    pub fn insert(&mut self, name: HeaderName, value: HeaderValue) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn try_insert(&mut self, name: &str, value: &str) -> Result<()> {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| GateError::InvalidHeader(format!("{}: {}", name, e)))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| GateError::InvalidHeader(format!("{}: {}", name, e)))?;
        self.insert(header_name, header_value);
        Ok(())
    }

    /// Case-insensitive lookup
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.as_str().eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.entries.iter().map(|(name, value)| (name, value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy every header into `target`, replacing values under the same name
    pub fn merge_into(&self, target: &mut HeaderMap) {
        for (name, value) in &self.entries {
            target.insert(name.clone(), value.clone());
        }
    }
}

impl FromIterator<(HeaderName, HeaderValue)> for SideHeaders {
    fn from_iter<T: IntoIterator<Item = (HeaderName, HeaderValue)>>(iter: T) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Per-request store for headers that have to reach the final response.
///
/// Cloning is cheap and every clone shares the same storage. Entries are
/// owned by a [`RequestContext`] and removed when it is finalized or dropped.
#[derive(Clone, Default)]
pub struct HeaderSidecar {
    entries: Arc<DashMap<RequestId, SideHeaders>>,
}

impl HeaderSidecar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a context for a new request
    pub fn open(&self) -> RequestContext {
        RequestContext {
            id: RequestId::new(),
            sidecar: self.clone(),
        }
    }

    /// Associate headers with a request. Last write wins.
    ///
    /// Only a live `RequestContext` may write, since its drop is what removes
    /// the entry again.
    pub(crate) fn put(&self, id: RequestId, headers: SideHeaders) {
        trace!(request_id = %id, count = headers.len(), "Recording side headers");
        self.entries.insert(id, headers);
    }

    /// Remove and return the headers stored for a request
    pub fn take_for_response(&self, id: RequestId) -> Option<SideHeaders> {
        self.entries.remove(&id).map(|(_, headers)| headers)
    }

    /// Number of requests currently holding headers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Scope of a single request in the sidecar.
///
/// Not `Clone`: exactly one owner exists per request. Dropping the context
/// releases whatever it recorded, so a request that never reaches
/// finalization leaves nothing behind.
pub struct RequestContext {
    id: RequestId,
    sidecar: HeaderSidecar,
}

impl RequestContext {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn record_headers(&self, headers: SideHeaders) {
        self.sidecar.put(self.id, headers);
    }

    pub fn take_headers(&self) -> Option<SideHeaders> {
        self.sidecar.take_for_response(self.id)
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        self.sidecar.entries.remove(&self.id);
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext").field("id", &self.id).finish()
    }
}
