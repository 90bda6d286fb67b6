//! Negotiated proxy credential cache
//!
//! One credential per proxy endpoint, produced by at most one negotiation
//! per endpoint for the lifetime of the cache. Readers never take the
//! negotiation lock; writers hold it for the full handshake so concurrent
//! requests against the same unauthenticated proxy wait for the winner
//! instead of negotiating again.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use http::header::PROXY_AUTHORIZATION;
use http::{HeaderMap, HeaderValue};
use tokio::sync::Mutex;

use crate::resolver::ProxyEndpoint;
use crate::{Error, Result};

/// A negotiated, reusable set of proxy authentication headers.
///
/// Immutable once produced. The cache hands out clones; applying one merges
/// its headers into a request's proxy headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialHeader {
    headers: HeaderMap,
}

impl CredentialHeader {
    /// Wrap an existing header set.
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }

    /// Package a raw token as `Proxy-Authorization: <scheme> <base64(token)>`.
    pub fn for_token(scheme: &str, token: &[u8]) -> Result<Self> {
        let value = format!("{} {}", scheme, STANDARD.encode(token));
        let value = HeaderValue::from_str(&value)
            .map_err(|e| Error::Internal(format!("Invalid credential header: {}", e)))?;
        let mut headers = HeaderMap::new();
        headers.insert(PROXY_AUTHORIZATION, value);
        Ok(Self { headers })
    }

    /// Merge the credential into `target`.
    pub fn apply(&self, target: &mut HeaderMap) {
        for (name, value) in &self.headers {
            target.insert(name.clone(), value.clone());
        }
    }

    /// The headers carried by this credential.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// Per-endpoint credential store with single-flight negotiation.
pub struct CredentialCache {
    entries: RwLock<HashMap<ProxyEndpoint, CredentialHeader>>,
    negotiation: Mutex<()>,
    negotiation_timeout: Option<Duration>,
}

impl CredentialCache {
    /// Create an empty cache with unbounded negotiation.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            negotiation: Mutex::new(()),
            negotiation_timeout: None,
        }
    }

    /// Create an empty cache whose negotiations (including time spent
    /// waiting behind another caller's negotiation) are bounded by `bound`.
    pub fn with_timeout(bound: Duration) -> Self {
        Self {
            negotiation_timeout: Some(bound),
            ..Self::new()
        }
    }

    /// Look up the credential for `endpoint` without blocking on any
    /// in-flight negotiation.
    pub fn get(&self, endpoint: &ProxyEndpoint) -> Option<CredentialHeader> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
            .cloned()
    }

    /// Return the cached credential for `endpoint`, negotiating it first if
    /// absent.
    ///
    /// At most one `negotiate` future runs per endpoint at a time; callers
    /// that race into the slow path wait for the winner and observe its
    /// result. A failed negotiation stores nothing, releases the lock, and
    /// propagates only to the caller that ran it, so the next request starts
    /// over from scratch.
    pub async fn get_or_negotiate<F, Fut>(
        &self,
        endpoint: &ProxyEndpoint,
        negotiate: F,
    ) -> Result<CredentialHeader>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CredentialHeader>>,
    {
        if let Some(credential) = self.get(endpoint) {
            return Ok(credential);
        }

        let slow_path = async {
            let _guard = self.negotiation.lock().await;

            // Another caller may have finished while we waited for the lock.
            if let Some(credential) = self.get(endpoint) {
                return Ok(credential);
            }

            let credential = negotiate().await?;
            self.entries
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(endpoint.clone(), credential.clone());
            Ok(credential)
        };

        match self.negotiation_timeout {
            Some(bound) => tokio::time::timeout(bound, slow_path)
                .await
                .map_err(|_| Error::NegotiationTimeout)?,
            None => slow_path.await,
        }
    }
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> ProxyEndpoint {
        ProxyEndpoint::parse("proxy.example:8080").unwrap()
    }

    fn credential(token: &[u8]) -> CredentialHeader {
        CredentialHeader::for_token("NTLM", token).unwrap()
    }

    #[test]
    fn for_token_formats_header() {
        let header = credential(b"tok");
        assert_eq!(
            header.headers().get(PROXY_AUTHORIZATION).unwrap(),
            "NTLM dG9r"
        );
    }

    #[tokio::test]
    async fn negotiates_once_then_serves_from_cache() {
        let cache = CredentialCache::new();
        let endpoint = endpoint();

        let first = cache
            .get_or_negotiate(&endpoint, || async { Ok(credential(b"one")) })
            .await
            .unwrap();
        assert_eq!(first, credential(b"one"));

        // Second call must not invoke the negotiation closure at all.
        let second = cache
            .get_or_negotiate(&endpoint, || async {
                panic!("negotiated twice for the same endpoint")
            })
            .await
            .unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn failure_is_not_cached() {
        let cache = CredentialCache::new();
        let endpoint = endpoint();

        let failed = cache
            .get_or_negotiate(&endpoint, || async {
                Err(Error::Internal("handshake exploded".into()))
            })
            .await;
        assert!(failed.is_err());
        assert!(cache.get(&endpoint).is_none());

        // The next caller retries from scratch and can succeed.
        let retried = cache
            .get_or_negotiate(&endpoint, || async { Ok(credential(b"two")) })
            .await
            .unwrap();
        assert_eq!(retried, credential(b"two"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_bounds_the_slow_path() {
        let cache = CredentialCache::with_timeout(Duration::from_secs(5));
        let endpoint = endpoint();

        let stalled = cache
            .get_or_negotiate(&endpoint, || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(credential(b"late"))
            })
            .await;
        assert!(matches!(stalled, Err(Error::NegotiationTimeout)));
        assert!(cache.get(&endpoint).is_none());
    }
}
