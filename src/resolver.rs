//! Proxy resolution
//!
//! Maps a target URL to the proxy endpoint(s) a request should traverse.
//! Evaluation of an auto-config policy is deliberately left behind the
//! [`ProxyResolver`] trait; the crate ships a [`StaticResolver`] for fixed
//! configurations and callers can plug in a PAC-backed implementation.

use std::fmt;

use url::Url;

use crate::{Error, Result};

/// A resolved proxy endpoint.
///
/// Identifies one proxy by URL and serves as the credential cache key. A
/// request keeps the same endpoint from resolution through retry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyEndpoint {
    url: Url,
}

impl ProxyEndpoint {
    /// Create an endpoint from an already parsed URL.
    ///
    /// Fails with [`Error::InvalidUrl`] when the URL has no host.
    pub fn new(url: Url) -> Result<Self> {
        if url.host_str().is_none() {
            return Err(Error::InvalidUrl);
        }
        Ok(Self { url })
    }

    /// Parse an endpoint from a string.
    ///
    /// Accepts both full URLs (`http://proxy.example:8080`) and the bare
    /// `host:port` form a PAC result is often reduced to.
    pub fn parse(input: &str) -> Result<Self> {
        match Url::parse(input) {
            Ok(url) if url.host_str().is_some() => Ok(Self { url }),
            _ => {
                let url = Url::parse(&format!("http://{}", input)).map_err(|_| Error::InvalidUrl)?;
                Self::new(url)
            }
        }
    }

    /// The proxy host name.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// The proxy port, if one is known.
    pub fn port(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }

    /// The endpoint as a URL.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// The proxies to use for one request, keyed by target scheme.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySelection {
    /// Proxy for plain-HTTP targets
    pub http: Option<ProxyEndpoint>,
    /// Proxy for HTTPS targets
    pub https: Option<ProxyEndpoint>,
}

impl ProxySelection {
    /// A selection that routes everything directly.
    pub fn direct() -> Self {
        Self::default()
    }

    /// A selection that routes both schemes through the same endpoint.
    pub fn all(endpoint: ProxyEndpoint) -> Self {
        Self {
            http: Some(endpoint.clone()),
            https: Some(endpoint),
        }
    }

    /// Pick the endpoint for a target URL.
    ///
    /// `http:` targets use the HTTP slot, everything else the HTTPS slot.
    pub fn for_target(&self, url: &Url) -> Option<&ProxyEndpoint> {
        if url.scheme() == "http" {
            self.http.as_ref()
        } else {
            self.https.as_ref()
        }
    }
}

/// Maps a target URL to the proxies it should use.
pub trait ProxyResolver: Send + Sync {
    /// Resolve the proxy selection for `url`.
    fn resolve(&self, url: &Url) -> ProxySelection;
}

/// Resolver returning the same fixed selection for every URL.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    selection: ProxySelection,
}

impl StaticResolver {
    /// Create a resolver from a fixed selection.
    pub fn new(selection: ProxySelection) -> Self {
        Self { selection }
    }
}

impl ProxyResolver for StaticResolver {
    fn resolve(&self, _url: &Url) -> ProxySelection {
        self.selection.clone()
    }
}
