//! Shared types between engine implementations

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use tokio::sync::mpsc;

use crate::resolver::ProxyEndpoint;

/// Engine-agnostic HTTP request
pub struct EngineRequest {
    /// HTTP method for the request
    pub method: Method,
    /// URL for the request
    pub url: url::Url,
    /// Headers for the request
    pub headers: HeaderMap,
    /// Optional body content
    pub body: Option<Bytes>,
    /// Proxy to route the request through, if any
    pub proxy: Option<ProxyEndpoint>,
    /// Headers directed at the proxy rather than the origin
    pub proxy_headers: HeaderMap,
}

impl EngineRequest {
    /// Create a bare GET request for `url` with no proxy configured.
    pub fn get(url: url::Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
            proxy: None,
            proxy_headers: HeaderMap::new(),
        }
    }
}

/// Engine-agnostic HTTP response
#[derive(Debug)]
pub struct EngineResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Stream of response body bytes
    pub body_receiver: mpsc::Receiver<crate::Result<Bytes>>,
}

impl EngineResponse {
    /// Build a response from an in-memory body.
    ///
    /// Mostly useful to engine implementations that do not stream, and to
    /// test doubles.
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        let (tx, rx) = mpsc::channel(1);
        if !body.is_empty() {
            let _ = tx.try_send(Ok(body));
        }
        Self {
            status,
            headers,
            body_receiver: rx,
        }
    }
}
