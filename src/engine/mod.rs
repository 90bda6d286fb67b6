//! Transport abstraction for the underlying HTTP engine
//!
//! The client and the negotiator never talk to the network directly; they
//! hand [`EngineRequest`]s to an [`HttpEngine`]. The default engine adapts
//! reqwest, test suites substitute their own.

pub mod types;

#[cfg(feature = "engine-reqwest")]
pub mod reqwest;

use std::time::Duration;

use async_trait::async_trait;

pub use types::{EngineRequest, EngineResponse};

use crate::Result;

/// Configuration shared by engine implementations
#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    /// Request timeout
    pub timeout: Option<Duration>,
    /// User agent string
    pub user_agent: Option<String>,
    /// Default headers to add to all requests
    pub default_headers: Option<http::HeaderMap>,
}

/// An HTTP transport capable of dispatching one request.
///
/// Implementations must honor `request.proxy` and `request.proxy_headers`:
/// when a proxy is set the request is routed through it with the proxy
/// headers attached, and when it is `None` the request goes out directly
/// even if the process environment configures a proxy.
#[async_trait]
pub trait HttpEngine: Send + Sync {
    /// Dispatch `request` and return the response once headers arrive.
    async fn send(&self, request: EngineRequest) -> Result<EngineResponse>;
}
