//! Proxy-aware HTTP client wrapper for Rust
//!
//! `tull` wraps an HTTP engine with automatic proxy discovery and
//! transparent proxy authentication. Requests are routed through the proxy
//! a resolver picks for each URL, and a proxy that answers with
//! `407 Proxy Authentication Required` is negotiated with once per process
//! using the operating system's identity (NTLM over SSPI on Windows). The
//! negotiated credential is cached per proxy endpoint and reattached to
//! every later request, with concurrent first requests coordinated so only
//! one handshake runs.
//!
//! On platforms without a negotiation capability, proxy-auth-required
//! responses are returned to the caller unmodified.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

pub use cache::{CredentialCache, CredentialHeader};
pub use client::{Client, ClientBuilder};
#[cfg(feature = "engine-reqwest")]
pub use engine::reqwest::ReqwestEngine;
pub use engine::{EngineConfig, EngineRequest, EngineResponse, HttpEngine};
pub use error::{Error, Result};
#[cfg(all(windows, feature = "negotiate-sspi"))]
pub use negotiate::SspiProvider;
pub use negotiate::{
    ContextProvider, DEFAULT_SCHEME, Negotiator, SecurityContext, Unsupported, platform_provider,
};
pub use request::RequestBuilder;
pub use resolver::{ProxyEndpoint, ProxyResolver, ProxySelection, StaticResolver};
pub use response::Response;

pub mod cache;
mod client;
pub mod engine;
mod error;
pub mod negotiate;
mod request;
pub mod resolver;
mod response;
