//! Reqwest engine for cross-platform HTTP support

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::engine::types::{EngineRequest, EngineResponse};
use crate::engine::{EngineConfig, HttpEngine};
use crate::resolver::ProxyEndpoint;
use crate::{Error, Result};

/// Cache key for proxied clients: the endpoint plus the credential bytes.
/// Reqwest scopes proxy configuration to the client, so each distinct
/// endpoint/credential pair needs its own client.
type ProxyKey = (String, Option<Vec<u8>>);

/// HTTP engine backed by reqwest
pub struct ReqwestEngine {
    config: EngineConfig,
    direct: ::reqwest::Client,
    proxied: RwLock<HashMap<ProxyKey, ::reqwest::Client>>,
}

impl ReqwestEngine {
    /// Create a new engine with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(EngineConfig::default())
    }

    /// Create a new engine with configuration
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        let direct = build_client(&config, None)?;
        Ok(Self {
            config,
            direct,
            proxied: RwLock::new(HashMap::new()),
        })
    }

    fn client_for(
        &self,
        proxy: Option<&ProxyEndpoint>,
        proxy_headers: &http::HeaderMap,
    ) -> Result<::reqwest::Client> {
        let Some(endpoint) = proxy else {
            return Ok(self.direct.clone());
        };

        let credential = proxy_headers
            .get(http::header::PROXY_AUTHORIZATION)
            .map(|value| value.as_bytes().to_vec());
        let key = (endpoint.url().to_string(), credential);

        if let Some(client) = self
            .proxied
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&key)
        {
            return Ok(client.clone());
        }

        let client = build_client(&self.config, Some((endpoint, proxy_headers)))?;
        let mut clients = self
            .proxied
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(clients.entry(key).or_insert(client).clone())
    }
}

fn build_client(
    config: &EngineConfig,
    proxy: Option<(&ProxyEndpoint, &http::HeaderMap)>,
) -> Result<::reqwest::Client> {
    let mut builder = ::reqwest::Client::builder();

    if let Some(timeout) = config.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(user_agent) = &config.user_agent {
        builder = builder.user_agent(user_agent.clone());
    }

    if let Some(default_headers) = &config.default_headers {
        builder = builder.default_headers(default_headers.clone());
    }

    match proxy {
        Some((endpoint, proxy_headers)) => {
            let mut proxy = ::reqwest::Proxy::all(endpoint.url().as_str())
                .map_err(|e| Error::Internal(format!("Invalid proxy {}: {}", endpoint, e)))?;
            if let Some(auth) = proxy_headers.get(http::header::PROXY_AUTHORIZATION) {
                proxy = proxy.custom_http_auth(auth.clone());
            }
            builder = builder.proxy(proxy);
        }
        // An unproxied request must stay unproxied even when the
        // environment configures one.
        None => builder = builder.no_proxy(),
    }

    builder
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create reqwest client: {}", e)))
}

#[async_trait]
impl HttpEngine for ReqwestEngine {
    async fn send(&self, request: EngineRequest) -> Result<EngineResponse> {
        let client = self.client_for(request.proxy.as_ref(), &request.proxy_headers)?;

        let mut req_builder = client.request(request.method.clone(), request.url.clone());

        for (name, value) in &request.headers {
            req_builder = req_builder.header(name, value);
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let response = req_builder.send().await.map_err(|e| Error::Network {
            message: format!("Request failed: {}", e),
        })?;

        let status = response.status();
        let headers = response.headers().clone();

        // Stream response body
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        if tx.send(Ok(bytes)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(Error::Network {
                                message: format!("Stream error: {}", e),
                            }))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(EngineResponse {
            status,
            headers,
            body_receiver: rx,
        })
    }
}
