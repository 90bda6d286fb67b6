//! HTTP client implementation

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use url::Url;

use crate::cache::CredentialCache;
use crate::engine::{EngineRequest, HttpEngine};
use crate::negotiate::{ContextProvider, DEFAULT_SCHEME, Negotiator, platform_provider};
use crate::resolver::{ProxyResolver, ProxySelection, StaticResolver};
use crate::{Error, RequestBuilder, Response, Result};

/// Proxy-aware HTTP client
///
/// Wraps every outbound request with proxy resolution and transparent
/// authentication: the proxy for the target URL is discovered through the
/// configured resolver, a previously negotiated credential is attached if
/// one exists, and a proxy-auth-required response triggers a single
/// negotiation followed by a single retry.
///
/// # Examples
///
/// ```rust,no_run
/// use tull::{Client, ProxyEndpoint, ProxySelection};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let proxy = ProxyEndpoint::parse("proxy.corp.example:8080")?;
/// let client = Client::builder()
///     .proxy(ProxySelection::all(proxy))
///     .build()?;
///
/// let response = client.get("https://internal.example/api").send().await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    engine: Arc<dyn HttpEngine>,
    resolver: Option<Arc<dyn ProxyResolver>>,
    cache: CredentialCache,
    negotiator: Negotiator,
    base_url: Option<String>,
}

impl Client {
    /// Create a new client with default configuration
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a client builder
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Create a GET request
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Create a POST request
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Create a PUT request
    pub fn put(&self, url: &str) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// Create a DELETE request
    pub fn delete(&self, url: &str) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Create a PATCH request
    pub fn patch(&self, url: &str) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    /// Create a HEAD request
    pub fn head(&self, url: &str) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    /// Create a request with an arbitrary method
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        RequestBuilder::new(self.clone(), method, self.resolve_url(url))
    }

    pub(crate) async fn execute(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Option<Bytes>,
    ) -> Result<Response> {
        let inner = &self.inner;

        let proxy = inner
            .resolver
            .as_ref()
            .and_then(|resolver| resolver.resolve(&url).for_target(&url).cloned());
        match &proxy {
            Some(endpoint) => tracing::debug!(%url, %endpoint, "resolved proxy for request"),
            None => tracing::debug!(%url, "no proxy for request"),
        }

        let mut proxy_headers = HeaderMap::new();
        let mut had_credential = false;
        if let Some(endpoint) = &proxy {
            if let Some(credential) = inner.cache.get(endpoint) {
                credential.apply(&mut proxy_headers);
                had_credential = true;
            }
        }

        let response = inner
            .engine
            .send(EngineRequest {
                method: method.clone(),
                url: url.clone(),
                headers: headers.clone(),
                body: body.clone(),
                proxy: proxy.clone(),
                proxy_headers,
            })
            .await?;

        if response.status != StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            return Ok(Response::new(response));
        }

        let Some(endpoint) = proxy else {
            // Direct requests have nothing to negotiate with.
            return Ok(Response::new(response));
        };

        if !inner.negotiator.supported() {
            return Ok(Response::new(response));
        }

        if had_credential {
            // The proxy rejected a credential we already negotiated once.
            // Hand the response back rather than looping.
            tracing::debug!(%endpoint, "proxy rejected cached credential");
            return Ok(Response::new(response));
        }

        tracing::debug!(%endpoint, "proxy authentication required, negotiating");
        let credential = inner
            .cache
            .get_or_negotiate(&endpoint, || {
                inner.negotiator.negotiate(&*inner.engine, &endpoint)
            })
            .await?;

        let mut proxy_headers = HeaderMap::new();
        credential.apply(&mut proxy_headers);

        let retried = inner
            .engine
            .send(EngineRequest {
                method,
                url,
                headers,
                body,
                proxy: Some(endpoint),
                proxy_headers,
            })
            .await?;

        Ok(Response::new(retried))
    }

    fn resolve_url(&self, url: &str) -> String {
        match &self.inner.base_url {
            Some(base) => {
                if url.starts_with("http://") || url.starts_with("https://") {
                    url.to_string()
                } else {
                    format!(
                        "{}/{}",
                        base.trim_end_matches('/'),
                        url.trim_start_matches('/')
                    )
                }
            }
            None => url.to_string(),
        }
    }
}

/// Builder for creating clients
pub struct ClientBuilder {
    engine: Option<Arc<dyn HttpEngine>>,
    resolver: Option<Arc<dyn ProxyResolver>>,
    provider: Option<Arc<dyn ContextProvider>>,
    scheme: String,
    base_url: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    headers: Vec<(String, String)>,
    negotiation_timeout: Option<Duration>,
}

impl ClientBuilder {
    /// Create a new client builder
    pub fn new() -> Self {
        Self {
            engine: None,
            resolver: None,
            provider: None,
            scheme: DEFAULT_SCHEME.to_string(),
            base_url: None,
            timeout: None,
            user_agent: None,
            headers: Vec::new(),
            negotiation_timeout: None,
        }
    }

    /// Set the base URL for all requests
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set user agent
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Add a default header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Route every request through a fixed proxy selection
    pub fn proxy(self, selection: ProxySelection) -> Self {
        self.resolver(StaticResolver::new(selection))
    }

    /// Set the proxy resolver
    pub fn resolver(mut self, resolver: impl ProxyResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Set the HTTP engine used for dispatch
    pub fn engine(mut self, engine: impl HttpEngine + 'static) -> Self {
        self.engine = Some(Arc::new(engine));
        self
    }

    /// Set the security-context provider used for negotiation
    pub fn context_provider(mut self, provider: impl ContextProvider + 'static) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Set the negotiation scheme name (defaults to `NTLM`)
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Bound each proxy negotiation, including time spent waiting behind a
    /// concurrent negotiation for the same endpoint. Unbounded by default.
    pub fn negotiation_timeout(mut self, bound: Duration) -> Self {
        self.negotiation_timeout = Some(bound);
        self
    }

    /// Build the client
    pub fn build(self) -> Result<Client> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::Internal(format!("Invalid header name: {}", name)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| Error::Internal(format!("Invalid header value for {}", name)))?;
            default_headers.append(name, value);
        }

        let engine = match &self.engine {
            Some(engine) => engine.clone(),
            None => self.default_engine(default_headers)?,
        };

        let provider = self.provider.unwrap_or_else(platform_provider);
        let negotiator = Negotiator::with_scheme(self.scheme, provider);

        let cache = match self.negotiation_timeout {
            Some(bound) => CredentialCache::with_timeout(bound),
            None => CredentialCache::new(),
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                engine,
                resolver: self.resolver,
                cache,
                negotiator,
                base_url: self.base_url,
            }),
        })
    }

    #[cfg(feature = "engine-reqwest")]
    fn default_engine(&self, default_headers: HeaderMap) -> Result<Arc<dyn HttpEngine>> {
        let config = crate::engine::EngineConfig {
            timeout: self.timeout,
            user_agent: self.user_agent.clone(),
            default_headers: (!default_headers.is_empty()).then_some(default_headers),
        };
        Ok(Arc::new(crate::engine::reqwest::ReqwestEngine::with_config(
            config,
        )?))
    }

    #[cfg(not(feature = "engine-reqwest"))]
    fn default_engine(&self, _default_headers: HeaderMap) -> Result<Arc<dyn HttpEngine>> {
        Err(Error::Internal(
            "No HTTP engine configured and the reqwest engine is disabled".into(),
        ))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
