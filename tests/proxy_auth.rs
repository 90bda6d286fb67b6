//! Behavior tests for proxy discovery and transparent authentication
//!
//! The fake engine below acts as a small NTLM proxy: it answers negotiation
//! GETs against the proxy endpoint with a challenge, and lets proxied
//! requests through only when they carry the credential derived from that
//! challenge.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::header::{PROXY_AUTHENTICATE, PROXY_AUTHORIZATION};
use http::{HeaderMap, HeaderValue, StatusCode};
use tull::{
    Client, ContextProvider, EngineRequest, EngineResponse, Error, HttpEngine, ProxyEndpoint,
    ProxySelection, Result, SecurityContext, Unsupported,
};

const CHALLENGE_B64: &str = "TlRMTVNTUAAC";
const TARGET: &str = "https://internal.example/api";

/// Security context that deterministically transforms the challenge.
struct FakeContext;

impl SecurityContext for FakeContext {
    fn initial_token(&mut self) -> Result<Vec<u8>> {
        Ok(b"initial".to_vec())
    }

    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>> {
        let mut token = b"response:".to_vec();
        token.extend_from_slice(challenge);
        Ok(token)
    }
}

#[derive(Clone, Default)]
struct FakeProvider {
    created: Arc<AtomicUsize>,
}

impl ContextProvider for FakeProvider {
    fn create(&self, _spn: &str) -> Result<Box<dyn SecurityContext>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext))
    }
}

/// The `Proxy-Authorization` value the fake proxy accepts.
fn accepted_credential() -> String {
    let challenge = STANDARD.decode(CHALLENGE_B64).unwrap();
    let mut token = b"response:".to_vec();
    token.extend_from_slice(&challenge);
    format!("NTLM {}", STANDARD.encode(token))
}

fn initial_credential() -> String {
    format!("NTLM {}", STANDARD.encode(b"initial"))
}

struct ProxyState {
    endpoint: ProxyEndpoint,
    /// GETs against the proxy endpoint itself (handshake round trips)
    negotiations: AtomicUsize,
    /// Requests dispatched toward the origin
    attempts: AtomicUsize,
    /// `Proxy-Authorization` attached to each origin attempt
    seen_credentials: Mutex<Vec<Option<String>>>,
    /// `Proxy-Authorization` attached to each handshake GET
    seen_initial: Mutex<Vec<Option<String>>>,
    /// What the handshake GET answers with
    challenge_status: StatusCode,
    challenge_header: Mutex<String>,
    /// Reject origin attempts even with a valid credential
    reject_all: bool,
    /// Status for direct (unproxied) origin requests
    direct_status: StatusCode,
    handshake_delay: Option<Duration>,
}

#[derive(Clone)]
struct FakeProxy {
    state: Arc<ProxyState>,
}

impl FakeProxy {
    fn new() -> Self {
        Self {
            state: Arc::new(ProxyState {
                endpoint: ProxyEndpoint::parse("proxy.example:8080").unwrap(),
                negotiations: AtomicUsize::new(0),
                attempts: AtomicUsize::new(0),
                seen_credentials: Mutex::new(Vec::new()),
                seen_initial: Mutex::new(Vec::new()),
                challenge_status: StatusCode::PROXY_AUTHENTICATION_REQUIRED,
                challenge_header: Mutex::new(format!(
                    "NTLM {}, Negotiate xyz789",
                    CHALLENGE_B64
                )),
                reject_all: false,
                direct_status: StatusCode::OK,
                handshake_delay: None,
            }),
        }
    }

    fn endpoint(&self) -> ProxyEndpoint {
        self.state.endpoint.clone()
    }

    fn negotiations(&self) -> usize {
        self.state.negotiations.load(Ordering::SeqCst)
    }

    fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    fn set_challenge_header(&self, value: &str) {
        *self.state.challenge_header.lock().unwrap() = value.to_string();
    }

    fn response(status: StatusCode, headers: HeaderMap, body: &'static [u8]) -> EngineResponse {
        EngineResponse::from_bytes(status, headers, Bytes::from_static(body))
    }
}

#[async_trait]
impl HttpEngine for FakeProxy {
    async fn send(&self, request: EngineRequest) -> Result<EngineResponse> {
        let state = &self.state;

        // A GET aimed at the proxy endpoint itself is a handshake round.
        if request.proxy.is_none() && request.url == *state.endpoint.url() {
            state.negotiations.fetch_add(1, Ordering::SeqCst);
            state.seen_initial.lock().unwrap().push(
                request
                    .headers
                    .get(PROXY_AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
            );
            if let Some(delay) = state.handshake_delay {
                tokio::time::sleep(delay).await;
            }
            let mut headers = HeaderMap::new();
            headers.insert(
                PROXY_AUTHENTICATE,
                HeaderValue::from_str(&state.challenge_header.lock().unwrap()).unwrap(),
            );
            return Ok(Self::response(state.challenge_status, headers, b""));
        }

        match &request.proxy {
            None => Ok(Self::response(state.direct_status, HeaderMap::new(), b"direct")),
            Some(_) => {
                state.attempts.fetch_add(1, Ordering::SeqCst);
                let credential = request
                    .proxy_headers
                    .get(PROXY_AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let authorized =
                    credential.as_deref() == Some(accepted_credential().as_str());
                state.seen_credentials.lock().unwrap().push(credential);

                if authorized && !state.reject_all {
                    Ok(Self::response(StatusCode::OK, HeaderMap::new(), b"ok"))
                } else {
                    let mut headers = HeaderMap::new();
                    headers.insert(PROXY_AUTHENTICATE, HeaderValue::from_static("NTLM"));
                    Ok(Self::response(
                        StatusCode::PROXY_AUTHENTICATION_REQUIRED,
                        headers,
                        b"",
                    ))
                }
            }
        }
    }
}

fn client_for(proxy: &FakeProxy, provider: FakeProvider) -> Client {
    Client::builder()
        .proxy(ProxySelection::all(proxy.endpoint()))
        .engine(proxy.clone())
        .context_provider(provider)
        .build()
        .unwrap()
}

#[tokio::test]
async fn end_to_end_negotiation_flow() {
    let proxy = FakeProxy::new();
    let client = client_for(&proxy, FakeProvider::default());

    let response = client.get(TARGET).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap(), b"ok");

    // One handshake round trip carrying the initial token.
    assert_eq!(proxy.negotiations(), 1);
    assert_eq!(
        *proxy.state.seen_initial.lock().unwrap(),
        vec![Some(initial_credential())]
    );

    // First attempt unauthenticated, retry carrying the negotiated header.
    assert_eq!(
        *proxy.state.seen_credentials.lock().unwrap(),
        vec![None, Some(accepted_credential())]
    );
}

#[tokio::test]
async fn cached_credential_skips_negotiation() {
    let proxy = FakeProxy::new();
    let provider = FakeProvider::default();
    let client = client_for(&proxy, provider.clone());

    let first = client.get(TARGET).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(proxy.negotiations(), 1);

    // Second request reuses the cached credential and succeeds first try.
    let second = client.get(TARGET).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(proxy.negotiations(), 1);
    assert_eq!(provider.created.load(Ordering::SeqCst), 1);
    assert_eq!(proxy.attempts(), 3);
    assert_eq!(
        proxy.state.seen_credentials.lock().unwrap().last().unwrap(),
        &Some(accepted_credential())
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_share_one_negotiation() {
    let mut proxy = FakeProxy::new();
    // Widen the race window so every request is in flight before the
    // handshake resolves.
    Arc::get_mut(&mut proxy.state).unwrap().handshake_delay = Some(Duration::from_millis(50));
    let provider = FakeProvider::default();
    let client = client_for(&proxy, provider.clone());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            client.get(TARGET).send().await.unwrap().status()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(proxy.negotiations(), 1);
    assert_eq!(provider.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn persistent_rejection_is_returned_not_looped() {
    let mut proxy = FakeProxy::new();
    Arc::get_mut(&mut proxy.state).unwrap().reject_all = true;
    let client = client_for(&proxy, FakeProvider::default());

    // Negotiation itself succeeds but the proxy keeps rejecting: the 407
    // comes back as a normal response after exactly one retry.
    let response = client.get(TARGET).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::PROXY_AUTHENTICATION_REQUIRED);
    assert_eq!(proxy.negotiations(), 1);
    assert_eq!(proxy.attempts(), 2);

    // The credential stays cached; a later 407 with it attached is returned
    // without another negotiation.
    let again = client.get(TARGET).send().await.unwrap();
    assert_eq!(again.status(), StatusCode::PROXY_AUTHENTICATION_REQUIRED);
    assert_eq!(proxy.negotiations(), 1);
    assert_eq!(proxy.attempts(), 3);
}

#[tokio::test]
async fn direct_request_never_negotiates() {
    let mut proxy = FakeProxy::new();
    Arc::get_mut(&mut proxy.state).unwrap().direct_status =
        StatusCode::PROXY_AUTHENTICATION_REQUIRED;
    let client = Client::builder()
        .engine(proxy.clone())
        .context_provider(FakeProvider::default())
        .build()
        .unwrap();

    // No resolver: the request goes out directly, and even a 407 is handed
    // back untouched.
    let response = client.get(TARGET).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::PROXY_AUTHENTICATION_REQUIRED);
    assert_eq!(proxy.negotiations(), 0);
    assert_eq!(proxy.attempts(), 0);
}

#[tokio::test]
async fn unsupported_platform_surfaces_407() {
    let proxy = FakeProxy::new();
    let client = Client::builder()
        .proxy(ProxySelection::all(proxy.endpoint()))
        .engine(proxy.clone())
        .context_provider(Unsupported)
        .build()
        .unwrap();

    let response = client.get(TARGET).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::PROXY_AUTHENTICATION_REQUIRED);
    assert_eq!(proxy.negotiations(), 0);
    assert_eq!(proxy.attempts(), 1);
}

#[tokio::test]
async fn failed_negotiation_is_not_cached() {
    let proxy = FakeProxy::new();
    proxy.set_challenge_header(&format!("NTLM {0}, NTLM {0}", CHALLENGE_B64));
    let client = client_for(&proxy, FakeProvider::default());

    let err = client.get(TARGET).send().await.unwrap_err();
    assert!(matches!(err, Error::ChallengeCount { count: 2, .. }));

    // No negative caching: once the proxy behaves, the next request
    // negotiates from scratch and succeeds.
    proxy.set_challenge_header(&format!("NTLM {}", CHALLENGE_B64));
    let response = client.get(TARGET).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(proxy.negotiations(), 2);
}

#[tokio::test]
async fn unexpected_challenge_status_fails_negotiation() {
    let mut proxy = FakeProxy::new();
    Arc::get_mut(&mut proxy.state).unwrap().challenge_status = StatusCode::OK;
    let client = client_for(&proxy, FakeProvider::default());

    let err = client.get(TARGET).send().await.unwrap_err();
    assert!(matches!(
        err,
        Error::UnexpectedChallengeStatus(StatusCode::OK)
    ));
}

#[tokio::test(start_paused = true)]
async fn negotiation_timeout_surfaces_to_all_waiters() {
    let mut proxy = FakeProxy::new();
    Arc::get_mut(&mut proxy.state).unwrap().handshake_delay = Some(Duration::from_secs(300));
    let client = Client::builder()
        .proxy(ProxySelection::all(proxy.endpoint()))
        .engine(proxy.clone())
        .context_provider(FakeProvider::default())
        .negotiation_timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move { client.get(TARGET).send().await }));
    }
    for task in tasks {
        let result = task.await.unwrap();
        assert!(matches!(result, Err(Error::NegotiationTimeout)));
    }
}
