//! Proxy authentication negotiation
//!
//! A two-round challenge/response handshake carried over ordinary GET
//! requests to the proxy endpoint itself: send a challenge-less token,
//! require a 407 carrying exactly one challenge for our scheme, answer it,
//! and package the final token as a reusable `Proxy-Authorization` header.

pub mod context;

#[cfg(all(windows, feature = "negotiate-sspi"))]
mod sspi;

#[cfg(all(windows, feature = "negotiate-sspi"))]
pub use sspi::SspiProvider;

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use http::header::{PROXY_AUTHENTICATE, PROXY_AUTHORIZATION};
use http::{HeaderMap, HeaderValue, StatusCode};

pub use context::{ContextProvider, SecurityContext, Unsupported, platform_provider};

use crate::cache::CredentialHeader;
use crate::engine::{EngineRequest, HttpEngine};
use crate::resolver::ProxyEndpoint;
use crate::{Error, Result};

/// Default negotiation scheme name
pub const DEFAULT_SCHEME: &str = "NTLM";

/// Where a handshake currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    /// Ready to produce the initial token
    Start,
    /// Initial token sent, waiting on the proxy's challenge
    ChallengeSent,
    /// Response token produced, credential ready
    Complete,
    /// A transition failed; the handshake is dead
    Failed,
}

/// Transient state for one negotiation: the security context and the
/// round bookkeeping. Created per negotiation, dropped when it resolves.
struct Handshake {
    scheme: String,
    context: Box<dyn SecurityContext>,
    state: HandshakeState,
}

impl Handshake {
    fn start(scheme: &str, context: Box<dyn SecurityContext>) -> Self {
        Self {
            scheme: scheme.to_string(),
            context,
            state: HandshakeState::Start,
        }
    }

    /// Round 0: the challenge-less token, as a header value.
    fn initial_header(&mut self) -> Result<HeaderValue> {
        debug_assert_eq!(self.state, HandshakeState::Start);
        match self.produce_initial() {
            Ok(value) => {
                self.state = HandshakeState::ChallengeSent;
                Ok(value)
            }
            Err(e) => {
                self.state = HandshakeState::Failed;
                Err(e)
            }
        }
    }

    fn produce_initial(&mut self) -> Result<HeaderValue> {
        let token = self.context.initial_token()?;
        let value = format!("{} {}", self.scheme, STANDARD.encode(token));
        HeaderValue::from_str(&value)
            .map_err(|e| Error::Internal(format!("Invalid negotiation header: {}", e)))
    }

    /// Round 1: validate the proxy's answer and produce the credential.
    fn challenge_response(
        &mut self,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Result<CredentialHeader> {
        debug_assert_eq!(self.state, HandshakeState::ChallengeSent);
        match self.produce_response(status, headers) {
            Ok(credential) => {
                self.state = HandshakeState::Complete;
                Ok(credential)
            }
            Err(e) => {
                self.state = HandshakeState::Failed;
                Err(e)
            }
        }
    }

    fn produce_response(
        &mut self,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Result<CredentialHeader> {
        if status != StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            return Err(Error::UnexpectedChallengeStatus(status));
        }
        let challenge = extract_challenge(&self.scheme, headers)?;
        let decoded = STANDARD.decode(challenge)?;
        let token = self.context.respond(&decoded)?;
        CredentialHeader::for_token(&self.scheme, &token)
    }
}

/// Drives the challenge/response exchange against one proxy endpoint.
pub struct Negotiator {
    scheme: String,
    provider: Arc<dyn ContextProvider>,
}

impl Negotiator {
    /// Create a negotiator using the default scheme.
    pub fn new(provider: Arc<dyn ContextProvider>) -> Self {
        Self::with_scheme(DEFAULT_SCHEME, provider)
    }

    /// Create a negotiator for a specific scheme name (`NTLM`, `Negotiate`).
    pub fn with_scheme(scheme: impl Into<String>, provider: Arc<dyn ContextProvider>) -> Self {
        Self {
            scheme: scheme.into(),
            provider,
        }
    }

    /// The negotiation scheme name sent on the wire.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Whether the current platform can negotiate at all.
    pub fn supported(&self) -> bool {
        self.provider.supported()
    }

    /// Run the full handshake against `endpoint`, returning the reusable
    /// credential header.
    ///
    /// The negotiator does not verify that the proxy accepts the final
    /// token; acceptance shows up in the caller's retried request.
    pub async fn negotiate(
        &self,
        engine: &dyn HttpEngine,
        endpoint: &ProxyEndpoint,
    ) -> Result<CredentialHeader> {
        let spn = service_principal(endpoint).await;
        tracing::debug!(%endpoint, %spn, scheme = %self.scheme, "starting proxy auth negotiation");

        let mut handshake = Handshake::start(&self.scheme, self.provider.create(&spn)?);

        let mut headers = HeaderMap::new();
        headers.insert(PROXY_AUTHORIZATION, handshake.initial_header()?);
        let mut request = EngineRequest::get(endpoint.url().clone());
        request.headers = headers;

        let response = engine.send(request).await?;

        let credential = handshake.challenge_response(response.status, &response.headers);
        match &credential {
            Ok(_) => tracing::debug!(%endpoint, "proxy auth negotiation complete"),
            Err(error) => tracing::error!(%endpoint, %error, "proxy auth negotiation failed"),
        }
        credential
    }
}

/// Extract the single challenge for `scheme` from a `Proxy-Authenticate`
/// header. The header value is split on `", "`, entries are matched by the
/// scheme name appearing as a substring, and the matched entry has the
/// `"<scheme> "` prefix length stripped.
fn extract_challenge(scheme: &str, headers: &HeaderMap) -> Result<String> {
    let raw = headers
        .get(PROXY_AUTHENTICATE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let challenges: Vec<&str> = raw
        .split(", ")
        .filter(|entry| entry.contains(scheme))
        .map(|entry| entry.get(scheme.len() + 1..).unwrap_or_default())
        .collect();

    if challenges.len() != 1 {
        return Err(Error::ChallengeCount {
            scheme: scheme.to_string(),
            count: challenges.len(),
        });
    }

    Ok(challenges[0].to_string())
}

/// Derive the target SPN for an endpoint as `HTTP/<canonical host>`.
///
/// Canonicalization is best effort: getaddrinfo runs on a blocking worker,
/// and any failure falls back to the unresolved hostname.
async fn service_principal(endpoint: &ProxyEndpoint) -> String {
    let host = endpoint.host().to_string();
    let lookup = tokio::task::spawn_blocking({
        let host = host.clone();
        move || canonical_name(&host)
    })
    .await;

    let host = match lookup {
        Ok(Ok(canonical)) => canonical,
        Ok(Err(error)) => {
            tracing::warn!(%host, %error, "skipping canonicalization of proxy host");
            host
        }
        Err(error) => {
            tracing::warn!(%host, %error, "skipping canonicalization of proxy host");
            host
        }
    };

    format!("HTTP/{}", host)
}

#[cfg(unix)]
const CANONICAL_NAME_FLAG: i32 = libc::AI_CANONNAME;
#[cfg(windows)]
const CANONICAL_NAME_FLAG: i32 = windows_sys::Win32::Networking::WinSock::AI_CANONNAME as i32;

fn canonical_name(host: &str) -> std::io::Result<String> {
    let hints = dns_lookup::AddrInfoHints {
        flags: CANONICAL_NAME_FLAG,
        ..Default::default()
    };

    let entries = dns_lookup::getaddrinfo(Some(host), None, Some(hints))
        .map_err(std::io::Error::from)?;
    for entry in entries {
        if let Some(canonical) = entry?.canonname {
            return Ok(canonical);
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "no canonical name returned",
    ))
}
