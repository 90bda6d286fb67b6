//! Platform security-context capability
//!
//! Token generation for the challenge/response exchange is delegated to the
//! operating system. The traits here are the seam: Windows gets a real SSPI
//! implementation, every other platform gets [`Unsupported`], and tests
//! inject their own provider.

use std::sync::Arc;

use crate::{Error, Result};

/// One in-progress security context for a single negotiation.
///
/// Round 0 produces the initial token, round 1 answers the proxy's
/// challenge. A context is never reused across negotiations.
pub trait SecurityContext: Send {
    /// Produce the initial (challenge-less) token.
    fn initial_token(&mut self) -> Result<Vec<u8>>;

    /// Feed the proxy's challenge into the context and produce the
    /// response token.
    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;
}

/// Creates security contexts for a target service principal.
pub trait ContextProvider: Send + Sync {
    /// Whether this platform can negotiate at all.
    ///
    /// When this returns `false` the client surfaces proxy-auth-required
    /// responses unmodified instead of attempting a handshake.
    fn supported(&self) -> bool {
        true
    }

    /// Open a fresh context against `spn`.
    fn create(&self, spn: &str) -> Result<Box<dyn SecurityContext>>;
}

/// Select the security-context provider for the current platform.
pub fn platform_provider() -> Arc<dyn ContextProvider> {
    #[cfg(all(windows, feature = "negotiate-sspi"))]
    {
        Arc::new(super::sspi::SspiProvider::new())
    }

    #[cfg(not(all(windows, feature = "negotiate-sspi")))]
    {
        Arc::new(Unsupported)
    }
}

/// Provider for platforms without a negotiation capability.
#[derive(Debug, Clone, Copy)]
pub struct Unsupported;

impl ContextProvider for Unsupported {
    fn supported(&self) -> bool {
        false
    }

    fn create(&self, _spn: &str) -> Result<Box<dyn SecurityContext>> {
        Err(Error::NegotiationUnsupported)
    }
}
