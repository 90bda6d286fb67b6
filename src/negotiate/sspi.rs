//! SSPI-backed security contexts for Windows
//!
//! Acquires an outbound credential handle for the logged-on identity and
//! drives `InitializeSecurityContextW` for the two handshake rounds. No
//! explicit username or password is involved; the token is bound to the
//! process identity.

use std::ffi::c_void;

use windows::Win32::Foundation::{SEC_E_OK, SEC_I_CONTINUE_NEEDED};
use windows::Win32::Security::Authentication::Identity::{
    AcquireCredentialsHandleW, DeleteSecurityContext, FreeCredentialsHandle,
    InitializeSecurityContextW, ISC_REQ_CONFIDENTIALITY, ISC_REQ_CONNECTION, ISC_REQ_INTEGRITY,
    ISC_REQ_REPLAY_DETECT, ISC_REQ_SEQUENCE_DETECT, SECBUFFER_TOKEN, SECBUFFER_VERSION,
    SECPKG_CRED_OUTBOUND, SECURITY_NATIVE_DREP, SecBuffer, SecBufferDesc,
};
use windows::Win32::Security::Credentials::SecHandle;
use windows::core::{HRESULT, PCWSTR, PWSTR};

use super::context::{ContextProvider, SecurityContext};
use crate::{Error, Result};

// Large enough for every NTLM and Negotiate token; querying
// SecPkgInfoW.cbMaxToken would be tighter but never exceeds this.
const MAX_TOKEN_SIZE: usize = 12288;

/// Context provider backed by the Windows security support provider
/// interface, authenticating as the logged-on user.
pub struct SspiProvider {
    package: String,
}

impl SspiProvider {
    /// Provider for the default NTLM package.
    pub fn new() -> Self {
        Self::with_package(super::DEFAULT_SCHEME)
    }

    /// Provider for a specific security package (`NTLM`, `Negotiate`).
    pub fn with_package(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
        }
    }
}

impl Default for SspiProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextProvider for SspiProvider {
    fn create(&self, spn: &str) -> Result<Box<dyn SecurityContext>> {
        Ok(Box::new(SspiContext::open(&self.package, spn)?))
    }
}

fn wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

fn sspi_error(call: &str, status: HRESULT) -> Error {
    Error::SecurityContext {
        message: format!(
            "{} failed: {}",
            call,
            windows::core::Error::from_hresult(status).message()
        ),
    }
}

struct SspiContext {
    credentials: SecHandle,
    context: Option<SecHandle>,
    spn: Vec<u16>,
}

// SecHandle is a pair of opaque pointer-sized values owned by this context
// and only ever used from one negotiation at a time.
unsafe impl Send for SspiContext {}

impl SspiContext {
    fn open(package: &str, spn: &str) -> Result<Self> {
        let package_w = wide(package);
        let mut credentials = SecHandle::default();
        let mut expiry = 0i64;

        let status = unsafe {
            AcquireCredentialsHandleW(
                PCWSTR::null(),
                PCWSTR(package_w.as_ptr()),
                SECPKG_CRED_OUTBOUND,
                None,
                // Null auth data selects the logged-on user's credentials.
                None,
                None,
                None,
                &mut credentials,
                Some(&mut expiry),
            )
        };
        if status != SEC_E_OK {
            return Err(sspi_error("AcquireCredentialsHandleW", status));
        }

        tracing::debug!(package, spn, "acquired outbound credentials handle");

        Ok(Self {
            credentials,
            context: None,
            spn: wide(spn),
        })
    }

    fn step(&mut self, input: Option<&[u8]>) -> Result<Vec<u8>> {
        let mut input_buffer = input.map(|bytes| SecBuffer {
            cbBuffer: bytes.len() as u32,
            BufferType: SECBUFFER_TOKEN,
            pvBuffer: bytes.as_ptr() as *mut c_void,
        });
        let input_desc = input_buffer.as_mut().map(|buffer| SecBufferDesc {
            ulVersion: SECBUFFER_VERSION,
            cBuffers: 1,
            pBuffers: buffer,
        });

        let mut output_bytes = vec![0u8; MAX_TOKEN_SIZE];
        let mut output_buffer = SecBuffer {
            cbBuffer: output_bytes.len() as u32,
            BufferType: SECBUFFER_TOKEN,
            pvBuffer: output_bytes.as_mut_ptr() as *mut c_void,
        };
        let mut output_desc = SecBufferDesc {
            ulVersion: SECBUFFER_VERSION,
            cBuffers: 1,
            pBuffers: &mut output_buffer,
        };

        let mut new_context = self.context.unwrap_or_default();
        let mut attributes = 0u32;
        let mut expiry = 0i64;

        let status = unsafe {
            InitializeSecurityContextW(
                Some(&self.credentials),
                self.context.as_ref().map(|c| c as *const SecHandle),
                Some(PWSTR(self.spn.as_ptr() as *mut u16)),
                ISC_REQ_CONNECTION
                    | ISC_REQ_CONFIDENTIALITY
                    | ISC_REQ_INTEGRITY
                    | ISC_REQ_SEQUENCE_DETECT
                    | ISC_REQ_REPLAY_DETECT,
                0,
                SECURITY_NATIVE_DREP,
                input_desc.as_ref().map(|desc| desc as *const SecBufferDesc),
                0,
                Some(&mut new_context),
                Some(&mut output_desc),
                &mut attributes,
                Some(&mut expiry),
            )
        };

        if status != SEC_E_OK && status != SEC_I_CONTINUE_NEEDED {
            return Err(sspi_error("InitializeSecurityContextW", status));
        }

        self.context = Some(new_context);
        output_bytes.truncate(output_buffer.cbBuffer as usize);
        Ok(output_bytes)
    }
}

impl SecurityContext for SspiContext {
    fn initial_token(&mut self) -> Result<Vec<u8>> {
        self.step(None)
    }

    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>> {
        self.step(Some(challenge))
    }
}

impl Drop for SspiContext {
    fn drop(&mut self) {
        unsafe {
            if let Some(context) = self.context.take() {
                let _ = DeleteSecurityContext(&context);
            }
            let _ = FreeCredentialsHandle(&self.credentials);
        }
    }
}
