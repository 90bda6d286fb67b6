//! Response handling

use http::{HeaderMap, StatusCode};

use crate::Result;
use crate::engine::EngineResponse;

/// HTTP response
#[derive(Debug)]
pub struct Response {
    inner: EngineResponse,
}

impl Response {
    pub(crate) fn new(inner: EngineResponse) -> Self {
        Self { inner }
    }

    /// Get the response status code
    pub fn status(&self) -> StatusCode {
        self.inner.status
    }

    /// Check if the response status indicates success (2xx)
    pub fn is_success(&self) -> bool {
        self.inner.status.is_success()
    }

    /// Check if the response status indicates a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.inner.status.is_client_error()
    }

    /// Check if the response status indicates a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.inner.status.is_server_error()
    }

    /// Get a header value as a string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    /// Get all headers
    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// Get the content length from headers
    pub fn content_length(&self) -> Option<u64> {
        self.header(http::header::CONTENT_LENGTH.as_str())
            .and_then(|value| value.parse().ok())
    }

    /// Consume the response and return the body as bytes
    pub async fn bytes(mut self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        while let Some(chunk) = self.inner.body_receiver.recv().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer)
    }

    /// Consume the response and return the body as text
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes).map_err(crate::Error::from)
    }

    /// Consume the response and parse the body as JSON
    pub async fn json<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(crate::Error::from)
    }
}
