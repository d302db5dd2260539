//! The outbound side: one chat-completion call with one key.
//!
//! [`UpstreamClient`] is the seam between the retry logic and the network.
//! The production implementation is [`GeminiClient`]; tests plug in scripted
//! clients.

pub mod client;

pub use client::GeminiClient;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, StatusCode};
use secrecy::SecretString;
use std::fmt;
use thiserror::Error;

/// A validated chat-completion request, forwarded verbatim.
#[derive(Debug, Clone)]
pub struct ChatPayload {
    pub body: Bytes,
    pub model: String,
    pub stream: bool,
}

impl ChatPayload {
    pub fn new(body: impl Into<Bytes>, model: impl Into<String>, stream: bool) -> Self {
        Self {
            body: body.into(),
            model: model.into(),
            stream,
        }
    }
}

/// A successful upstream response. The body may still be streaming.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// A failed upstream call. `status` is `None` for transport failures
/// (connect errors, timeouts, broken streams).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", display_upstream(.status, .message))]
pub struct UpstreamError {
    pub status: Option<u16>,
    pub message: String,
}

fn display_upstream(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("HTTP {code}: {message}"),
        None => format!("transport error: {message}"),
    }
}

impl UpstreamError {
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Send one chat-completion request with the given key. Non-2xx
    /// responses are errors.
    async fn send(
        &self,
        secret: &SecretString,
        payload: &ChatPayload,
    ) -> Result<UpstreamResponse, UpstreamError>;
}
