//! Upstream failures tagged with the key that produced them.

use crate::storage::KeyId;
use crate::upstream::UpstreamError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Upstream statuses that mean the request itself (or the key) is bad.
/// Retrying the same key will not help.
const TERMINAL_STATUSES: [u16; 3] = [400, 401, 403];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Do not retry with the same key.
    Terminal,
    /// Worth another attempt after backoff.
    Retryable,
}

impl ErrorClass {
    pub fn classify(status: Option<u16>) -> Self {
        match status {
            Some(code) if TERMINAL_STATUSES.contains(&code) => Self::Terminal,
            _ => Self::Retryable,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminal => write!(f, "terminal"),
            Self::Retryable => write!(f, "retryable"),
        }
    }
}

/// An upstream failure together with the key it happened on.
#[derive(Error, Debug, Clone)]
#[error("Upstream call with key {key_id} failed ({class}): {cause}")]
pub struct TaggedUpstreamError {
    pub key_id: KeyId,
    pub class: ErrorClass,
    pub cause: UpstreamError,
}

impl TaggedUpstreamError {
    pub fn new(key_id: KeyId, cause: UpstreamError) -> Self {
        Self {
            key_id,
            class: ErrorClass::classify(cause.status),
            cause,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.class == ErrorClass::Terminal
    }

    pub fn status(&self) -> Option<u16> {
        self.cause.status
    }
}
