// src/notify/error.rs
use std::time::Duration;

use thiserror::Error;

/// Failure of a single send attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// Network failure, timeout, or a non-2xx status other than 429.
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint rejected the request with a rate-limit response.
    #[error("rate limited by endpoint (retry after {retry_after:?})")]
    Quota { retry_after: Option<Duration> },

    /// The request was aborted by shutdown.
    #[error("send cancelled")]
    Cancelled,
}

/// Final outcome of a payload that could not be delivered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: SendError },

    #[error("delivery cancelled by shutdown")]
    Cancelled,

    #[error("endpoint queue is closed")]
    QueueClosed,
}
