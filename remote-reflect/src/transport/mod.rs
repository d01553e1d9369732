//! Transports carry one envelope per call.
//!
//! # Architecture
//!
//! - **client**: `HttpTransport` (blocking, ureq) and `AsyncHttpTransport` (reqwest)
//! - **loopback**: in-process transport straight into an `Executor`
//! - **http**: axum routes and the `serve` loop for the server side

pub mod client;
pub mod http;
pub mod loopback;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use client::{AsyncHttpTransport, HttpTransport};
pub use loopback::Loopback;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Blocking(#[from] ureq::Error),

    #[error("HTTP request failed: {0}")]
    Async(#[from] reqwest::Error),

    #[error("server answered with status {0}")]
    Status(u16),

    #[error("call aborted before a response arrived")]
    Aborted,

    #[error("loopback execution failed: {0}")]
    Loopback(String),
}

/// Blocking request/response channel.
pub trait Transport: Send + Sync {
    /// POST `body` and return the response body.
    fn exchange(&self, body: String) -> Result<String, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn exchange(&self, body: String) -> Result<String, TransportError> {
        (**self).exchange(body)
    }
}

/// Non-blocking request/response channel.
#[async_trait]
pub trait AsyncTransport: Send + Sync {
    async fn exchange(&self, body: String) -> Result<String, TransportError>;
}

#[async_trait]
impl<T: AsyncTransport + ?Sized> AsyncTransport for Arc<T> {
    async fn exchange(&self, body: String) -> Result<String, TransportError> {
        (**self).exchange(body).await
    }
}

/// Where and how clients reach a server.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("REFLECT_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:5000/reflect".to_string()),
            timeout: Duration::from_secs(30),
        }
    }
}
