//! In-process transport: envelopes go straight to an [`Executor`].

use std::sync::Arc;

use async_trait::async_trait;

use super::{AsyncTransport, Transport, TransportError};
use crate::server::Executor;

#[derive(Clone)]
pub struct Loopback {
    executor: Arc<Executor>,
}

impl Loopback {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }
}

impl Transport for Loopback {
    fn exchange(&self, body: String) -> Result<String, TransportError> {
        Ok(self.executor.execute(&body))
    }
}

#[async_trait]
impl AsyncTransport for Loopback {
    async fn exchange(&self, body: String) -> Result<String, TransportError> {
        let executor = Arc::clone(&self.executor);
        tokio::task::spawn_blocking(move || executor.execute(&body))
            .await
            .map_err(|e| TransportError::Loopback(e.to_string()))
    }
}
