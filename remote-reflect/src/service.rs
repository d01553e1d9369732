//! Reflection service shared by the HTTP handlers and the sweep task.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::protocol::RemoteValue;
use crate::server::{ClassLoader, Executor, IdentityCache};
use crate::version::VersionInfo;
use crate::wire::{SerializationContext, encode_response};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Ready,
    ShuttingDown,
}

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub handles: usize,
    pub classes: usize,
    pub version: VersionInfo,
}

pub struct ReflectService {
    executor: Arc<Executor>,
    version: VersionInfo,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ReflectService {
    /// Service with a fresh identity cache evicting after `handle_ttl`.
    pub fn new(loader: Arc<ClassLoader>, handle_ttl: Duration) -> Self {
        let cache = Arc::new(IdentityCache::new(handle_ttl));
        Self::with_executor(Arc::new(Executor::new(loader, cache)))
    }

    pub fn with_executor(executor: Arc<Executor>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            executor,
            version: VersionInfo::new(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Run one envelope on the blocking pool; method bodies are user code.
    pub async fn execute(&self, body: String) -> String {
        let executor = Arc::clone(&self.executor);
        match tokio::task::spawn_blocking(move || executor.execute(&body)).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(error = %e, "Executor task failed");
                let mut ctx = SerializationContext::new();
                encode_response(&mut ctx, Some(&RemoteValue::null().to_datum()))
            }
        }
    }

    /// Evict idle unreferenced handles; returns how many were dropped.
    pub fn sweep(&self) -> usize {
        self.executor.cache().sweep()
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: if self.is_shutting_down() {
                HealthStatus::ShuttingDown
            } else {
                HealthStatus::Ready
            },
            handles: self.executor.cache().len(),
            classes: self.executor.loader().len(),
            version: self.version.clone(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, ValueKind};
    use crate::wire::{decode_response, encode_request};

    fn service() -> ReflectService {
        ReflectService::new(Arc::new(ClassLoader::new()), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn execute_runs_commands() {
        let service = service();
        let mut ctx = SerializationContext::new();
        let body = encode_request(
            &mut ctx,
            &Command::Register.to_datum(),
            &[],
        );
        let reply = service.execute(body).await;
        let rtrn = decode_response(&mut ctx, &reply).unwrap().unwrap();
        let value = RemoteValue::from_datum(&rtrn).unwrap();
        assert_eq!(value.kind, ValueKind::Reflector);
        assert_eq!(service.health().handles, 1);
    }

    #[test]
    fn shutdown_flips_health() {
        let service = service();
        assert_eq!(service.health().status, HealthStatus::Ready);
        service.trigger_shutdown();
        assert!(service.is_shutting_down());
        assert_eq!(service.health().status, HealthStatus::ShuttingDown);
    }

    #[test]
    fn sweep_on_empty_cache() {
        assert_eq!(service().sweep(), 0);
    }
}
