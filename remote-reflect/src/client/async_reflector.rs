//! Non-blocking client proxy and the one-shot [`Caller`].

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use super::call::{Call, decode_result};
use crate::error::ReflectError;
use crate::protocol::RemoteValue;
use crate::transport::{AsyncHttpTransport, AsyncTransport, ClientConfig, TransportError};
use crate::wire::SerializationContext;

/// Async proxy. Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct AsyncReflector {
    transport: Arc<dyn AsyncTransport>,
}

impl AsyncReflector {
    pub fn new(transport: impl AsyncTransport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    pub fn http(config: &ClientConfig) -> Result<Self, ReflectError> {
        Ok(Self::new(AsyncHttpTransport::new(config)?))
    }

    pub async fn call(&self, call: Call) -> Result<RemoteValue, ReflectError> {
        round_trip(self.transport.as_ref(), &call).await
    }

    /// Run `call` in the background and hand the outcome to `callback`.
    ///
    /// Must be called from within a tokio runtime. The callback fires exactly
    /// once, with [`TransportError::Aborted`] if the call is aborted first.
    pub fn spawn<F>(&self, call: Call, callback: F) -> Caller
    where
        F: FnOnce(Result<RemoteValue, ReflectError>) + Send + 'static,
    {
        Caller::start(Arc::clone(&self.transport), call, callback)
    }

    pub async fn register(&self) -> Result<RemoteValue, ReflectError> {
        self.call(Call::register()).await
    }

    pub async fn increase(&self, handles: &[RemoteValue]) -> Result<RemoteValue, ReflectError> {
        self.call(Call::increase(handles)?).await
    }

    pub async fn decrease(&self, handles: &[RemoteValue]) -> Result<RemoteValue, ReflectError> {
        self.call(Call::decrease(handles)?).await
    }

    pub async fn for_name(&self, name: &str) -> Result<RemoteValue, ReflectError> {
        self.call(Call::for_name(name)).await
    }

    pub async fn new_instance(&self, class: &RemoteValue) -> Result<RemoteValue, ReflectError> {
        self.call(Call::new_instance(class)?).await
    }

    pub async fn get_remote_class(&self, obj: &RemoteValue) -> Result<RemoteValue, ReflectError> {
        self.call(Call::get_remote_class(obj)?).await
    }

    pub async fn get_array_element(
        &self,
        array: &RemoteValue,
        index: usize,
    ) -> Result<RemoteValue, ReflectError> {
        self.call(Call::get_array_element(array, index)?).await
    }

    pub async fn get_array_length(&self, array: &RemoteValue) -> Result<RemoteValue, ReflectError> {
        self.call(Call::get_array_length(array)?).await
    }

    pub async fn set_array_element(
        &self,
        array: &RemoteValue,
        index: usize,
        value: &RemoteValue,
    ) -> Result<RemoteValue, ReflectError> {
        self.call(Call::set_array_element(array, index, value)?).await
    }

    pub async fn get_field(
        &self,
        obj: &RemoteValue,
        name: &str,
    ) -> Result<RemoteValue, ReflectError> {
        self.call(Call::get_field(obj, name)?).await
    }

    pub async fn get(
        &self,
        field: &RemoteValue,
        base: Option<&RemoteValue>,
    ) -> Result<RemoteValue, ReflectError> {
        self.call(Call::get(field, base)?).await
    }

    pub async fn get_method(
        &self,
        obj: &RemoteValue,
        name: &str,
        arg_types: Option<&[RemoteValue]>,
    ) -> Result<RemoteValue, ReflectError> {
        self.call(Call::get_method(obj, name, arg_types)?).await
    }

    pub async fn invoke(
        &self,
        method: &RemoteValue,
        args: Option<&[RemoteValue]>,
    ) -> Result<RemoteValue, ReflectError> {
        self.call(Call::invoke(method, args)?).await
    }

    pub async fn lease(&self, handle: RemoteValue) -> Result<AsyncLease, ReflectError> {
        self.increase(std::slice::from_ref(&handle)).await?;
        Ok(AsyncLease {
            reflector: self.clone(),
            handle,
            armed: true,
        })
    }
}

async fn round_trip(
    transport: &dyn AsyncTransport,
    call: &Call,
) -> Result<RemoteValue, ReflectError> {
    let mut ctx = SerializationContext::new();
    let body = call.encode(&mut ctx);
    debug!(command = call.command().as_str(), "Sending call");
    let reply = transport.exchange(body).await?;
    let result = decode_result(&mut ctx, &reply)?;
    ctx.release();
    debug!(command = call.command().as_str(), result = %result, "Call returned");
    Ok(result)
}

/// A single in-flight call with its own serialization context.
///
/// The transport is the reflector's, shared through its `Arc`. A Caller holds
/// no connection of its own: aborting drops the request future, which for
/// [`AsyncHttpTransport`] cancels the underlying HTTP request.
pub struct Caller {
    abort: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Caller {
    fn start<F>(transport: Arc<dyn AsyncTransport>, call: Call, callback: F) -> Self
    where
        F: FnOnce(Result<RemoteValue, ReflectError>) + Send + 'static,
    {
        let (abort_tx, abort_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            // A dropped Caller closes the channel without aborting.
            let result = tokio::select! {
                result = round_trip(transport.as_ref(), &call) => result,
                Ok(()) = abort_rx => Err(ReflectError::from(TransportError::Aborted)),
            };
            callback(result);
        });
        Self {
            abort: Some(abort_tx),
            task,
        }
    }

    /// Stop waiting for the response. Anything the server already did stays
    /// done.
    pub fn abort(&mut self) {
        if let Some(tx) = self.abort.take() {
            let _ = tx.send(());
        }
    }

    /// Wait until the callback has run.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Caller task failed");
        }
    }
}

/// Async counterpart of [`super::Lease`].
///
/// Prefer [`AsyncLease::release`]; a dropped lease spawns its DECREASE on the
/// current runtime, and without one the release is lost and left to the
/// server's TTL sweep.
pub struct AsyncLease {
    reflector: AsyncReflector,
    handle: RemoteValue,
    armed: bool,
}

impl AsyncLease {
    pub fn handle(&self) -> &RemoteValue {
        &self.handle
    }

    pub async fn release(mut self) -> Result<(), ReflectError> {
        self.armed = false;
        self.reflector
            .decrease(std::slice::from_ref(&self.handle))
            .await
            .map(|_| ())
    }
}

impl std::ops::Deref for AsyncLease {
    type Target = RemoteValue;

    fn deref(&self) -> &RemoteValue {
        &self.handle
    }
}

impl Drop for AsyncLease {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let reflector = self.reflector.clone();
                runtime.spawn(async move {
                    if let Err(e) = reflector.decrease(std::slice::from_ref(&handle)).await {
                        tracing::warn!(handle = %handle, error = %e, "Failed to release lease");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(handle = %handle, "Lease dropped outside a runtime, release lost");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ValueKind;
    use crate::server::{ClassBuilder, ClassLoader, Executor, Fault, IdentityCache};
    use crate::transport::Loopback;
    use async_trait::async_trait;
    use std::time::Duration;

    fn executor() -> Arc<Executor> {
        let loader = Arc::new(ClassLoader::new());
        loader.register(
            ClassBuilder::new("Widget")
                .field("size", 10.0)
                .method("fail", &[], |_, _| Err(Fault::target("broken widget")))
                .build(),
        );
        let cache = Arc::new(IdentityCache::new(Duration::from_secs(60)));
        Arc::new(Executor::new(loader, cache))
    }

    #[tokio::test]
    async fn widget_scenario() {
        let r = AsyncReflector::new(Loopback::new(executor()));
        let class = r.for_name("Widget").await.unwrap();
        assert_eq!(class, RemoteValue::class("Widget"));
        let obj = r.new_instance(&class).await.unwrap();
        assert_eq!(obj, RemoteValue::new(ValueKind::Object, "1"));
        let field = r.get_field(&obj, "size").await.unwrap();
        assert_eq!(
            r.get(&field, Some(&obj)).await.unwrap(),
            RemoteValue::new(ValueKind::Number, "10")
        );

        let fail = r.get_method(&obj, "fail", None).await.unwrap();
        let result = r.invoke(&fail, None).await.unwrap();
        assert!(result.is_exception());
        assert_eq!(
            r.get_remote_class(&result).await.unwrap(),
            RemoteValue::class("InvocationTargetException")
        );
    }

    #[tokio::test]
    async fn callback_fires_once_with_the_result() {
        let r = AsyncReflector::new(Loopback::new(executor()));
        let (tx, rx) = oneshot::channel();
        let caller = r.spawn(Call::for_name("Widget"), move |result| {
            let _ = tx.send(result);
        });
        caller.join().await;
        let result = rx.await.unwrap().unwrap();
        assert_eq!(result, RemoteValue::class("Widget"));
    }

    #[tokio::test]
    async fn concurrent_callers() {
        let r = AsyncReflector::new(Loopback::new(executor()));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let callers: Vec<_> = (0..8)
            .map(|_| {
                let tx = tx.clone();
                let call = Call::new_instance(&RemoteValue::class("Widget")).unwrap();
                r.spawn(call, move |result| {
                    let _ = tx.send(result);
                })
            })
            .collect();
        drop(tx);
        for caller in callers {
            caller.join().await;
        }

        let mut keys = Vec::new();
        while let Some(result) = rx.recv().await {
            keys.push(result.unwrap().value_id);
        }
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 8);
    }

    struct Stalled;

    #[async_trait]
    impl AsyncTransport for Stalled {
        async fn exchange(&self, _body: String) -> Result<String, TransportError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn abort_delivers_aborted() {
        let r = AsyncReflector::new(Stalled);
        let (tx, rx) = oneshot::channel();
        let mut caller = r.spawn(Call::register(), move |result| {
            let _ = tx.send(result);
        });
        caller.abort();
        caller.join().await;
        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, ReflectError::Transport(TransportError::Aborted)));
    }

    #[tokio::test]
    async fn dropping_the_caller_does_not_abort() {
        let r = AsyncReflector::new(Loopback::new(executor()));
        let (tx, rx) = oneshot::channel();
        drop(r.spawn(Call::for_name("Widget"), move |result| {
            let _ = tx.send(result);
        }));
        let result = rx.await.unwrap().unwrap();
        assert_eq!(result, RemoteValue::class("Widget"));
    }

    #[tokio::test]
    async fn leases_release_explicitly_and_on_drop() {
        let exec = executor();
        let r = AsyncReflector::new(Loopback::new(exec.clone()));
        let obj = r.new_instance(&RemoteValue::class("Widget")).await.unwrap();

        let lease = r.lease(obj.clone()).await.unwrap();
        assert_eq!(lease.kind, ValueKind::Object);
        assert_eq!(exec.cache().ref_count(&obj.value_id), Some(1));
        lease.release().await.unwrap();
        assert_eq!(exec.cache().ref_count(&obj.value_id), Some(0));

        let lease = r.lease(obj.clone()).await.unwrap();
        drop(lease);
        for _ in 0..50 {
            if exec.cache().ref_count(&obj.value_id) == Some(0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(exec.cache().ref_count(&obj.value_id), Some(0));
    }
}
