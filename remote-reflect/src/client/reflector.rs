//! Blocking client proxy.

use tracing::debug;

use super::call::{Call, decode_result};
use crate::error::ReflectError;
use crate::protocol::RemoteValue;
use crate::transport::{ClientConfig, HttpTransport, Transport};
use crate::wire::SerializationContext;

/// Blocking proxy: every operation is one round trip on the calling thread.
pub struct Reflector<T> {
    transport: T,
}

impl Reflector<HttpTransport> {
    pub fn http(config: &ClientConfig) -> Self {
        Self::new(HttpTransport::new(config))
    }
}

impl<T: Transport> Reflector<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// One round trip with a context of its own. On a transport failure the
    /// context is dropped without being released.
    pub fn call(&self, call: Call) -> Result<RemoteValue, ReflectError> {
        let mut ctx = SerializationContext::new();
        let body = call.encode(&mut ctx);
        debug!(command = call.command().as_str(), "Sending call");
        let reply = self.transport.exchange(body)?;
        let result = decode_result(&mut ctx, &reply)?;
        ctx.release();
        debug!(command = call.command().as_str(), result = %result, "Call returned");
        Ok(result)
    }

    pub fn register(&self) -> Result<RemoteValue, ReflectError> {
        self.call(Call::register())
    }

    pub fn increase(&self, handles: &[RemoteValue]) -> Result<RemoteValue, ReflectError> {
        self.call(Call::increase(handles)?)
    }

    pub fn decrease(&self, handles: &[RemoteValue]) -> Result<RemoteValue, ReflectError> {
        self.call(Call::decrease(handles)?)
    }

    pub fn for_name(&self, name: &str) -> Result<RemoteValue, ReflectError> {
        self.call(Call::for_name(name))
    }

    pub fn new_instance(&self, class: &RemoteValue) -> Result<RemoteValue, ReflectError> {
        self.call(Call::new_instance(class)?)
    }

    pub fn get_remote_class(&self, obj: &RemoteValue) -> Result<RemoteValue, ReflectError> {
        self.call(Call::get_remote_class(obj)?)
    }

    pub fn get_array_element(
        &self,
        array: &RemoteValue,
        index: usize,
    ) -> Result<RemoteValue, ReflectError> {
        self.call(Call::get_array_element(array, index)?)
    }

    pub fn get_array_length(&self, array: &RemoteValue) -> Result<RemoteValue, ReflectError> {
        self.call(Call::get_array_length(array)?)
    }

    pub fn set_array_element(
        &self,
        array: &RemoteValue,
        index: usize,
        value: &RemoteValue,
    ) -> Result<RemoteValue, ReflectError> {
        self.call(Call::set_array_element(array, index, value)?)
    }

    pub fn get_field(&self, obj: &RemoteValue, name: &str) -> Result<RemoteValue, ReflectError> {
        self.call(Call::get_field(obj, name)?)
    }

    pub fn get(
        &self,
        field: &RemoteValue,
        base: Option<&RemoteValue>,
    ) -> Result<RemoteValue, ReflectError> {
        self.call(Call::get(field, base)?)
    }

    pub fn get_method(
        &self,
        obj: &RemoteValue,
        name: &str,
        arg_types: Option<&[RemoteValue]>,
    ) -> Result<RemoteValue, ReflectError> {
        self.call(Call::get_method(obj, name, arg_types)?)
    }

    pub fn invoke(
        &self,
        method: &RemoteValue,
        args: Option<&[RemoteValue]>,
    ) -> Result<RemoteValue, ReflectError> {
        self.call(Call::invoke(method, args)?)
    }

    /// Hold `handle` on the server until the lease is released or dropped.
    pub fn lease(&self, handle: RemoteValue) -> Result<Lease<'_, T>, ReflectError> {
        self.increase(std::slice::from_ref(&handle))?;
        Ok(Lease {
            reflector: self,
            handle,
            armed: true,
        })
    }
}

/// Scoped reference on a server-side handle: INCREASE on acquisition,
/// DECREASE exactly once on release or drop.
pub struct Lease<'r, T: Transport> {
    reflector: &'r Reflector<T>,
    handle: RemoteValue,
    armed: bool,
}

impl<T: Transport> Lease<'_, T> {
    pub fn handle(&self) -> &RemoteValue {
        &self.handle
    }

    /// Release now and report the outcome.
    pub fn release(mut self) -> Result<(), ReflectError> {
        self.armed = false;
        self.reflector
            .decrease(std::slice::from_ref(&self.handle))
            .map(|_| ())
    }
}

impl<T: Transport> std::ops::Deref for Lease<'_, T> {
    type Target = RemoteValue;

    fn deref(&self) -> &RemoteValue {
        &self.handle
    }
}

impl<T: Transport> Drop for Lease<'_, T> {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = self.reflector.decrease(std::slice::from_ref(&self.handle))
        {
            tracing::warn!(handle = %self.handle, error = %e, "Failed to release lease");
        }
    }
}
