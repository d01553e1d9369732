//! remote-reflect: manipulate objects living in another process through
//! serialized reflection commands over HTTP.

mod error;
mod version;

pub mod client;
pub mod protocol;
pub mod server;
pub mod service;
pub mod transport;
pub mod wire;

pub use client::{AsyncLease, AsyncReflector, Call, Caller, Lease, Reflector};
pub use error::ReflectError;
pub use protocol::{Command, PROTOCOL_VERSION, ProtocolError, RemoteValue, ValueKind};
pub use service::{HealthSnapshot, HealthStatus, ReflectService};
pub use transport::{
    AsyncHttpTransport, AsyncTransport, ClientConfig, HttpTransport, Loopback, Transport,
    TransportError,
};
pub use version::{REMOTE_REFLECT_VERSION, VersionInfo};
