//! Client proxies.
//!
//! [`Reflector`] blocks the calling thread for each round trip;
//! [`AsyncReflector`] awaits it, or runs it in the background through a
//! [`Caller`] that reports to a callback. Both build their requests from
//! [`Call`], which validates handle tags before anything is sent.

mod async_reflector;
mod call;
mod reflector;

pub use async_reflector::{AsyncLease, AsyncReflector, Caller};
pub use call::{Call, decode_result};
pub use reflector::{Lease, Reflector};
