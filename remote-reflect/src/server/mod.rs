//! Server half: object model, class registry, identity cache and the command
//! executor.

pub mod cache;
pub mod executor;
pub mod fault;
pub mod loader;
pub mod object;

pub use cache::{IdentityCache, RefCountCache};
pub use executor::Executor;
pub use fault::Fault;
pub use loader::ClassLoader;
pub use object::{ClassBuilder, ClassDef, Instance, Value};
