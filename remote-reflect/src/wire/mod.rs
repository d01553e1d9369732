//! Wire format shared by client and server.
//!
//! # Architecture
//!
//! - **node**: `Datum` / `Node` value trees
//! - **context**: per-turn identity bookkeeping (`SerializationContext`)
//! - **codec**: XML envelope encode/decode

pub mod codec;
pub mod context;
pub mod node;
mod xml;

pub use codec::{Request, decode_request, decode_response, encode_request, encode_response};
pub use context::SerializationContext;
pub use node::{Datum, Node};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("missing <{0}> element")]
    Missing(&'static str),

    #[error("expected <{expected}>, found <{found}>")]
    Unexpected {
        expected: &'static str,
        found: String,
    },

    #[error("invalid id count '{0}'")]
    BadCount(String),

    #[error("invalid number '{0}'")]
    BadNumber(String),

    #[error("invalid object id '{0}'")]
    BadId(String),

    #[error("reference to unknown object id {0}")]
    UnknownId(u64),
}
