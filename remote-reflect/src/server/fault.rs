//! Reflective failures raised while executing a command.
//!
//! A fault never aborts the exchange: the executor turns it into an instance
//! of the matching failure class and hands back an EXCEPTION handle.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Fault {
    #[error("class not found: {0}")]
    ClassNotFound(String),

    #[error("no field '{field}' on {class}")]
    NoSuchField { class: String, field: String },

    #[error("no method '{method}' on {class}")]
    NoSuchMethod { class: String, method: String },

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: f64, len: usize },

    #[error("cannot instantiate {0}")]
    Instantiation(String),

    #[error("unknown handle {0}")]
    UnknownHandle(String),

    /// Raised by a method body.
    #[error("{0}")]
    Target(String),
}

impl Fault {
    pub fn target(message: impl Into<String>) -> Self {
        Self::Target(message.into())
    }

    pub fn illegal(message: impl Into<String>) -> Self {
        Self::IllegalArgument(message.into())
    }

    /// Name of the failure class instantiated for this fault.
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::ClassNotFound(_) => "ClassNotFoundException",
            Self::NoSuchField { .. } => "NoSuchFieldException",
            Self::NoSuchMethod { .. } => "NoSuchMethodException",
            Self::IllegalArgument(_) => "IllegalArgumentException",
            Self::IndexOutOfBounds { .. } => "IndexOutOfBoundsException",
            Self::Instantiation(_) => "InstantiationException",
            Self::UnknownHandle(_) => "UnknownHandleException",
            Self::Target(_) => "InvocationTargetException",
        }
    }

    pub const CLASS_NAMES: [&'static str; 8] = [
        "ClassNotFoundException",
        "NoSuchFieldException",
        "NoSuchMethodException",
        "IllegalArgumentException",
        "IndexOutOfBoundsException",
        "InstantiationException",
        "UnknownHandleException",
        "InvocationTargetException",
    ];
}
