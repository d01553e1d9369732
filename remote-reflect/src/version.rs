//! Version information reported by the health check.

use crate::protocol::PROTOCOL_VERSION;

/// Crate version from Cargo.toml
pub const REMOTE_REFLECT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    /// Library version.
    pub remote_reflect: &'static str,
    /// Envelope and command table revision.
    pub protocol: u32,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            remote_reflect: REMOTE_REFLECT_VERSION,
            protocol: PROTOCOL_VERSION,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }
}
