//! Immutable per-plugin configuration.
//!
//! The collaborator that parses configuration files hands the core exactly one
//! of these records per plugin instance. The core never reads configuration
//! files itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Compatibility options for a bridged plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeOptions {
    /// Report a fixed product and vendor string instead of the actual DAW's.
    /// Some plugins enable broken DAW-specific workarounds otherwise.
    #[serde(default)]
    pub hide_daw: bool,

    /// Prefer the 32-bit module when a plugin ships both architectures.
    #[serde(default)]
    pub prefer_32bit: bool,

    /// Opaque compatibility flags, forwarded to the host process verbatim.
    #[serde(default)]
    pub compat_flags: BTreeMap<String, String>,

    /// Optional group identifier. Group hosting is orchestrated above the
    /// core; the identifier is only plumbed through to the host process.
    #[serde(default)]
    pub group: Option<String>,
}

/// Reported instead of the DAW's product name when `hide_daw` is enabled.
pub const PRODUCT_NAME_OVERRIDE: &str = "Get vinebridge'd";
/// Reported instead of the DAW's vendor name when `hide_daw` is enabled.
pub const VENDOR_NAME_OVERRIDE: &str = "vinebridge";

/// Everything the stub needs to start one bridged instance.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    /// The foreign plugin module the host process should load.
    pub module_path: PathBuf,
    pub options: BridgeOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_to_passthrough() {
        let options = BridgeOptions::default();
        assert!(!options.hide_daw);
        assert!(!options.prefer_32bit);
        assert!(options.compat_flags.is_empty());
        assert!(options.group.is_none());
    }
}
