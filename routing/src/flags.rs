//! Per-provider enable toggles.
//!
//! A provider can be registered but switched off: a disabled provider is
//! never a routing candidate, and analytics does not consider it either.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `ROUTER_PROVIDER_<NAME>_ENABLED` | enabled | `0`/`false`/`no` disables the provider |
//!
//! `<NAME>` is the provider name upper-cased with every non-alphanumeric
//! character replaced by `_` (`gpt-4o` → `ROUTER_PROVIDER_GPT_4O_ENABLED`).

use parking_lot::RwLock;
use std::collections::HashMap;

/// Decides whether a registered provider may be routed to.
pub trait ProviderFlags: Send + Sync {
    fn is_enabled(&self, provider: &str) -> bool;
}

/// Reads `ROUTER_PROVIDER_<NAME>_ENABLED` on every check.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvProviderFlags;

impl EnvProviderFlags {
    pub fn var_name(provider: &str) -> String {
        let name: String = provider
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("ROUTER_PROVIDER_{name}_ENABLED")
    }
}

impl ProviderFlags for EnvProviderFlags {
    fn is_enabled(&self, provider: &str) -> bool {
        std::env::var(Self::var_name(provider))
            .ok()
            .and_then(|v| parse_bool_value(&v))
            .unwrap_or(true)
    }
}

/// Explicit overrides; providers without an entry are enabled.
#[derive(Debug, Default)]
pub struct StaticProviderFlags {
    overrides: RwLock<HashMap<String, bool>>,
}

impl StaticProviderFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, provider: impl Into<String>, enabled: bool) {
        self.overrides.write().insert(provider.into(), enabled);
    }

    pub fn disable(&self, provider: impl Into<String>) {
        self.set(provider, false);
    }

    pub fn clear(&self, provider: &str) {
        self.overrides.write().remove(provider);
    }
}

impl ProviderFlags for StaticProviderFlags {
    fn is_enabled(&self, provider: &str) -> bool {
        self.overrides.read().get(provider).copied().unwrap_or(true)
    }
}

/// Parse a boolean flag value.
/// Accepts "1"/"true"/"yes" and "0"/"false"/"no" (case-insensitive);
/// anything else is unset.
pub(crate) fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
