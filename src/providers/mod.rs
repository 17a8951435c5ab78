//! Built-in capability providers and their registration list

pub mod core;
pub mod hello;

use crate::config::Config;
use crate::registry::{ProviderEntry, StaticDiscovery};

/// Providers compiled into this binary, in registration order. The core provider
/// is not listed; the registry always registers it first.
pub fn builtin_entries() -> Vec<ProviderEntry> {
    vec![ProviderEntry::of::<hello::HelloProvider>("hello")]
}

pub fn builtin_discovery(config: &Config) -> StaticDiscovery {
    StaticDiscovery::new(builtin_entries()).with_disabled(config.disabled_providers.iter().cloned())
}
