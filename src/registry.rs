//! Capability registry
//!
//! Discovers providers once at startup, instantiates exactly one instance of each and
//! flattens their declared capabilities into a catalog keyed by descriptor. The
//! registry is read-only after construction and shared by every session.

use std::{
    any::Any,
    collections::{BTreeMap, HashMap, HashSet},
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use futures::{future::join_all, FutureExt};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::domain::{
    content::Output,
    descriptor::{
        is_valid_capability_name, is_valid_segment, Address, CapabilityDescriptor, CapabilityKind,
    },
    provider::{CallResult, Capability, HealthStatus, InvokeHandle, MethodHandle, Provider},
};
use crate::errors::{DiscoveryError, DispatchError};
use crate::providers::core::CoreProvider;

pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

pub type ProviderFactory = Box<dyn Fn() -> Result<Arc<dyn Provider>, String> + Send + Sync>;

/// A provider type as yielded by discovery, not yet instantiated.
pub struct ProviderEntry {
    pub name: String,
    factory: ProviderFactory,
}

impl ProviderEntry {
    pub fn new<F>(name: &str, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Provider>, String> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            factory: Box::new(factory),
        }
    }

    pub fn of<P: Provider + Default>(name: &str) -> Self {
        Self::new(name, || Ok(Arc::new(P::default()) as Arc<dyn Provider>))
    }
}

pub trait Discovery {
    fn discover(&self) -> Vec<&ProviderEntry>;
}

/// Build-time registration list, filtered by the names disabled in the environment.
pub struct StaticDiscovery {
    entries: Vec<ProviderEntry>,
    disabled: HashSet<String>,
}

impl StaticDiscovery {
    pub fn new(entries: Vec<ProviderEntry>) -> Self {
        Self {
            entries,
            disabled: HashSet::new(),
        }
    }

    pub fn with_disabled<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled.extend(names.into_iter().map(Into::into));
        self
    }
}

impl Discovery for StaticDiscovery {
    fn discover(&self) -> Vec<&ProviderEntry> {
        self.entries
            .iter()
            .filter(|entry| {
                let disabled = self.disabled.contains(&entry.name);
                if disabled {
                    info!(provider = %entry.name, "provider disabled by environment");
                }
                !disabled
            })
            .collect()
    }
}

pub struct ProviderRecord {
    pub name: String,
    pub provider: Arc<dyn Provider>,
    pub capabilities: Vec<Capability>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateHealth {
    pub healthy: bool,
    pub dependencies: BTreeMap<String, HealthStatus>,
}

pub struct Resolved<'a> {
    pub provider: &'a ProviderRecord,
    pub capability: &'a Capability,
    pub resource_id: Option<String>,
}

type IndexKey = (CapabilityKind, String, String);

pub struct Registry {
    host: String,
    records: Vec<ProviderRecord>,
    index: HashMap<IndexKey, (usize, usize)>,
    health_timeout: Duration,
}

impl Registry {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            records: Vec::new(),
            index: HashMap::new(),
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
        }
    }

    /// Builds the registry from the core provider followed by every discovered one.
    /// A provider that fails to load is logged and left out.
    pub fn discover(host: &str, discovery: &dyn Discovery) -> Self {
        let mut registry = Self::new(host);
        registry.register_or_log(Arc::new(CoreProvider::default()));

        for entry in discovery.discover() {
            match instantiate(entry) {
                Ok(provider) => registry.register_or_log(provider),
                Err(err) => {
                    error!(provider = %entry.name, error = %err, "provider discovery failed")
                }
            }
        }

        info!(
            host = %registry.host,
            providers = registry.records.len(),
            tools = registry.list_capabilities(CapabilityKind::Tool).len(),
            resources = registry.list_capabilities(CapabilityKind::Resource).len(),
            prompts = registry.list_capabilities(CapabilityKind::Prompt).len(),
            "capability registry ready"
        );
        registry
    }

    pub fn with_health_timeout(mut self, health_timeout: Duration) -> Self {
        self.health_timeout = health_timeout;
        self
    }

    fn register_or_log(&mut self, provider: Arc<dyn Provider>) {
        if let Err(err) = self.register(provider) {
            error!(error = %err, "provider rejected");
        }
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) -> Result<(), DiscoveryError> {
        let name = provider.name().to_string();
        if !is_valid_segment(&name) {
            return Err(DiscoveryError::InvalidName {
                provider: name.clone(),
                name,
            });
        }
        if self.records.iter().any(|record| record.name == name) {
            return Err(DiscoveryError::DuplicateService { provider: name });
        }

        let host = self.host.clone();
        let declaring = Arc::clone(&provider);
        let mut capabilities =
            catch_unwind(AssertUnwindSafe(move || declaring.declared_capabilities(&host))).map_err(
                |panic| DiscoveryError::Introspection {
                    provider: name.clone(),
                    message: panic_message(panic.as_ref()),
                },
            )?;

        let mut seen = HashSet::new();
        for capability in &capabilities {
            let descriptor = &capability.descriptor;
            if descriptor.service != name || descriptor.host != self.host {
                return Err(DiscoveryError::ServiceMismatch {
                    provider: name,
                    service: descriptor.service.clone(),
                    address: descriptor.address(),
                });
            }
            if !is_valid_capability_name(&descriptor.name) {
                return Err(DiscoveryError::InvalidName {
                    provider: name,
                    name: descriptor.name.clone(),
                });
            }
            if !seen.insert((descriptor.kind, descriptor.name.clone())) {
                return Err(DiscoveryError::DuplicateCapability {
                    provider: name,
                    address: descriptor.address(),
                });
            }
        }

        for meta in meta_tools(&provider, &self.host, &name) {
            if seen.insert((CapabilityKind::Tool, meta.descriptor.name.clone())) {
                capabilities.push(meta);
            }
        }

        let record_index = self.records.len();
        for (capability_index, capability) in capabilities.iter().enumerate() {
            let descriptor = &capability.descriptor;
            self.index.insert(
                (descriptor.kind, name.clone(), descriptor.name.clone()),
                (record_index, capability_index),
            );
        }

        info!(provider = %name, capabilities = capabilities.len(), "provider registered");
        self.records.push(ProviderRecord {
            name,
            provider,
            capabilities,
        });
        Ok(())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn providers(&self) -> &[ProviderRecord] {
        &self.records
    }

    /// Capabilities of one kind in registration order, then declaration order.
    pub fn capabilities(
        &self,
        kind: CapabilityKind,
    ) -> impl Iterator<Item = (&ProviderRecord, &Capability)> {
        self.records.iter().flat_map(move |record| {
            record
                .capabilities
                .iter()
                .filter(move |capability| capability.descriptor.kind == kind)
                .map(move |capability| (record, capability))
        })
    }

    pub fn list_capabilities(&self, kind: CapabilityKind) -> Vec<CapabilityDescriptor> {
        self.capabilities(kind)
            .map(|(_, capability)| capability.descriptor.clone())
            .collect()
    }

    pub fn resolve(
        &self,
        address: &str,
        kind: CapabilityKind,
    ) -> Result<Resolved<'_>, DispatchError> {
        let parsed = match kind {
            CapabilityKind::Tool | CapabilityKind::Prompt => Address::parse_named(address),
            CapabilityKind::Resource => Address::parse_resource(address),
        }
        .filter(|parsed| parsed.host == self.host)
        .ok_or_else(|| DispatchError::not_found(address))?;

        let (record_index, capability_index) = self
            .index
            .get(&(kind, parsed.service, parsed.name))
            .copied()
            .ok_or_else(|| DispatchError::not_found(address))?;

        let provider = &self.records[record_index];
        Ok(Resolved {
            provider,
            capability: &provider.capabilities[capability_index],
            resource_id: parsed.resource_id,
        })
    }

    pub fn info(&self) -> Map<String, Value> {
        self.records
            .iter()
            .map(|record| (record.name.clone(), record.provider.info()))
            .collect()
    }

    pub fn health_timeout(&self) -> Duration {
        self.health_timeout
    }

    /// Checks every provider concurrently, each bounded by the health timeout.
    pub async fn aggregate_health(&self) -> AggregateHealth {
        let checks = self.records.iter().map(|record| async move {
            let status = bounded_health(record.provider.as_ref(), self.health_timeout).await;
            if !status.is_up() {
                warn!(provider = %record.name, status = ?status, "provider is down");
            }
            (record.name.clone(), status)
        });

        let dependencies: BTreeMap<String, HealthStatus> =
            join_all(checks).await.into_iter().collect();
        let healthy = dependencies.values().all(HealthStatus::is_up);
        info!(healthy, "health check");

        AggregateHealth {
            healthy,
            dependencies,
        }
    }
}

/// A provider's health, reported Down when it panics or outlasts `timeout`.
pub(crate) async fn bounded_health(provider: &dyn Provider, timeout: Duration) -> HealthStatus {
    let check = AssertUnwindSafe(provider.health()).catch_unwind();
    match tokio::time::timeout(timeout, check).await {
        Ok(Ok(status)) => status,
        Ok(Err(panic)) => HealthStatus::down(format!(
            "health check panicked: {}",
            panic_message(panic.as_ref())
        )),
        Err(_) => HealthStatus::down("timeout"),
    }
}

/// `info` and `health` tools for a provider that does not declare its own. The
/// health tool is bounded by the timeout of the registry serving the call.
fn meta_tools(provider: &Arc<dyn Provider>, host: &str, service: &str) -> Vec<Capability> {
    let info_provider = Arc::clone(provider);
    let info: InvokeHandle = Arc::new(move |_, _| {
        let provider = Arc::clone(&info_provider);
        Box::pin(async move { CallResult::Ok(Output::Structured(provider.info())) })
    });

    let health_provider = Arc::clone(provider);
    let health: InvokeHandle = Arc::new(move |_, context| {
        let provider = Arc::clone(&health_provider);
        Box::pin(async move {
            let timeout = context
                .registry()
                .map_or(DEFAULT_HEALTH_TIMEOUT, Registry::health_timeout);
            CallResult::Ok(Output::json(&bounded_health(provider.as_ref(), timeout).await))
        })
    });

    vec![
        Capability {
            descriptor: CapabilityDescriptor::new(host, service, "info", CapabilityKind::Tool)
                .with_description("Info about the configuration of this service"),
            method: MethodHandle::Invoke(info),
        },
        Capability {
            descriptor: CapabilityDescriptor::new(host, service, "health", CapabilityKind::Tool)
                .with_description("Health of this service and its dependencies"),
            method: MethodHandle::Invoke(health),
        },
    ]
}

fn instantiate(entry: &ProviderEntry) -> Result<Arc<dyn Provider>, DiscoveryError> {
    match catch_unwind(AssertUnwindSafe(|| (entry.factory)())) {
        Ok(Ok(provider)) if provider.name() != entry.name => Err(DiscoveryError::EntryMismatch {
            entry: entry.name.clone(),
            provider: provider.name().to_string(),
        }),
        Ok(Ok(provider)) => Ok(provider),
        Ok(Err(message)) => Err(DiscoveryError::Instantiation {
            provider: entry.name.clone(),
            message,
        }),
        Err(panic) => Err(DiscoveryError::Instantiation {
            provider: entry.name.clone(),
            message: panic_message(panic.as_ref()),
        }),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
