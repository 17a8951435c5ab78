//! Contract between the dispatcher and capability providers
//!
//! A provider declares its capabilities once, as a table of descriptors paired with
//! method handles. The dispatcher never composes method names at call time; it looks
//! the handle up by descriptor.

use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{
    content::Output,
    context::RequestContext,
    descriptor::{CapabilityDescriptor, CapabilityKind, Param},
};
use crate::errors::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down { reason: String },
}

impl HealthStatus {
    pub fn down(reason: impl Into<String>) -> Self {
        Self::Down {
            reason: reason.into(),
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, Self::Up)
    }
}

#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Short name used as the `service` segment of every address this provider owns.
    fn name(&self) -> &str;

    /// Side-effect free description of the current configuration.
    fn info(&self) -> Value;

    /// Live health of the provider and its dependencies. Failures are reported as
    /// [`HealthStatus::Down`], never raised.
    async fn health(&self) -> HealthStatus;

    /// Capability table of this provider, built once at registration.
    fn declared_capabilities(self: Arc<Self>, host: &str) -> Vec<Capability>;
}

/// Keyword arguments supplied by the caller of a tool or prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(Map<String, Value>);

/// Keys owned by the protocol that must never reach a capability method.
pub const RESERVED_ARGUMENTS: [&str; 2] = ["context", "_meta"];

impl Arguments {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn from_value(value: Option<Value>) -> Option<Self> {
        match value {
            None | Some(Value::Null) => Some(Self::default()),
            Some(Value::Object(map)) => Some(Self(map)),
            Some(_) => None,
        }
    }

    pub fn strip_reserved(mut self) -> Self {
        for key in RESERVED_ARGUMENTS {
            self.0.remove(key);
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.get(name).is_some_and(|value| !value.is_null())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn require<T: DeserializeOwned>(&self, name: &str) -> Result<T, ProviderError> {
        let value = self
            .0
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::new(format!("missing argument: {name}")))?;
        serde_json::from_value(value)
            .map_err(|err| ProviderError::new(format!("invalid argument {name}: {err}")))
    }

    pub fn optional<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ProviderError> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.require(name).map(Some),
        }
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

/// One concrete resource returned by a resource lister.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ResourceEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            mime_type: None,
        }
    }
}

pub type CallResult = Result<Output, ProviderError>;

pub type InvokeHandle =
    Arc<dyn Fn(Arguments, RequestContext) -> BoxFuture<'static, CallResult> + Send + Sync>;
pub type ReadHandle =
    Arc<dyn Fn(String, RequestContext) -> BoxFuture<'static, CallResult> + Send + Sync>;
pub type ListHandle = Arc<
    dyn Fn(RequestContext) -> BoxFuture<'static, Result<Vec<ResourceEntry>, ProviderError>>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub enum MethodHandle {
    /// Tools and prompts, invoked with keyword arguments.
    Invoke(InvokeHandle),
    /// Resource types, invoked with the resource id.
    Read {
        read: ReadHandle,
        list: Option<ListHandle>,
    },
}

#[derive(Clone)]
pub struct Capability {
    pub descriptor: CapabilityDescriptor,
    pub method: MethodHandle,
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Builds the capability table of a provider, binding each method to the shared
/// provider instance.
pub struct CapabilityTable<P> {
    provider: Arc<P>,
    host: String,
    service: String,
    capabilities: Vec<Capability>,
}

impl<P: Provider> CapabilityTable<P> {
    pub fn new(provider: Arc<P>, host: &str) -> Self {
        let service = provider.name().to_string();
        Self {
            provider,
            host: host.to_string(),
            service,
            capabilities: Vec::new(),
        }
    }

    fn descriptor(
        &self,
        name: &str,
        kind: CapabilityKind,
        description: &str,
    ) -> CapabilityDescriptor {
        CapabilityDescriptor::new(&self.host, &self.service, name, kind)
            .with_description(description)
    }

    fn invoke_handle<F, Fut>(&self, method: F) -> InvokeHandle
    where
        F: Fn(Arc<P>, Arguments, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        let provider = Arc::clone(&self.provider);
        Arc::new(move |arguments, context| {
            Box::pin(method(Arc::clone(&provider), arguments, context))
        })
    }

    pub fn tool<F, Fut>(
        mut self,
        name: &str,
        description: &str,
        params: Vec<Param>,
        method: F,
    ) -> Self
    where
        F: Fn(Arc<P>, Arguments, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        let descriptor = self
            .descriptor(name, CapabilityKind::Tool, description)
            .with_params(params);
        let method = MethodHandle::Invoke(self.invoke_handle(method));
        self.capabilities.push(Capability { descriptor, method });
        self
    }

    pub fn prompt<F, Fut>(
        mut self,
        name: &str,
        description: &str,
        params: Vec<Param>,
        method: F,
    ) -> Self
    where
        F: Fn(Arc<P>, Arguments, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        let descriptor = self
            .descriptor(name, CapabilityKind::Prompt, description)
            .with_params(params);
        let method = MethodHandle::Invoke(self.invoke_handle(method));
        self.capabilities.push(Capability { descriptor, method });
        self
    }

    pub fn resource<F, Fut>(
        mut self,
        resource_type: &str,
        description: &str,
        mime_type: &str,
        read: F,
    ) -> Self
    where
        F: Fn(Arc<P>, String, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        let descriptor = self
            .descriptor(resource_type, CapabilityKind::Resource, description)
            .with_mime_type(mime_type);
        let provider = Arc::clone(&self.provider);
        let read: ReadHandle =
            Arc::new(move |id, context| Box::pin(read(Arc::clone(&provider), id, context)));
        self.capabilities.push(Capability {
            descriptor,
            method: MethodHandle::Read { read, list: None },
        });
        self
    }

    /// Attaches an enumerator of concrete resources to the most recently declared
    /// resource type.
    pub fn lister<F, Fut>(mut self, list: F) -> Self
    where
        F: Fn(Arc<P>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<ResourceEntry>, ProviderError>> + Send + 'static,
    {
        let provider = Arc::clone(&self.provider);
        let handle: ListHandle =
            Arc::new(move |context| Box::pin(list(Arc::clone(&provider), context)));

        if let Some(Capability {
            method: MethodHandle::Read { list, .. },
            ..
        }) = self
            .capabilities
            .iter_mut()
            .rev()
            .find(|capability| capability.descriptor.kind == CapabilityKind::Resource)
        {
            *list = Some(handle);
        }
        self
    }

    pub fn build(self) -> Vec<Capability> {
        self.capabilities
    }
}
