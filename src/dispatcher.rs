//! Request dispatcher
//!
//! Routes decoded protocol requests to the owning provider, marshals the result and
//! contains every provider failure, including panics, at this boundary.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::domain::{
    content::{marshal, Content, ResourceContents},
    context::{Notify, RequestContext},
    descriptor::{CapabilityDescriptor, CapabilityKind},
    provider::{Arguments, CallResult, MethodHandle, ResourceEntry},
};
use crate::errors::DispatchError;
use crate::registry::{panic_message, Registry};

/// Session-side facts a call is made under.
#[derive(Clone, Default)]
pub struct CallScope {
    pub session: Option<Arc<dyn Notify>>,
    pub request_id: Option<String>,
    pub progress_token: Option<Value>,
}

impl CallScope {
    pub fn session(session: Arc<dyn Notify>) -> Self {
        Self {
            session: Some(session),
            ..Self::default()
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_progress_token(mut self, progress_token: Option<Value>) -> Self {
        self.progress_token = progress_token;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptOutput {
    pub description: String,
    pub contents: Vec<Content>,
}

pub struct Dispatcher {
    registry: Registry,
}

impl Dispatcher {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn list_capabilities(&self, kind: CapabilityKind) -> Vec<CapabilityDescriptor> {
        self.registry.list_capabilities(kind)
    }

    /// Looks up a capability without invoking it.
    pub fn get_capability(
        &self,
        kind: CapabilityKind,
        address: &str,
    ) -> Result<CapabilityDescriptor, DispatchError> {
        self.registry
            .resolve(address, kind)
            .map(|resolved| resolved.capability.descriptor.clone())
    }

    pub async fn call_tool(
        self: &Arc<Self>,
        address: &str,
        arguments: Option<Value>,
        scope: CallScope,
    ) -> Result<Vec<Content>, DispatchError> {
        self.invoke(CapabilityKind::Tool, address, arguments, scope).await
    }

    pub async fn get_prompt(
        self: &Arc<Self>,
        address: &str,
        arguments: Option<Value>,
        scope: CallScope,
    ) -> Result<PromptOutput, DispatchError> {
        let description = self
            .get_capability(CapabilityKind::Prompt, address)
            .map(|descriptor| descriptor.description)
            .unwrap_or_default();
        let contents = self
            .invoke(CapabilityKind::Prompt, address, arguments, scope)
            .await?;

        Ok(PromptOutput {
            description,
            contents,
        })
    }

    /// Entry point used by request contexts to re-enter resource resolution.
    pub async fn read_resource(
        self: &Arc<Self>,
        uri: &str,
        session: Option<Arc<dyn Notify>>,
    ) -> Result<Vec<Content>, DispatchError> {
        let scope = CallScope {
            session,
            ..CallScope::default()
        };
        self.invoke(CapabilityKind::Resource, uri, None, scope).await
    }

    /// Reads a resource and shapes the result for a `resources/read` response.
    pub async fn read_resource_contents(
        self: &Arc<Self>,
        uri: &str,
        scope: CallScope,
    ) -> Result<Vec<ResourceContents>, DispatchError> {
        let mime_type = self
            .get_capability(CapabilityKind::Resource, uri)
            .ok()
            .and_then(|descriptor| descriptor.mime_type);
        let contents = self
            .invoke(CapabilityKind::Resource, uri, None, scope)
            .await?;

        Ok(contents
            .into_iter()
            .map(|content| content.into_resource_contents(uri, mime_type.as_deref()))
            .collect())
    }

    /// Concrete resources reported by every resource lister, in registration order.
    /// A failing lister is logged and contributes nothing.
    pub async fn list_resources(
        self: &Arc<Self>,
        scope: CallScope,
    ) -> Vec<(CapabilityDescriptor, ResourceEntry)> {
        let mut listed = Vec::new();

        for (record, capability) in self.registry.capabilities(CapabilityKind::Resource) {
            let MethodHandle::Read {
                list: Some(list), ..
            } = &capability.method
            else {
                continue;
            };

            let context = self.context(&scope, &record.name);
            match AssertUnwindSafe(list(context)).catch_unwind().await {
                Ok(Ok(entries)) => listed.extend(
                    entries
                        .into_iter()
                        .map(|entry| (capability.descriptor.clone(), entry)),
                ),
                Ok(Err(err)) => warn!(
                    provider = %record.name,
                    address = %capability.descriptor.address(),
                    error = %err,
                    "resource lister failed"
                ),
                Err(panic) => warn!(
                    provider = %record.name,
                    address = %capability.descriptor.address(),
                    error = %panic_message(panic.as_ref()),
                    "resource lister panicked"
                ),
            }
        }

        listed
    }

    /// Resolves, validates, invokes and marshals one call.
    pub async fn invoke(
        self: &Arc<Self>,
        kind: CapabilityKind,
        address: &str,
        arguments: Option<Value>,
        scope: CallScope,
    ) -> Result<Vec<Content>, DispatchError> {
        let result = self.start(kind, address, arguments, &scope);
        let (provider, call) = match result {
            Ok(started) => started,
            Err(err) => {
                error!(address = %address, kind = %kind, error = %err, "dispatch rejected");
                return Err(err);
            }
        };

        debug!(address = %address, provider = %provider, "invoking capability");
        let outcome = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(output)) => return Ok(marshal(output)),
            Ok(Err(err)) => err.message,
            Err(panic) => format!("provider panicked: {}", panic_message(panic.as_ref())),
        };

        error!(address = %address, provider = %provider, error = %outcome, "capability failed");
        Err(DispatchError::Provider {
            provider,
            address: address.to_string(),
            message: outcome,
        })
    }

    fn start(
        self: &Arc<Self>,
        kind: CapabilityKind,
        address: &str,
        arguments: Option<Value>,
        scope: &CallScope,
    ) -> Result<(String, BoxFuture<'static, CallResult>), DispatchError> {
        let resolved = self.registry.resolve(address, kind)?;
        let provider = resolved.provider.name.clone();
        let context = self.context(scope, &provider);

        let call = match &resolved.capability.method {
            MethodHandle::Invoke(invoke) => {
                let arguments = Arguments::from_value(arguments)
                    .ok_or_else(|| {
                        DispatchError::malformed(address, "arguments must be an object")
                    })?
                    .strip_reserved();

                if let Some(missing) = resolved
                    .capability
                    .descriptor
                    .required_params()
                    .find(|param| !arguments.contains(&param.name))
                {
                    return Err(DispatchError::malformed(
                        address,
                        format!("missing required argument: {}", missing.name),
                    ));
                }

                invoke(arguments, context)
            }
            MethodHandle::Read { read, .. } => {
                let id = resolved
                    .resource_id
                    .ok_or_else(|| DispatchError::malformed(address, "resource id is required"))?;
                read(id, context)
            }
        };

        Ok((provider, call))
    }

    fn context(self: &Arc<Self>, scope: &CallScope, provider: &str) -> RequestContext {
        RequestContext::bound(Arc::clone(self), scope.session.clone())
            .with_request_id(scope.request_id.clone())
            .with_progress_token(scope.progress_token.clone())
            .with_logger(provider)
    }
}
