//! The `mcp` service: server-wide meta capabilities

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::domain::{
    content::Output,
    context::RequestContext,
    provider::{CallResult, Capability, CapabilityTable, HealthStatus, Provider},
};
use crate::errors::{DispatchError, ProviderError};

pub const CORE_SERVICE: &str = "mcp";

#[derive(Debug)]
pub struct CoreProvider {
    started_at: DateTime<Utc>,
}

impl Default for CoreProvider {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
        }
    }
}

impl CoreProvider {
    async fn server_info(&self, context: RequestContext) -> CallResult {
        let registry = context.registry().ok_or_else(unavailable)?;

        Ok(Output::Structured(json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": registry.host(),
            "providers": registry.info(),
        })))
    }

    async fn aggregate_health(&self, context: RequestContext) -> CallResult {
        let registry = context.registry().ok_or_else(unavailable)?;
        Ok(Output::json(&registry.aggregate_health().await))
    }
}

fn unavailable() -> ProviderError {
    DispatchError::ContextUnavailable {
        operation: "registry",
    }
    .into()
}

#[async_trait]
impl Provider for CoreProvider {
    fn name(&self) -> &str {
        CORE_SERVICE
    }

    fn info(&self) -> Value {
        json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": self.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "uptime_seconds": (Utc::now() - self.started_at).num_seconds(),
        })
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::Up
    }

    fn declared_capabilities(self: Arc<Self>, host: &str) -> Vec<Capability> {
        CapabilityTable::new(self, host)
            .tool(
                "info",
                "Info about the server and every registered service",
                vec![],
                |provider, _, context| async move { provider.server_info(context).await },
            )
            .tool(
                "health",
                "Aggregate health of every registered service",
                vec![],
                |provider, _, context| async move { provider.aggregate_health(context).await },
            )
            .build()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::dispatcher::{CallScope, Dispatcher};
    use crate::domain::content::Content;
    use crate::test_support::docs_registry;

    #[tokio::test]
    async fn health_reports_every_service() {
        let dispatcher = Arc::new(Dispatcher::new(docs_registry()));

        let contents = dispatcher
            .call_tool("app_mcp_health", None, CallScope::default())
            .await
            .expect("aggregate health");

        let [Content::Text { text }] = contents.as_slice() else {
            panic!("expected text, got {contents:?}");
        };
        let health: serde_json::Value = serde_json::from_str(text).expect("json body");
        assert_eq!(health["healthy"], true);
        assert_eq!(health["dependencies"]["docs"], json!({"status": "UP"}));
        assert_eq!(health["dependencies"]["mcp"], json!({"status": "UP"}));
    }

    #[tokio::test]
    async fn info_includes_provider_info() {
        let dispatcher = Arc::new(Dispatcher::new(docs_registry()));

        let contents = dispatcher
            .call_tool("app_mcp_info", None, CallScope::default())
            .await
            .expect("server info");

        let [Content::Text { text }] = contents.as_slice() else {
            panic!("expected text, got {contents:?}");
        };
        let info: serde_json::Value = serde_json::from_str(text).expect("json body");
        assert_eq!(info["host"], "app");
        assert!(info["providers"]["mcp"]["started_at"]
            .as_str()
            .is_some_and(|started_at| started_at.ends_with('Z')));
        assert_eq!(info["providers"]["docs"]["pages"], 2);
    }
}
