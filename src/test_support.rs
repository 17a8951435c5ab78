//! Synthetic providers shared by the unit tests.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domain::{
    content::Output,
    descriptor::{CapabilityDescriptor, CapabilityKind, Param, ParamType},
    provider::{Capability, CapabilityTable, HealthStatus, MethodHandle, Provider, ResourceEntry},
};
use crate::errors::ProviderError;
use crate::registry::{ProviderEntry, Registry, StaticDiscovery};

pub const HOST: &str = "app";

#[derive(Default)]
pub struct DocsProvider;

#[async_trait]
impl Provider for DocsProvider {
    fn name(&self) -> &str {
        "docs"
    }

    fn info(&self) -> Value {
        json!({ "pages": 2 })
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::Up
    }

    fn declared_capabilities(self: Arc<Self>, host: &str) -> Vec<Capability> {
        CapabilityTable::new(self, host)
            .resource("page", "Documentation page", "text/markdown", |_, id, _| async move {
                Ok(Output::from(format!("# Page {id}")))
            })
            .lister(|_, _| async move {
                Ok(vec![ResourceEntry::new("1", "Intro"), ResourceEntry::new("42", "Answers")])
            })
            .tool(
                "search",
                "Search pages",
                vec![
                    Param::required("query", ParamType::String, "Search query"),
                    Param::optional("limit", ParamType::Integer, "Maximum hits"),
                ],
                |_, arguments, _| async move {
                    let query: String = arguments.require("query")?;
                    let limit: Option<u32> = arguments.optional("limit")?;
                    Ok(Output::from(json!({ "query": query, "limit": limit, "context": arguments.contains("context") })))
                },
            )
            .tool("explode", "Panics", vec![], |_, _, _| async move {
                if true {
                    panic!("kaboom");
                }
                Ok(Output::Empty)
            })
            .tool("fail", "Fails", vec![], |_, _, _| async move {
                Err(ProviderError::new("upstream unavailable"))
            })
            .tool("slow", "Sleeps briefly", vec![], |_, _, _| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Output::from("done"))
            })
            .tool("nothing", "Returns nothing", vec![], |_, _, _| async move { Ok(Output::Empty) })
            .tool("weird", "Returns an unserializable value", vec![], |_, _, _| async move {
                let mut map = HashMap::new();
                map.insert((1, 2), "tuple key");
                Ok(Output::json(&map))
            })
            .tool(
                "embed",
                "Reads a page through the request context",
                vec![Param::required("id", ParamType::String, "Page id")],
                |_, arguments, context| async move {
                    let id: String = arguments.require("id")?;
                    let contents = context.read_resource(&format!("app://docs/page/{id}")).await?;
                    Ok(Output::List(contents.into_iter().map(Output::from).collect()))
                },
            )
            .tool("progress", "Reports progress", vec![], |_, _, context| async move {
                context.report_progress(1.0, Some(2.0));
                context.info("halfway");
                context.report_progress(2.0, Some(2.0));
                Ok(Output::from("finished"))
            })
            .prompt(
                "summary",
                "Summarize a topic",
                vec![Param::required("topic", ParamType::String, "Topic")],
                |_, arguments, _| async move {
                    let topic: String = arguments.require("topic")?;
                    Ok(Output::from(format!("Summarize {topic}")))
                },
            )
            .build()
    }
}

/// Declares a capability under a service name that is not its own.
#[derive(Default)]
pub struct RogueProvider;

#[async_trait]
impl Provider for RogueProvider {
    fn name(&self) -> &str {
        "rogue"
    }

    fn info(&self) -> Value {
        json!({})
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::Up
    }

    fn declared_capabilities(self: Arc<Self>, host: &str) -> Vec<Capability> {
        let honest = CapabilityTable::new(self, host)
            .tool("ok", "Fine", vec![], |_, _, _| async move { Ok(Output::Empty) })
            .build();
        let method = honest[0].method.clone();

        vec![Capability {
            descriptor: CapabilityDescriptor::new(host, "docs", "hijack", CapabilityKind::Tool),
            method,
        }]
    }
}

#[derive(Default)]
pub struct BrokenProvider;

#[async_trait]
impl Provider for BrokenProvider {
    fn name(&self) -> &str {
        "broken"
    }

    fn info(&self) -> Value {
        json!({})
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::Up
    }

    fn declared_capabilities(self: Arc<Self>, _host: &str) -> Vec<Capability> {
        panic!("introspection failed");
    }
}

/// Health reports a fixed status, optionally after a delay.
pub struct StatusProvider {
    pub name: &'static str,
    pub status: HealthStatus,
    pub delay: Duration,
}

#[async_trait]
impl Provider for StatusProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn info(&self) -> Value {
        json!({ "delay_ms": self.delay.as_millis() as u64 })
    }

    async fn health(&self) -> HealthStatus {
        tokio::time::sleep(self.delay).await;
        self.status.clone()
    }

    fn declared_capabilities(self: Arc<Self>, host: &str) -> Vec<Capability> {
        CapabilityTable::new(self, host).build()
    }
}

pub fn docs_registry() -> Registry {
    Registry::discover(
        HOST,
        &StaticDiscovery::new(vec![ProviderEntry::of::<DocsProvider>("docs")]),
    )
}

pub fn invoke_handle(capability: &Capability) -> bool {
    matches!(capability.method, MethodHandle::Invoke(_))
}
