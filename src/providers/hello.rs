//! The `hello` service, a minimal provider used to smoke-test the server

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domain::{
    content::Output,
    descriptor::{Param, ParamType},
    provider::{
        Arguments, CallResult, Capability, CapabilityTable, HealthStatus, Provider, ResourceEntry,
    },
};
use crate::errors::ProviderError;

const DEFAULT_LOCALE: &str = "en_US";

const GREETINGS: [(&str, &str); 2] = [("en_US", "Hello, World!"), ("de_DE", "Hallo, Welt!")];

#[derive(Debug, Default)]
pub struct HelloProvider;

impl HelloProvider {
    fn greeting(locale: &str) -> Result<&'static str, ProviderError> {
        GREETINGS
            .iter()
            .find(|(candidate, _)| *candidate == locale)
            .map(|(_, greeting)| *greeting)
            .ok_or_else(|| ProviderError::new(format!("unsupported locale: {locale}")))
    }

    async fn world(&self, arguments: Arguments) -> CallResult {
        let locale: Option<String> = arguments.optional("locale")?;
        let greeting = Self::greeting(locale.as_deref().unwrap_or(DEFAULT_LOCALE))?;
        Ok(Output::from(greeting))
    }

    async fn greeting_prompt(&self, arguments: Arguments) -> CallResult {
        let name: String = arguments.require("name")?;
        Ok(Output::from(format!("Write a short, friendly greeting for {name}.")))
    }

    async fn locale(&self, id: String) -> CallResult {
        let greeting = Self::greeting(&id)?;
        Ok(Output::json(&json!({ "locale": id, "greeting": greeting })))
    }

    async fn locales(&self) -> Result<Vec<ResourceEntry>, ProviderError> {
        Ok(GREETINGS
            .iter()
            .map(|(locale, _)| ResourceEntry::new(*locale, format!("Greeting in {locale}")))
            .collect())
    }
}

#[async_trait]
impl Provider for HelloProvider {
    fn name(&self) -> &str {
        "hello"
    }

    fn info(&self) -> Value {
        json!({ "locale": DEFAULT_LOCALE })
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::Up
    }

    fn declared_capabilities(self: Arc<Self>, host: &str) -> Vec<Capability> {
        CapabilityTable::new(self, host)
            .tool(
                "world",
                "Print hello world!",
                vec![Param::optional("locale", ParamType::String, "Locale of the greeting")],
                |provider, arguments, _| async move { provider.world(arguments).await },
            )
            .prompt(
                "greeting",
                "Ask for a greeting addressed to someone",
                vec![Param::required("name", ParamType::String, "Who to greet")],
                |provider, arguments, _| async move { provider.greeting_prompt(arguments).await },
            )
            .resource(
                "locale",
                "Greeting in one supported locale",
                "application/json",
                |provider, id, _| async move { provider.locale(id).await },
            )
            .lister(|provider, _| async move { provider.locales().await })
            .build()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::dispatcher::{CallScope, Dispatcher};
    use crate::domain::content::Content;
    use crate::errors::DispatchError;
    use crate::providers::builtin_entries;
    use crate::registry::{Registry, StaticDiscovery};

    fn dispatcher() -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(Registry::discover(
            "app",
            &StaticDiscovery::new(builtin_entries()),
        )))
    }

    #[tokio::test]
    async fn world_greets_in_requested_locale() {
        let contents = dispatcher()
            .call_tool("app_hello_world", Some(json!({"locale": "de_DE"})), CallScope::default())
            .await
            .expect("german greeting");

        assert_eq!(contents, vec![Content::text("Hallo, Welt!")]);
    }

    #[tokio::test]
    async fn unsupported_locale_is_a_provider_error() {
        let error = dispatcher()
            .call_tool("app_hello_world", Some(json!({"locale": "xx_XX"})), CallScope::default())
            .await
            .expect_err("unknown locale");

        assert!(matches!(
            error,
            DispatchError::Provider { ref message, .. } if message == "unsupported locale: xx_XX"
        ));
    }

    #[tokio::test]
    async fn greeting_prompt_requires_a_name() {
        let dispatcher = dispatcher();

        let error = dispatcher
            .get_prompt("app_hello_greeting", None, CallScope::default())
            .await
            .expect_err("name is required");
        assert_eq!(error.code(), "malformed_request");

        let prompt = dispatcher
            .get_prompt("app_hello_greeting", Some(json!({"name": "Ada"})), CallScope::default())
            .await
            .expect("prompt renders");
        assert!(matches!(&prompt.contents[..], [Content::Text { text }] if text.contains("Ada")));
    }

    #[tokio::test]
    async fn locales_are_listed_and_readable() {
        let dispatcher = dispatcher();

        let listed = dispatcher.list_resources(CallScope::default()).await;
        let uris: Vec<_> = listed
            .iter()
            .map(|(descriptor, entry)| descriptor.resource_uri(&entry.id))
            .collect();
        assert_eq!(uris, vec!["app://hello/locale/en_US", "app://hello/locale/de_DE"]);

        let contents = dispatcher
            .read_resource("app://hello/locale/de_DE", None)
            .await
            .expect("locale resource");
        let [Content::Text { text }] = contents.as_slice() else {
            panic!("expected text, got {contents:?}");
        };
        let body: serde_json::Value = serde_json::from_str(text).expect("json body");
        assert_eq!(body["greeting"], "Hallo, Welt!");
    }
}
