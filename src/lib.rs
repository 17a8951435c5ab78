use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod providers;
pub mod registry;
pub mod stdio;

#[cfg(test)]
pub(crate) mod test_support;

use config::Config;
use dispatcher::Dispatcher;
use http::sessions::SessionMap;
use registry::Registry;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub sessions: Arc<SessionMap>,
    pub api_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(api_token: Option<String>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            sessions: Arc::new(SessionMap::default()),
            api_token: api_token.map(Arc::<str>::from),
        }
    }
}

/// Discovers the built-in providers and wraps them in a dispatcher.
pub fn build_dispatcher(config: &Config) -> Arc<Dispatcher> {
    let registry = Registry::discover(&config.host_name, &providers::builtin_discovery(config))
        .with_health_timeout(config.health_timeout);
    Arc::new(Dispatcher::new(registry))
}

pub fn build_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/sse", get(http::handlers::sse))
        .route("/messages", post(http::handlers::messages))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer_token,
        ));

    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .merge(protected)
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::domain::provider::HealthStatus;
    use crate::registry::{ProviderEntry, StaticDiscovery};
    use crate::test_support::{DocsProvider, StatusProvider, HOST};

    use super::*;

    const TOKEN: &str = "token-1234567890ab";

    fn dispatcher() -> Arc<Dispatcher> {
        let registry = Registry::discover(
            HOST,
            &StaticDiscovery::new(vec![
                ProviderEntry::of::<DocsProvider>("docs"),
                ProviderEntry::new("flaky", || {
                    Ok(Arc::new(StatusProvider {
                        name: "flaky",
                        status: HealthStatus::down("unreachable"),
                        delay: Duration::ZERO,
                    }) as Arc<dyn crate::domain::provider::Provider>)
                }),
            ]),
        );
        Arc::new(Dispatcher::new(registry))
    }

    fn app() -> Router {
        build_app(AppState::new(None, dispatcher()))
    }

    fn app_with_token() -> Router {
        build_app(AppState::new(Some(TOKEN.to_string()), dispatcher()))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        serde_json::from_slice(&body).expect("json body")
    }

    fn post_message(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request build")
    }

    /// Reads SSE frames until one complete event is buffered.
    async fn next_event(body: &mut Body, buffer: &mut String) -> String {
        loop {
            if let Some(end) = buffer.find("\n\n") {
                let event = buffer[..end].to_string();
                buffer.drain(..end + 2);
                return event;
            }

            let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
                .await
                .expect("event within timeout")
                .expect("stream still open")
                .expect("frame");
            if let Ok(data) = frame.into_data() {
                buffer.push_str(std::str::from_utf8(&data).expect("utf8 event"));
            }
        }
    }

    fn event_field<'a>(event: &'a str, field: &str) -> Option<&'a str> {
        event
            .lines()
            .find_map(|line| line.strip_prefix(field)?.strip_prefix(": "))
    }

    #[tokio::test]
    async fn health_is_public_and_always_ok() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["healthy"], false);
        assert_eq!(body["dependencies"]["docs"]["status"], "UP");
        assert_eq!(body["dependencies"]["flaky"]["status"], "DOWN");
        assert_eq!(body["dependencies"]["flaky"]["reason"], "unreachable");
    }

    #[tokio::test]
    async fn discovery_is_public() {
        let response = app_with_token()
            .oneshot(
                Request::builder()
                    .uri("/.well-known/mcp")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["sse_endpoint"], "/sse");
        assert_eq!(body["messages_endpoint"], "/messages");
        assert_eq!(body["host"], "app");
    }

    #[tokio::test]
    async fn sse_requires_token_when_configured() {
        let response = app_with_token()
            .oneshot(
                Request::builder()
                    .uri("/sse")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["code"], "missing_token");
    }

    #[tokio::test]
    async fn messages_reject_wrong_token() {
        let mut request = post_message("/messages?session_id=abc", "{}");
        request.headers_mut().insert(
            header::AUTHORIZATION,
            "Bearer wrong-token".parse().expect("header value"),
        );

        let response = app_with_token()
            .oneshot(request)
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn messages_without_session_id_are_bad_requests() {
        let response = app()
            .oneshot(post_message("/messages", "{}"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "missing_session_id");
    }

    #[tokio::test]
    async fn messages_for_unknown_session_are_not_found() {
        let response = app()
            .oneshot(post_message(
                "/messages?session_id=00000000-0000-0000-0000-000000000000",
                r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/mcp")
                    .method("POST")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sse_session_round_trip() {
        let state = AppState::new(Some(TOKEN.to_string()), dispatcher());
        let app = build_app(state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/sse")
                    .method("GET")
                    .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body();
        let mut buffer = String::new();
        let endpoint = next_event(&mut body, &mut buffer).await;
        assert_eq!(event_field(&endpoint, "event"), Some("endpoint"));
        let messages_uri = event_field(&endpoint, "data")
            .expect("endpoint data")
            .to_string();
        assert!(messages_uri.starts_with("/messages?session_id="));
        assert_eq!(state.sessions.len(), 1);

        let post = |payload: String| {
            let mut request = post_message(&messages_uri, &payload);
            request.headers_mut().insert(
                header::AUTHORIZATION,
                format!("Bearer {TOKEN}").parse().expect("header value"),
            );
            app.clone().oneshot(request)
        };

        let accepted = post(
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": {"name": "app_docs_search", "arguments": {"query": "sse"}}
            })
            .to_string(),
        )
        .await
        .expect("request execution");
        assert_eq!(accepted.status(), StatusCode::ACCEPTED);

        let message = next_event(&mut body, &mut buffer).await;
        assert_eq!(event_field(&message, "event"), Some("message"));
        let response: Value =
            serde_json::from_str(event_field(&message, "data").expect("message data"))
                .expect("json message");
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["isError"], false);

        let rejected = post("{not json".to_string()).await.expect("request execution");
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

        drop(body);
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let state = AppState::new(None, dispatcher());
        let app = build_app(state.clone());

        let mut streams = Vec::new();
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri("/sse")
                        .method("GET")
                        .body(Body::empty())
                        .expect("request build"),
                )
                .await
                .expect("request execution");
            let mut body = response.into_body();
            let mut buffer = String::new();
            let endpoint = next_event(&mut body, &mut buffer).await;
            let uri = event_field(&endpoint, "data").expect("endpoint data").to_string();
            streams.push((body, buffer, uri));
        }
        assert_ne!(streams[0].2, streams[1].2);
        assert_eq!(state.sessions.len(), 2);

        for (index, (_, _, uri)) in streams.iter().enumerate() {
            let payload = json!({"jsonrpc": "2.0", "id": index, "method": "ping"}).to_string();
            let response = app
                .clone()
                .oneshot(post_message(uri, &payload))
                .await
                .expect("request execution");
            assert_eq!(response.status(), StatusCode::ACCEPTED);
        }

        for (index, (body, buffer, _)) in streams.iter_mut().enumerate() {
            let message = next_event(body, buffer).await;
            let response: Value =
                serde_json::from_str(event_field(&message, "data").expect("message data"))
                    .expect("json message");
            assert_eq!(response["id"], index);
        }
    }
}
