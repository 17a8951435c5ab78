use std::time::Instant;

use axum::{
    extract::{Query, Request},
    http::Uri,
    middleware::Next,
    response::Response,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::http::handlers::MessageQuery;

/// Installs the process logger. Output goes to stderr so stdout stays free for the
/// stream binding.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let session_id = session_id_from_uri(request.uri());
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started_at.elapsed().as_millis();

    info!(
        method = %method,
        path = %path,
        session_id = session_id.as_deref().unwrap_or("-"),
        status = status.as_u16(),
        duration_ms = elapsed_ms,
        "request summary"
    );

    if status.as_u16() == 401 {
        warn!(method = %method, path = %path, "authentication failure");
    }

    response
}

/// The decoded `session_id` parameter of a message endpoint URI.
fn session_id_from_uri(uri: &Uri) -> Option<String> {
    Query::<MessageQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(query)| query.session_id)
        .filter(|session_id| !session_id.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::http::Uri;

    use super::session_id_from_uri;

    fn session_id(uri: &'static str) -> Option<String> {
        session_id_from_uri(&Uri::from_static(uri))
    }

    #[test]
    fn extracts_session_id_from_query() {
        assert_eq!(session_id("/messages?session_id=abc-123").as_deref(), Some("abc-123"));
        assert_eq!(session_id("/messages?a=1&session_id=xyz").as_deref(), Some("xyz"));
        assert_eq!(session_id("/messages?session_id="), None);
        assert_eq!(session_id("/messages?other=1"), None);
        assert_eq!(session_id("/health"), None);
    }

    #[test]
    fn session_id_is_percent_decoded() {
        assert_eq!(
            session_id("/messages?session_id=abc%2D123%20x").as_deref(),
            Some("abc-123 x")
        );
        assert_eq!(session_id("/messages?session_id=a+b").as_deref(), Some("a b"));
    }
}
