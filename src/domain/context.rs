//! Per-request handle passed to every capability method
//!
//! A context is valid for the duration of one call. Without a live session it
//! degrades: logging goes to the process logger, progress reports are dropped and
//! session-bound operations fail with `ContextUnavailable`.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::domain::content::Content;
use crate::errors::DispatchError;
use crate::registry::Registry;

/// Outbound half of a live session, as seen by a request context.
pub trait Notify: Send + Sync {
    /// Sends a notification; returns `false` once the session is gone.
    fn notify(&self, method: &str, params: Value) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

pub struct RequestContext {
    request_id: Option<String>,
    progress_token: Option<Value>,
    logger: Option<String>,
    session: Option<Arc<dyn Notify>>,
    dispatcher: Option<Arc<Dispatcher>>,
}

impl RequestContext {
    /// A context that belongs to no request at all.
    pub fn detached() -> Self {
        Self {
            request_id: None,
            progress_token: None,
            logger: None,
            session: None,
            dispatcher: None,
        }
    }

    pub fn bound(dispatcher: Arc<Dispatcher>, session: Option<Arc<dyn Notify>>) -> Self {
        Self {
            dispatcher: Some(dispatcher),
            session,
            ..Self::detached()
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

    pub fn with_logger(mut self, logger: &str) -> Self {
        self.logger = Some(logger.to_string());
        self
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Registry behind the dispatcher that issued this context.
    pub fn registry(&self) -> Option<&Registry> {
        self.dispatcher.as_deref().map(Dispatcher::registry)
    }

    pub fn report_progress(&self, progress: f64, total: Option<f64>) {
        let (Some(session), Some(token)) = (self.session.as_ref(), self.progress_token.as_ref())
        else {
            return;
        };

        let mut params = json!({ "progressToken": token, "progress": progress });
        if let Some(total) = total {
            params["total"] = json!(total);
        }

        if !session.notify("notifications/progress", params) {
            debug!(progress, "session closed, progress report dropped");
        }
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if let Some(session) = self.session.as_ref() {
            let params = json!({
                "level": level,
                "logger": self.logger,
                "data": message,
            });
            if session.notify("notifications/message", params) {
                return;
            }
        }

        let logger = self.logger.as_deref().unwrap_or("provider");
        match level {
            LogLevel::Debug => debug!(logger, "{message}"),
            LogLevel::Info => info!(logger, "{message}"),
            LogLevel::Warning => warn!(logger, "{message}"),
            LogLevel::Error => error!(logger, "{message}"),
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    /// Reads a resource through the dispatcher that issued this context.
    pub fn read_resource(
        &self,
        address: &str,
    ) -> BoxFuture<'static, Result<Vec<Content>, DispatchError>> {
        let dispatcher = self.dispatcher.clone();
        let session = self.session.clone();
        let address = address.to_string();

        Box::pin(async move {
            let Some(dispatcher) = dispatcher else {
                return Err(DispatchError::ContextUnavailable {
                    operation: "read_resource",
                });
            };
            dispatcher.read_resource(&address, session).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, Value)>>,
        closed: bool,
    }

    impl Notify for Recorder {
        fn notify(&self, method: &str, params: Value) -> bool {
            if self.closed {
                return false;
            }
            self.sent
                .lock()
                .expect("recorder lock")
                .push((method.to_string(), params));
            true
        }
    }

    fn session_context(recorder: Arc<Recorder>) -> RequestContext {
        RequestContext {
            session: Some(recorder),
            ..RequestContext::detached()
        }
    }

    #[test]
    fn progress_without_token_is_a_no_op() {
        let recorder = Arc::new(Recorder::default());
        let context = session_context(Arc::clone(&recorder));

        context.report_progress(1.0, Some(2.0));

        assert!(recorder.sent.lock().expect("lock").is_empty());
    }

    #[test]
    fn progress_with_token_notifies_session() {
        let recorder = Arc::new(Recorder::default());
        let context = session_context(Arc::clone(&recorder)).with_progress_token(Some(json!("tok")));

        context.report_progress(24.0, Some(100.0));

        let sent = recorder.sent.lock().expect("lock");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "notifications/progress");
        assert_eq!(sent[0].1["progressToken"], "tok");
        assert_eq!(sent[0].1["total"], 100.0);
    }

    #[test]
    fn progress_on_closed_session_does_not_panic() {
        let recorder = Arc::new(Recorder {
            closed: true,
            ..Recorder::default()
        });
        let context = session_context(recorder).with_progress_token(Some(json!(7)));

        context.report_progress(1.0, None);
        context.warning("still fine");
    }

    #[test]
    fn log_forwards_to_session() {
        let recorder = Arc::new(Recorder::default());
        let context = session_context(Arc::clone(&recorder)).with_logger("hello");

        context.info("processing");

        let sent = recorder.sent.lock().expect("lock");
        assert_eq!(sent[0].0, "notifications/message");
        assert_eq!(sent[0].1["level"], "info");
        assert_eq!(sent[0].1["logger"], "hello");
        assert_eq!(sent[0].1["data"], "processing");
    }

    #[tokio::test]
    async fn detached_context_cannot_read_resources() {
        let context = RequestContext::detached();
        context.info("goes to the process logger");

        let error = context
            .read_resource("app://docs/page/1")
            .await
            .expect_err("no dispatcher bound");
        assert_eq!(
            error,
            DispatchError::ContextUnavailable {
                operation: "read_resource"
            }
        );
        assert!(context.registry().is_none());
    }
}
