//! One protocol session, independent of the transport carrying it
//!
//! Inbound messages are handled strictly in arrival order. Everything the session
//! sends, responses and notifications alike, goes through a single traced outbound
//! channel that the transport drains.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::dispatcher::Dispatcher;
use crate::domain::context::Notify;
use crate::mcp::rpc::{json_rpc_error, json_rpc_notification, PARSE_ERROR};
use crate::mcp::server::handle_json_rpc_payload;
use crate::mcp::telemetry::MessageTracer;

/// Sending half of a session. Observes every message on its way out.
pub struct Outbound {
    sender: mpsc::UnboundedSender<Value>,
    tracer: Arc<MessageTracer>,
}

impl Outbound {
    pub fn send(&self, message: Value) -> bool {
        self.tracer.observe_outbound(&message);
        self.sender.send(message).is_ok()
    }
}

impl Notify for Outbound {
    fn notify(&self, method: &str, params: Value) -> bool {
        self.send(json_rpc_notification(method, params))
    }
}

pub struct Session {
    id: String,
    dispatcher: Arc<Dispatcher>,
    outbound: Arc<Outbound>,
    tracer: Arc<MessageTracer>,
}

impl Session {
    /// Creates a session with a fresh id. The receiver yields every message the
    /// session sends.
    pub fn new(dispatcher: Arc<Dispatcher>) -> (Self, mpsc::UnboundedReceiver<Value>) {
        Self::with_id(&Uuid::new_v4().to_string(), dispatcher)
    }

    pub fn with_id(
        id: &str,
        dispatcher: Arc<Dispatcher>,
    ) -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let tracer = Arc::new(MessageTracer::new("server", id));
        let outbound = Arc::new(Outbound {
            sender,
            tracer: Arc::clone(&tracer),
        });

        debug!(session_id = %id, "session opened");
        let session = Self {
            id: id.to_string(),
            dispatcher,
            outbound,
            tracer,
        };
        (session, receiver)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn notifier(&self) -> Arc<dyn Notify> {
        Arc::clone(&self.outbound) as Arc<dyn Notify>
    }

    pub fn tracer(&self) -> &MessageTracer {
        &self.tracer
    }

    pub async fn handle_message(&self, message: Value) {
        self.tracer.observe_inbound(&message);
        if let Some(response) = handle_json_rpc_payload(self, message).await {
            self.outbound.send(response);
        }
    }

    /// Handles one line of the line-framed encoding. Blank lines are skipped; a
    /// line that is not UTF-8 JSON gets a parse error.
    pub async fn handle_line(&self, line: &[u8]) {
        let line = line.trim_ascii();
        if line.is_empty() {
            return;
        }

        match serde_json::from_slice::<Value>(line) {
            Ok(message) => self.handle_message(message).await,
            Err(err) => {
                debug!(session_id = %self.id, error = %err, "unparsable message");
                self.outbound.send(json_rpc_error(None, PARSE_ERROR, "Parse error"));
            }
        }
    }

    /// Resolves once nothing drains the outbound channel any more.
    pub async fn outbound_closed(&self) {
        self.outbound.sender.closed().await;
    }

    /// Processes inbound messages until the sending side goes away, then closes
    /// the session.
    pub async fn run(self, mut inbound: mpsc::Receiver<Value>) {
        while let Some(message) = inbound.recv().await {
            self.handle_message(message).await;
        }
        self.close();
    }

    pub fn close(&self) {
        self.tracer.teardown();
        info!(session_id = %self.id, stats = ?self.tracer.stats(), "session closed");
    }
}
