//! Tracing shim for one protocol session
//!
//! Observes every message crossing the session in either direction without
//! altering it. A request opens a span keyed by the direction it travelled and its
//! id; the matching response closes it. Notifications get a span of their own that
//! is closed immediately.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use serde_json::Value;
use tracing::{debug, field::Empty, info_span, warn, Span};

use crate::mcp::rpc::value_to_request_id;
use crate::mcp::server::redact_audit_params;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    fn reverse(self) -> Self {
        match self {
            Self::Inbound => Self::Outbound,
            Self::Outbound => Self::Inbound,
        }
    }
}

/// Counters kept alongside the spans, independent of any installed subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceStats {
    pub requests_opened: usize,
    pub requests_closed: usize,
    pub notifications: usize,
    pub unmatched_responses: usize,
    pub aborted: usize,
}

#[derive(Default)]
struct ActiveSpans {
    spans: HashMap<(Direction, String), Span>,
    stats: TraceStats,
}

pub struct MessageTracer {
    role: &'static str,
    session_id: String,
    active: Mutex<ActiveSpans>,
}

enum Kind<'a> {
    Request { id: String, method: &'a str },
    Notification { method: &'a str },
    Response { id: String, error: Option<&'a Value> },
}

impl MessageTracer {
    pub fn new(role: &'static str, session_id: &str) -> Self {
        Self {
            role,
            session_id: session_id.to_string(),
            active: Mutex::new(ActiveSpans::default()),
        }
    }

    pub fn observe_inbound(&self, message: &Value) {
        self.observe(Direction::Inbound, message);
    }

    pub fn observe_outbound(&self, message: &Value) {
        self.observe(Direction::Outbound, message);
    }

    pub fn observe(&self, direction: Direction, message: &Value) {
        if let Value::Array(batch) = message {
            for item in batch {
                self.observe(direction, item);
            }
            return;
        }

        let Some(kind) = classify(message) else {
            debug!(direction = direction.as_str(), "untraceable message");
            return;
        };
        let Some(mut active) = self.lock() else {
            return;
        };

        match kind {
            Kind::Request { id, method } => {
                let span = info_span!(
                    "mcp.request",
                    otel.name = %format!("{} {}", self.role, method),
                    otel.status_code = Empty,
                    rpc.method = %method,
                    jsonrpc.request.id = %id,
                    direction = direction.as_str(),
                    session.id = %self.session_id,
                    params = %redact_audit_params(message.get("params")),
                    error.message = Empty,
                );
                active.stats.requests_opened += 1;
                if active.spans.insert((direction, id.clone()), span).is_some() {
                    warn!(id = %id, "request id reused while still in flight");
                    active.stats.requests_closed += 1;
                }
            }
            Kind::Response { id, error } => {
                match active.spans.remove(&(direction.reverse(), id.clone())) {
                    Some(span) => {
                        match error {
                            Some(error) => {
                                span.record("otel.status_code", "ERROR");
                                span.record("error.message", error_message(error).as_str());
                            }
                            None => {
                                span.record("otel.status_code", "OK");
                            }
                        }
                        active.stats.requests_closed += 1;
                    }
                    None => {
                        debug!(
                            id = %id,
                            direction = direction.as_str(),
                            "response without an open request span"
                        );
                        active.stats.unmatched_responses += 1;
                    }
                }
            }
            Kind::Notification { method } => {
                let span = info_span!(
                    "mcp.notification",
                    otel.name = %format!("{} {}", self.role, method),
                    rpc.method = %method,
                    direction = direction.as_str(),
                    session.id = %self.session_id,
                );
                span.in_scope(|| debug!(method = %method, "notification"));
                active.stats.notifications += 1;
            }
        }
    }

    /// Closes every span still open, marking it aborted. Called when the
    /// connection goes away.
    pub fn teardown(&self) {
        let Some(mut active) = self.lock() else {
            return;
        };

        let aborted: Vec<_> = active.spans.drain().collect();
        for ((_, id), span) in &aborted {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", "aborted: connection closed");
            debug!(id = %id, "request span aborted");
        }
        active.stats.aborted += aborted.len();
    }

    pub fn stats(&self) -> TraceStats {
        self.lock().map(|active| active.stats).unwrap_or_default()
    }

    pub fn open_spans(&self) -> usize {
        self.lock().map(|active| active.spans.len()).unwrap_or_default()
    }

    fn lock(&self) -> Option<MutexGuard<'_, ActiveSpans>> {
        match self.active.lock() {
            Ok(active) => Some(active),
            Err(_) => {
                warn!(session_id = %self.session_id, "span map poisoned, message not traced");
                None
            }
        }
    }
}

impl Drop for MessageTracer {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn classify(message: &Value) -> Option<Kind<'_>> {
    let object = message.as_object()?;
    let id = match object.get("id") {
        None | Some(Value::Null) => None,
        Some(id) if value_to_request_id(id).is_some() => Some(id_key(id)),
        Some(_) => return None,
    };

    match (object.get("method").and_then(Value::as_str), id) {
        (Some(method), Some(id)) => Some(Kind::Request { id, method }),
        (Some(method), None) => Some(Kind::Notification { method }),
        (None, Some(id)) if object.contains_key("result") || object.contains_key("error") => {
            Some(Kind::Response {
                id,
                error: object.get("error"),
            })
        }
        _ => None,
    }
}

fn id_key(id: &Value) -> String {
    id.to_string()
}

fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}
