//! Live SSE sessions, keyed by session id

use std::{
    collections::HashMap,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};

use axum::response::sse::Event;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::info;

/// Inbound queues of every open SSE session.
#[derive(Default)]
pub struct SessionMap {
    inner: Mutex<HashMap<String, mpsc::Sender<Value>>>,
}

impl SessionMap {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, mpsc::Sender<Value>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, session_id: &str, inbound: mpsc::Sender<Value>) {
        self.lock().insert(session_id.to_string(), inbound);
    }

    pub fn get(&self, session_id: &str) -> Option<mpsc::Sender<Value>> {
        self.lock().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.lock().remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unregisters a session when its SSE stream is dropped. Dropping the inbound
/// sender ends the session task.
struct SessionGuard {
    sessions: Arc<SessionMap>,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.sessions.remove(&self.session_id) {
            info!(session_id = %self.session_id, "sse client disconnected");
        }
    }
}

/// Event stream of one SSE session: the endpoint announcement followed by every
/// outbound protocol message.
pub struct SessionStream {
    endpoint: Option<Event>,
    outbound: UnboundedReceiverStream<Value>,
    _guard: SessionGuard,
}

impl SessionStream {
    pub fn new(
        sessions: Arc<SessionMap>,
        session_id: &str,
        outbound: mpsc::UnboundedReceiver<Value>,
    ) -> Self {
        Self {
            endpoint: Some(
                Event::default()
                    .event("endpoint")
                    .data(format!("/messages?session_id={session_id}")),
            ),
            outbound: UnboundedReceiverStream::new(outbound),
            _guard: SessionGuard {
                sessions,
                session_id: session_id.to_string(),
            },
        }
    }
}

impl Stream for SessionStream {
    type Item = Result<Event, std::convert::Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(endpoint) = self.endpoint.take() {
            return Poll::Ready(Some(Ok(endpoint)));
        }

        self.outbound.poll_next_unpin(cx).map(|message| {
            message.map(|message| Ok(Event::default().event("message").data(message.to_string())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropping_the_stream_unregisters_the_session() {
        let sessions = Arc::new(SessionMap::default());
        let (inbound, mut inbound_rx) = mpsc::channel(1);
        let (_outbound, outbound_rx) = mpsc::unbounded_channel();

        sessions.insert("s-1", inbound);
        let mut stream = SessionStream::new(Arc::clone(&sessions), "s-1", outbound_rx);
        assert!(stream.next().await.is_some());
        assert_eq!(sessions.len(), 1);

        drop(stream);

        assert!(sessions.is_empty());
        assert!(inbound_rx.recv().await.is_none());
    }
}
