//! Stream binding: one line-framed session over a duplex byte stream
//!
//! Used with process stdio for embedding. EOF on the input ends the session and is
//! the normal way out. A read or write failure ends the session the same way.

use std::{io, sync::Arc};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::mcp::{session::Session, telemetry::TraceStats};

/// Serves a single session until `reader` reaches EOF or either side of the
/// stream fails. Returns the tracing counters of the session.
pub async fn serve_stream<R, W>(dispatcher: Arc<Dispatcher>, reader: R, writer: W) -> TraceStats
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (session, mut outbound) = Session::new(dispatcher);
    info!(session_id = %session.id(), "stream session started");

    let read = async move {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = tokio::select! {
                read = reader.read_until(b'\n', &mut line) => read,
                () = session.outbound_closed() => {
                    warn!(session_id = %session.id(), "stream writer gone, ending session");
                    break;
                }
            };
            match read {
                Ok(0) => break,
                Ok(_) => session.handle_line(&line).await,
                Err(err) => {
                    warn!(session_id = %session.id(), error = %err, "stream read failed");
                    break;
                }
            }
        }
        session.close();
        session.tracer().stats()
    };

    let write = async move {
        let mut writer = writer;
        while let Some(message) = outbound.recv().await {
            if let Err(err) = write_line(&mut writer, &message).await {
                warn!(error = %err, "stream write failed, later messages were dropped");
                break;
            }
        }
    };

    let (stats, ()) = tokio::join!(read, write);
    stats
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) -> io::Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

/// Serves the process stdio until EOF or a shutdown signal.
pub async fn serve_stdio(dispatcher: Arc<Dispatcher>) {
    tokio::select! {
        stats = serve_stream(dispatcher, tokio::io::stdin(), tokio::io::stdout()) => {
            info!(stats = ?stats, "stdin closed, stream session finished");
        }
        () = crate::shutdown_signal() => {
            info!("shutdown signal received, stopping stream session");
        }
    }
}
