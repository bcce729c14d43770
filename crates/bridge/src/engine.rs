//! Streaming protocol engine for `/mcp`.
//!
//! One task per connection: `open` registers (or resumes) the session, then `run` emits `ready`
//! and processes inbound NDJSON lines strictly in order, writing exactly one outbound message
//! per line before reading the next. The connection closes when the inbound side ends or
//! errors, the client stops reading, the session is removed or resumed elsewhere, the idle
//! timeout elapses, or the server shuts down.

use crate::error::{BridgeError, Result};
use crate::framing::{Frame, NdjsonCodec};
use crate::protocol::{CallParseError, OutboundMessage, parse_call};
use crate::session::{OutboundSender, SessionLease, SessionRegistry};
use crate::tools;
use bytes::Bytes;
use futures::{Stream, StreamExt as _};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use supabridge_rest_backend::DataBackend;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tracing::{Instrument as _, debug, info, info_span, warn};

/// Outbound messages buffered per connection before `run` waits on the client.
const OUTBOUND_BUFFER: usize = 16;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Close a session after this long without an inbound line. `None` = never.
    pub idle_timeout: Option<Duration>,
    pub max_line_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(300)),
            max_line_bytes: 1024 * 1024,
        }
    }
}

/// Why a connection left the `Active` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    InboundEnded,
    InboundError,
    ClientGone,
    Cancelled,
    IdleTimeout,
}

/// A registered connection that has not started running yet.
pub struct OpenConnection {
    pub lease: SessionLease,
    sender: OutboundSender,
}

#[derive(Clone)]
pub struct StreamEngine {
    registry: Arc<SessionRegistry>,
    backend: Arc<dyn DataBackend>,
    config: EngineConfig,
}

impl StreamEngine {
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        backend: Arc<dyn DataBackend>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            backend,
            config,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Handshake: allocate or resume a session and create its outbound channel.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownSession`] / [`BridgeError::SessionLimitReached`] from the registry.
    pub fn open(
        &self,
        requested_id: Option<&str>,
    ) -> Result<(OpenConnection, mpsc::Receiver<OutboundMessage>)> {
        let (sender, receiver) = mpsc::channel(OUTBOUND_BUFFER);
        let lease = self.registry.create(requested_id, sender.clone())?;
        Ok((OpenConnection { lease, sender }, receiver))
    }

    /// Drive one connection to completion and release its session.
    pub async fn run<S>(&self, conn: OpenConnection, inbound: S) -> CloseReason
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let OpenConnection { lease, sender } = conn;
        let span = info_span!("mcp_session", session_id = %lease.id);
        async move {
            let reason = self.serve(&lease, &sender, inbound).await;
            self.registry.release(&lease);
            let age_ms = (chrono::Utc::now() - lease.created_at).num_milliseconds();
            info!(?reason, age_ms, "session closed");
            reason
        }
        .instrument(span)
        .await
    }

    async fn serve<S>(&self, lease: &SessionLease, tx: &OutboundSender, inbound: S) -> CloseReason
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let ready = OutboundMessage::ready(&lease.id);
        if let Err(reason) = send_unless_cancelled(lease, tx, ready).await {
            return reason;
        }

        let reader = StreamReader::new(Box::pin(inbound));
        let mut frames = FramedRead::new(reader, NdjsonCodec::new(self.config.max_line_bytes));

        loop {
            let next = tokio::select! {
                biased;
                () = lease.cancel.cancelled() => return CloseReason::Cancelled,
                () = tx.closed() => return CloseReason::ClientGone,
                next = next_with_idle_timeout(&mut frames, self.config.idle_timeout) => next,
            };

            let frame = match next {
                Ok(Some(Ok(frame))) => frame,
                Ok(Some(Err(e))) => {
                    debug!(error = %e, "inbound read failed");
                    return CloseReason::InboundError;
                }
                Ok(None) => return CloseReason::InboundEnded,
                Err(_) => return CloseReason::IdleTimeout,
            };

            let reply = self.handle_frame(frame).await;

            // The session may have been torn down while the call was in flight.
            if lease.cancel.is_cancelled() {
                debug!("dropping reply for cancelled session");
                return CloseReason::Cancelled;
            }
            if let Err(reason) = send_unless_cancelled(lease, tx, reply).await {
                return reason;
            }
        }
    }

    async fn handle_frame(&self, frame: Frame) -> OutboundMessage {
        let line = match frame {
            Frame::Line(line) => line,
            Frame::Oversized => {
                warn!(
                    max_line_bytes = self.config.max_line_bytes,
                    "inbound line too long"
                );
                return OutboundMessage::stream_error(&BridgeError::LineTooLong);
            }
        };

        let call = match parse_call(&line) {
            Ok(call) => call,
            Err(CallParseError::InvalidJson) => {
                return OutboundMessage::stream_error(&BridgeError::InvalidJson);
            }
            Err(CallParseError::InvalidMessage { id }) => {
                return OutboundMessage::call_error(id, &BridgeError::InvalidMessage);
            }
        };

        match tools::dispatch(self.backend.as_ref(), &call.name, call.args).await {
            Ok(result) => OutboundMessage::Result {
                id: call.id,
                result,
            },
            Err(e) => {
                debug!(tool = %call.name, error = %e, "tool call failed");
                OutboundMessage::call_error(Some(call.id), &e)
            }
        }
    }
}

/// Wait for outbound capacity, giving up as soon as the session is cancelled.
async fn send_unless_cancelled(
    lease: &SessionLease,
    tx: &OutboundSender,
    msg: OutboundMessage,
) -> std::result::Result<(), CloseReason> {
    tokio::select! {
        biased;
        () = lease.cancel.cancelled() => Err(CloseReason::Cancelled),
        permit = tx.reserve() => match permit {
            Ok(permit) => {
                permit.send(msg);
                Ok(())
            }
            Err(_) => Err(CloseReason::ClientGone),
        },
    }
}

async fn next_with_idle_timeout<S>(
    frames: &mut S,
    idle: Option<Duration>,
) -> std::result::Result<Option<S::Item>, tokio::time::error::Elapsed>
where
    S: Stream + Unpin,
{
    match idle {
        Some(d) => tokio::time::timeout(d, frames.next()).await,
        None => Ok(frames.next().await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::FakeBackend;
    use serde_json::{Value, json};

    fn engine_with(backend: FakeBackend, config: EngineConfig) -> StreamEngine {
        StreamEngine::new(Arc::new(SessionRegistry::new(0)), Arc::new(backend), config)
    }

    fn engine() -> StreamEngine {
        let backend = FakeBackend {
            allowed_tables: ["x".to_string(), "broken".to_string()].into_iter().collect(),
            ..FakeBackend::default()
        };
        engine_with(backend, EngineConfig::default())
    }

    fn chunks(parts: &[&str]) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let owned: Vec<io::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect();
        futures::stream::iter(owned)
    }

    async fn collect(mut rx: mpsc::Receiver<OutboundMessage>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(msg) = rx.recv().await {
            out.push(serde_json::to_value(&msg).expect("serialize"));
        }
        out
    }

    async fn run_to_end(
        engine: &StreamEngine,
        parts: &[&str],
    ) -> (String, CloseReason, Vec<Value>) {
        let (conn, rx) = engine.open(None).expect("open");
        let id = conn.lease.id.clone();
        let reason = engine.run(conn, chunks(parts)).await;
        (id, reason, collect(rx).await)
    }

    #[tokio::test]
    async fn ready_first_then_one_reply_per_line_in_order() {
        let engine = engine();
        let (id, reason, out) = run_to_end(
            &engine,
            &[
                concat!(
                    r#"{"id":"1","name":"supabase_select","#,
                    r#""args":{"table":"x","select":"*"}}"#,
                    "\n"
                ),
                "not-json\n{\"id\":\"2\",\"na",
                "me\":\"nope\"}\n{\"name\":\"supabase_select\"}\n",
                "{\"id\":3,\"name\":\"supabase_select\",\"args\":{\"table\":\"secret\"}}\n",
                concat!(
                    r#"{"id":"4","name":"supabase_insert","#,
                    r#""args":{"table":"x","rows":[]}}"#,
                    "\n"
                ),
            ],
        )
        .await;

        assert_eq!(reason, CloseReason::InboundEnded);
        assert_eq!(
            out,
            vec![
                json!({"event": "ready", "sessionId": id}),
                json!({"id": "1", "result": [{"table": "x", "select": "*"}]}),
                json!({"event": "error", "message": "Invalid JSON"}),
                json!({"id": "2", "error": "Unknown tool"}),
                json!({"error": "Invalid message format"}),
                json!({"id": 3, "error": "Table not allowed"}),
                json!({"id": "4", "error": "Inserts not allowed"}),
            ]
        );
        assert!(engine.registry().is_empty(), "session released on close");
    }

    #[tokio::test]
    async fn upstream_failure_is_reported_in_band() {
        let engine = engine();
        let (_, _, out) = run_to_end(
            &engine,
            &["{\"id\":\"u\",\"name\":\"supabase_select\",\"args\":{\"table\":\"broken\"}}\n"],
        )
        .await;
        assert_eq!(
            out[1],
            json!({"id": "u", "error": "Upstream returned 500: {\"message\":\"boom\"}"})
        );
    }

    #[tokio::test]
    async fn oversized_line_reports_error_and_session_continues() {
        let backend = FakeBackend::default();
        let engine = engine_with(
            backend,
            EngineConfig {
                idle_timeout: None,
                max_line_bytes: 16,
            },
        );
        let long = format!("{}\n", "x".repeat(64));
        let (_, _, out) = run_to_end(
            &engine,
            &[long.as_str(), "{\"id\":1,\"name\":\"zzz\"}\n"],
        )
        .await;
        assert_eq!(out[1], json!({"event": "error", "message": "Line too long"}));
        assert_eq!(out[2], json!({"id": 1, "error": "Unknown tool"}));
    }

    #[tokio::test]
    async fn inbound_error_closes_and_releases() {
        let engine = engine();
        let (conn, rx) = engine.open(None).expect("open");
        let inbound = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"{}\n")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let reason = engine.run(conn, inbound).await;
        assert_eq!(reason, CloseReason::InboundError);
        let out = collect(rx).await;
        assert_eq!(out.len(), 2, "ready + reply to the line before the error");
        assert!(engine.registry().is_empty());
    }

    #[tokio::test]
    async fn removing_the_session_closes_the_connection() {
        let engine = engine();
        let (conn, mut rx) = engine.open(None).expect("open");
        let id = conn.lease.id.clone();
        let (_inbound_tx, inbound_rx) = mpsc::channel::<io::Result<Bytes>>(1);
        let inbound = tokio_stream::wrappers::ReceiverStream::new(inbound_rx);

        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run(conn, inbound).await })
        };

        let ready = rx.recv().await.expect("ready");
        assert_eq!(ready, OutboundMessage::ready(&id));

        assert!(engine.registry().remove(&id));
        assert!(!engine.registry().remove(&id));
        assert_eq!(task.await.expect("join"), CloseReason::Cancelled);
        assert!(rx.recv().await.is_none(), "stream ends after teardown");
    }

    #[tokio::test]
    async fn removal_unblocks_a_stalled_writer_without_further_writes() {
        let engine = engine();
        let (conn, rx) = engine.open(None).expect("open");
        let id = conn.lease.id.clone();
        let lines: String = (0..30)
            .map(|i| format!("{{\"id\":{i},\"name\":\"zzz\"}}\n"))
            .collect();
        let inbound = futures::stream::iter(vec![Ok(Bytes::from(lines))]);

        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run(conn, inbound).await })
        };

        // Nobody reads `rx`, so the engine stalls once the buffer is full.
        tokio::time::timeout(Duration::from_secs(5), async {
            while rx.len() < OUTBOUND_BUFFER {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("outbound buffer fills");

        assert!(engine.registry().remove(&id));
        let reason = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("task ends without the client reading")
            .expect("join");
        assert_eq!(reason, CloseReason::Cancelled);

        let out = collect(rx).await;
        assert_eq!(out.len(), OUTBOUND_BUFFER, "nothing written after teardown");
        assert_eq!(out[0], json!({"event": "ready", "sessionId": id}));
    }

    #[tokio::test]
    async fn dropped_receiver_is_client_gone() {
        let engine = engine();
        let (conn, rx) = engine.open(None).expect("open");
        drop(rx);
        let (_inbound_tx, inbound_rx) = mpsc::channel::<io::Result<Bytes>>(1);
        let inbound = tokio_stream::wrappers::ReceiverStream::new(inbound_rx);
        assert_eq!(engine.run(conn, inbound).await, CloseReason::ClientGone);
        assert!(engine.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_times_out() {
        let engine = engine_with(
            FakeBackend::default(),
            EngineConfig {
                idle_timeout: Some(Duration::from_secs(5)),
                max_line_bytes: 1024,
            },
        );
        let (conn, _rx) = engine.open(None).expect("open");
        let (_inbound_tx, inbound_rx) = mpsc::channel::<io::Result<Bytes>>(1);
        let inbound = tokio_stream::wrappers::ReceiverStream::new(inbound_rx);
        assert_eq!(engine.run(conn, inbound).await, CloseReason::IdleTimeout);
        assert!(engine.registry().is_empty());
    }

    #[tokio::test]
    async fn resume_hands_session_to_new_connection() {
        let engine = engine();
        let (first, mut first_rx) = engine.open(None).expect("open");
        let id = first.lease.id.clone();
        let (_keep_open, inbound_rx) = mpsc::channel::<io::Result<Bytes>>(1);
        let first_task = {
            let engine = engine.clone();
            let inbound = tokio_stream::wrappers::ReceiverStream::new(inbound_rx);
            tokio::spawn(async move { engine.run(first, inbound).await })
        };
        first_rx.recv().await.expect("ready");

        let (second, second_rx) = engine.open(Some(&id)).expect("resume");
        assert!(second.lease.resumed);
        assert_eq!(first_task.await.expect("join"), CloseReason::Cancelled);
        assert!(engine.registry().contains(&id), "old teardown keeps resumed session");

        let reason = engine
            .run(second, chunks(&["{\"id\":\"r\",\"name\":\"zzz\"}\n"]))
            .await;
        assert_eq!(reason, CloseReason::InboundEnded);
        let out = collect(second_rx).await;
        assert_eq!(out[0], json!({"event": "ready", "sessionId": id}));
        assert_eq!(out[1], json!({"id": "r", "error": "Unknown tool"}));
        assert!(engine.registry().is_empty());
    }
}
