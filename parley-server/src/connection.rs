//! Connection Handler
//!
//! Drives one client connection from accept to teardown:
//!
//! 1. Create the session and spawn the writer task draining its outbox
//! 2. Send the private welcome, announce the entrance, join the registry
//! 3. Start the idle watchdog
//! 4. Read lines, broadcasting each and touching the watchdog
//! 5. On EOF, read error, or cancellation: stop the watchdog, leave,
//!    announce the departure, give the writer `drain_timeout` to flush,
//!    close the write half
//!
//! The connection's [`CancellationToken`] is the forced-close signal. The
//! watchdog cancels it on expiry and the writer cancels it on a write error,
//! so every way out goes through step 5 exactly once.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use parley_protocol::{LineCodec, Notice, SessionId};
use parley_utils::Result;

use crate::config::SessionConfig;
use crate::observability::Metrics;
use crate::registry::RegistryHandle;
use crate::session::Session;
use crate::watchdog::{IdleWatchdog, WatchdogState};

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client closed its side
    Eof,
    /// Reading failed (I/O error, oversized line, invalid UTF-8)
    ReadError,
    /// Idle watchdog expired
    IdleTimeout,
    /// Writing to the client failed
    WriteError,
    /// The registry loop is gone
    RegistryClosed,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Eof => "eof",
            DisconnectReason::ReadError => "read_error",
            DisconnectReason::IdleTimeout => "idle_timeout",
            DisconnectReason::WriteError => "write_error",
            DisconnectReason::RegistryClosed => "registry_closed",
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the read loop ended
enum ReadOutcome {
    Eof,
    ReadError,
    Cancelled,
}

/// Serve one client until it departs
pub async fn handle_client<R, W>(
    reader: R,
    writer: W,
    remote_addr: String,
    registry: RegistryHandle,
    config: SessionConfig,
) -> DisconnectReason
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (session, outbox_rx) = Session::new(remote_addr, config.outbox_capacity);
    let span = info_span!(
        "session",
        session_id = %session.id(),
        remote_addr = %session.remote_addr()
    );

    run_session(session, outbox_rx, reader, writer, registry, config)
        .instrument(span)
        .await
}

async fn run_session<R, W>(
    session: Session,
    outbox_rx: mpsc::Receiver<String>,
    reader: R,
    writer: W,
    registry: RegistryHandle,
    config: SessionConfig,
) -> DisconnectReason
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let id = session.id();
    let cancel = CancellationToken::new();

    let sink = FramedWrite::new(writer, LineCodec::new());
    let writer_task = tokio::spawn(
        write_loop(id, sink, outbox_rx, cancel.clone()).in_current_span(),
    );

    info!("Session connected");

    // Private welcome; the outbox is fresh so this never waits
    if session.deliver(Notice::Welcome { id }).await.is_err() {
        debug!("Writer stopped before welcome");
    }

    let entered = enter(&session, &registry).await;
    let reason = match entered {
        Ok(()) => match registry.join(session).await {
            Ok(()) => serve(id, reader, &registry, &config, &cancel).await,
            Err(_) => DisconnectReason::RegistryClosed,
        },
        Err(_) => {
            // Never joined, so nothing else holds the outbox open
            drop(session);
            DisconnectReason::RegistryClosed
        }
    };

    // Leave closes the outbox; the writer drains what is queued and stops.
    // After an idle or write-error close the token is already cancelled and
    // queued lines are dropped.
    depart(id, &registry).await;

    // A peer that stopped reading would hold the drain open forever
    let drain = config.drain_timeout();
    let mut writer_task = writer_task;
    let joined = match tokio::time::timeout(drain, &mut writer_task).await {
        Ok(joined) => joined,
        Err(_) => {
            warn!(timeout = ?drain, "Outbox not drained in time, closing connection");
            cancel.cancel();
            writer_task.await
        }
    };

    match joined {
        Ok(mut sink) => {
            // Errors here only mean the peer is already gone
            let _ = tokio::time::timeout(drain, sink.get_mut().shutdown()).await;
        }
        Err(e) => warn!(error = %e, "Writer task failed"),
    }

    Metrics::global().record_disconnect(reason.as_str());
    info!(reason = %reason, "Session disconnected");
    reason
}

async fn enter(session: &Session, registry: &RegistryHandle) -> Result<()> {
    let id = session.id();
    registry.broadcast(id, Notice::Entered { id }).await
}

/// Read loop with the idle watchdog running alongside
async fn serve<R>(
    id: SessionId,
    reader: R,
    registry: &RegistryHandle,
    config: &SessionConfig,
    cancel: &CancellationToken,
) -> DisconnectReason
where
    R: AsyncRead + Unpin,
{
    let watchdog = IdleWatchdog::start(id, config.idle_timeout(), cancel.clone());
    let mut lines = FramedRead::new(reader, LineCodec::with_max_length(config.max_line_length));

    let outcome = read_loop(id, &mut lines, registry, &watchdog, cancel).await;

    // The timer never outlives the read loop
    let watchdog_state = watchdog.stop().await;

    match outcome {
        Ok(ReadOutcome::Eof) => DisconnectReason::Eof,
        Ok(ReadOutcome::ReadError) => DisconnectReason::ReadError,
        Ok(ReadOutcome::Cancelled) if watchdog_state == WatchdogState::Expired => {
            DisconnectReason::IdleTimeout
        }
        Ok(ReadOutcome::Cancelled) => DisconnectReason::WriteError,
        Err(_) => DisconnectReason::RegistryClosed,
    }
}

async fn read_loop<R>(
    id: SessionId,
    lines: &mut FramedRead<R, LineCodec>,
    registry: &RegistryHandle,
    watchdog: &IdleWatchdog,
    cancel: &CancellationToken,
) -> Result<ReadOutcome>
where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(ReadOutcome::Cancelled),
            next = lines.next() => next,
        };

        match next {
            Some(Ok(content)) => {
                registry.broadcast(id, Notice::Chat { id, content }).await?;
                watchdog.touch();
            }
            Some(Err(e)) => {
                warn!(error = %e, "Read failed, ending session");
                return Ok(ReadOutcome::ReadError);
            }
            None => return Ok(ReadOutcome::Eof),
        }
    }
}

/// Deregister and announce; both are best-effort once the registry is gone
async fn depart(id: SessionId, registry: &RegistryHandle) {
    if registry.leave(id).await.is_err() {
        debug!("Registry closed before leave");
        return;
    }
    if registry.broadcast(id, Notice::Left { id }).await.is_err() {
        debug!("Registry closed before departure notice");
    }
}

/// Drain the outbox to the wire
///
/// Ends when the outbox closes (the registry processed Leave), when the
/// connection is cancelled, or on a write error, which cancels the
/// connection so the reader departs too. Returns the sink for shutdown.
async fn write_loop<W>(
    id: SessionId,
    mut sink: FramedWrite<W, LineCodec>,
    mut outbox: mpsc::Receiver<String>,
    cancel: CancellationToken,
) -> FramedWrite<W, LineCodec>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let line = tokio::select! {
            biased;
            line = outbox.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        // A write only loses to cancellation when the peer stopped reading
        let written = tokio::select! {
            biased;
            written = sink.send(line) => written,
            _ = cancel.cancelled() => break,
        };

        if let Err(e) = written {
            warn!(session_id = %id, error = %e, "Write failed, closing connection");
            Metrics::global().record_write_failure();
            cancel.cancel();
            break;
        }
    }

    debug!(session_id = %id, "Writer finished");
    sink
}
