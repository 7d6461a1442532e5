//! Idle Watchdog
//!
//! One timer task per session. Every inbound line resets it; if the window
//! passes without activity the watchdog cancels the connection token, which
//! makes the connection handler run its normal departure path.
//!
//! ```text
//!            touch()
//!          ┌────────┐
//!          ▼        │
//!       ┌────────────┐  window elapsed  ┌─────────┐
//!  ───► │   Active   │ ───────────────► │ Expired │
//!       └────────────┘                  └─────────┘
//!             │ stop()
//!             ▼
//!       ┌────────────┐
//!       │  Stopped   │
//!       └────────────┘
//! ```

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_protocol::SessionId;

use crate::observability::Metrics;

/// Lifecycle state of a watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    /// Timer running
    Active,
    /// Window elapsed; the connection was cancelled
    Expired,
    /// Stopped by its session before expiring
    Stopped,
}

/// Handle to a running idle timer
pub struct IdleWatchdog {
    session_id: SessionId,
    activity_tx: mpsc::Sender<()>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<WatchdogState>,
}

impl IdleWatchdog {
    /// Start the timer for a session
    ///
    /// `expire` is cancelled when the session stays silent for `timeout`.
    pub fn start(session_id: SessionId, timeout: Duration, expire: CancellationToken) -> Self {
        // One pending signal is enough to guarantee a reset
        let (activity_tx, activity_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = tokio::spawn(idle_timer_task(
            session_id,
            timeout,
            activity_rx,
            stop_rx,
            expire,
        ));

        debug!(
            session_id = %session_id,
            timeout_secs = timeout.as_secs(),
            "Idle watchdog started"
        );

        Self {
            session_id,
            activity_tx,
            stop_tx: Some(stop_tx),
            task,
        }
    }

    /// Signal activity; never blocks the caller
    pub fn touch(&self) {
        // Full means a reset is already pending; Closed means the timer is done
        let _ = self.activity_tx.try_send(());
    }

    /// Current state
    pub fn state(&self) -> WatchdogState {
        if self.task.is_finished() {
            // Stop is only ever requested through `stop`, which consumes self
            WatchdogState::Expired
        } else {
            WatchdogState::Active
        }
    }

    /// Stop the timer and wait for its task to end
    ///
    /// Returns the terminal state: `Expired` if the window had already
    /// elapsed, `Stopped` otherwise.
    pub async fn stop(mut self) -> WatchdogState {
        if let Some(tx) = self.stop_tx.take() {
            // Receiver is gone if the timer already expired
            let _ = tx.send(());
        }

        match (&mut self.task).await {
            Ok(state) => state,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Idle watchdog task failed");
                WatchdogState::Stopped
            }
        }
    }
}

impl Drop for IdleWatchdog {
    fn drop(&mut self) {
        // A dropped watchdog must not outlive its session
        if self.stop_tx.is_some() {
            self.task.abort();
        }
    }
}

impl std::fmt::Debug for IdleWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleWatchdog")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish()
    }
}

async fn idle_timer_task(
    session_id: SessionId,
    timeout: Duration,
    mut activity_rx: mpsc::Receiver<()>,
    mut stop_rx: oneshot::Receiver<()>,
    expire: CancellationToken,
) -> WatchdogState {
    let deadline = time::sleep_until(deadline_after(timeout));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                debug!(session_id = %session_id, "Idle watchdog stopped");
                return WatchdogState::Stopped;
            }

            signal = activity_rx.recv() => match signal {
                Some(()) => deadline.as_mut().reset(deadline_after(timeout)),
                None => {
                    debug!(session_id = %session_id, "Idle watchdog handle dropped");
                    return WatchdogState::Stopped;
                }
            },

            _ = &mut deadline => {
                info!(
                    session_id = %session_id,
                    timeout_secs = timeout.as_secs(),
                    "Session idle too long, disconnecting"
                );
                Metrics::global().record_idle_eviction();
                expire.cancel();
                return WatchdogState::Expired;
            }
        }
    }
}

/// `timeout` from now, clamped for windows beyond what `Instant` can hold
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30))
}
