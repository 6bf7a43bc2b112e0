//! Connection readiness gate
//!
//! Single-writer, multi-reader synchronization for lazy connects: the
//! first task through transitions Down -> Connecting and does the
//! work; everyone else waits on the broadcast until Ready. Disconnect
//! resets the machine so a later connect starts a fresh cycle.

use tokio::sync::watch;

use crate::error::{Error, Result};

/// Connection phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Down,
    Connecting,
    Ready,
}

/// Broadcast state machine over a watch channel
pub(crate) struct ReadinessGate {
    tx: watch::Sender<Phase>,
}

impl ReadinessGate {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(Phase::Down);
        ReadinessGate { tx }
    }

    /// Atomically claim the connect cycle; `true` means the caller is
    /// now the single writer and must connect (then signal)
    pub(crate) fn begin_connect(&self) -> bool {
        let mut claimed = false;
        self.tx.send_if_modified(|phase| {
            if *phase == Phase::Down {
                *phase = Phase::Connecting;
                claimed = true;
                true
            } else {
                false
            }
        });
        claimed
    }

    /// Signal a successful connect to all waiters
    pub(crate) fn signal_ready(&self) {
        self.tx.send_replace(Phase::Ready);
    }

    /// Reset after a failed connect or an explicit disconnect
    pub(crate) fn reset(&self) {
        self.tx.send_replace(Phase::Down);
    }

    pub(crate) fn phase(&self) -> Phase {
        *self.tx.borrow()
    }

    /// Wait until the in-flight connect cycle settles
    ///
    /// Returns `Ok` on Ready. A transition back to Down means the
    /// owner's attempt failed; that failure is fatal for waiters too.
    pub(crate) async fn await_ready(&self) -> Result<()> {
        let mut rx = self.tx.subscribe();
        loop {
            let phase = *rx.borrow_and_update();
            match phase {
                Phase::Ready => return Ok(()),
                Phase::Down => {
                    return Err(Error::Connection(anyhow::anyhow!(
                        "connection attempt by the owning connector failed"
                    )))
                }
                Phase::Connecting => {
                    if rx.changed().await.is_err() {
                        return Err(Error::Connection(anyhow::anyhow!(
                            "connection owner dropped while connecting"
                        )));
                    }
                }
            }
        }
    }
}
