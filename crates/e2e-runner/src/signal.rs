//! SIGINT/SIGTERM handoff to the orchestrator
//!
//! The listener task never tears anything down itself. The first signal
//! records its name and cancels a token that the orchestrator races against
//! the main sequence. A second signal cancels a separate force token so the
//! process can exit without waiting for teardown to finish.

use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cloneable handle to the signal state shared between the listener and the orchestrator
#[derive(Clone, Default)]
pub struct SignalTrap {
    token: CancellationToken,
    force: CancellationToken,
    signal: Arc<OnceLock<String>>,
}

impl SignalTrap {
    /// A trap with no listener attached. Use [`SignalTrap::trigger`] to fire it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install SIGINT and SIGTERM handlers and return the armed trap.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm() -> std::io::Result<(Self, JoinHandle<()>)> {
        let trap = Self::new();
        let listener = trap.clone();

        #[cfg(unix)]
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        let handle = tokio::spawn(async move {
            loop {
                #[cfg(unix)]
                let name = tokio::select! {
                    result = tokio::signal::ctrl_c() => match result {
                        Ok(()) => "SIGINT",
                        Err(e) => {
                            warn!(error = %e, "Failed to listen for SIGINT");
                            break;
                        }
                    },
                    received = terminate.recv() => match received {
                        Some(()) => "SIGTERM",
                        None => break,
                    },
                };

                #[cfg(not(unix))]
                let name = match tokio::signal::ctrl_c().await {
                    Ok(()) => "SIGINT",
                    Err(e) => {
                        warn!(error = %e, "Failed to listen for SIGINT");
                        break;
                    }
                };

                listener.trigger(name);
            }
        });

        debug!("Signal handlers installed");
        Ok((trap, handle))
    }

    /// Record `signal` and request teardown.
    ///
    /// Returns `false` if the trap had already fired, in which case the
    /// signal requests an immediate exit instead.
    pub fn trigger(&self, signal: impl Into<String>) -> bool {
        let signal = signal.into();
        if self.signal.set(signal.clone()).is_ok() {
            warn!(signal = %signal, "Received signal, running teardown");
            self.token.cancel();
            true
        } else {
            warn!(signal = %signal, "Second signal received, exiting without waiting for teardown");
            self.force.cancel();
            false
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// True once a second signal arrived
    pub fn is_forced(&self) -> bool {
        self.force.is_cancelled()
    }

    /// Name of the first signal received
    pub fn signal(&self) -> Option<&str> {
        self.signal.get().map(String::as_str)
    }

    /// Resolves with the signal name once the trap fires
    pub async fn triggered(&self) -> String {
        self.token.cancelled().await;
        self.signal().unwrap_or_default().to_string()
    }

    /// Resolves once a second signal arrives
    pub async fn forced(&self) {
        self.force.cancelled().await;
    }
}

impl std::fmt::Debug for SignalTrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalTrap")
            .field("signal", &self.signal())
            .field("forced", &self.is_forced())
            .finish()
    }
}
