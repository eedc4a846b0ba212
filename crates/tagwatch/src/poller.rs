//! Availability poller.
//!
//! Probes a backend until it reports ready, backing off exponentially (capped)
//! between attempts. The state machine is [`PollState::transition`]; the async
//! driver spawned by [`start_polling`] only executes the returned [`Effect`]s.
//!
//! Exactly one of [`PollObserver::on_ready`] / [`PollObserver::on_fatal`] fires
//! per poller, unless it is cancelled first, in which case neither does.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PollConfig;
use crate::probe::{Probe, ProbeOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Polling,
    Ready,
    FatalError,
}

impl PollStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::FatalError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Polling => "polling",
            Self::Ready => "ready",
            Self::FatalError => "fatal_error",
        }
    }
}

/// What the driver has to do after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Probe again after this delay.
    Schedule(Duration),
    NotifyReady,
    NotifyFatal(String),
    /// Outcome arrived after the poller was already terminal.
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollState {
    current_delay: Duration,
    max_delay: Duration,
    status: PollStatus,
}

impl PollState {
    pub fn new(config: PollConfig) -> Self {
        Self {
            current_delay: config.initial_delay(),
            max_delay: config.max_delay(),
            status: PollStatus::Polling,
        }
    }

    /// Delay the next retry will be scheduled with.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn status(&self) -> PollStatus {
        self.status
    }

    /// Apply one probe outcome.
    ///
    /// A retry is scheduled with the delay as it was *before* doubling, so the
    /// first retry waits exactly the initial delay.
    pub fn transition(self, outcome: ProbeOutcome) -> (PollState, Effect) {
        if self.status.is_terminal() {
            return (self, Effect::Discard);
        }

        match outcome {
            ProbeOutcome::Available => (
                PollState {
                    status: PollStatus::Ready,
                    ..self
                },
                Effect::NotifyReady,
            ),
            ProbeOutcome::NotAvailable | ProbeOutcome::TransientFailure => {
                let delay = self.current_delay;
                let next = PollState {
                    current_delay: self.current_delay.saturating_mul(2).min(self.max_delay),
                    ..self
                };
                (next, Effect::Schedule(delay))
            }
            ProbeOutcome::FatalFailure(detail) => (
                PollState {
                    status: PollStatus::FatalError,
                    ..self
                },
                Effect::NotifyFatal(detail),
            ),
        }
    }
}

/// Receives the poller's terminal outcome. At most one method is called, once.
pub trait PollObserver: Send + Sync {
    fn on_ready(&self);
    fn on_fatal(&self, detail: &str);
}

/// Set once by whichever comes first: cancellation or the terminal callback.
#[derive(Debug, Clone, Default)]
struct Settled(Arc<AtomicBool>);

impl Settled {
    /// Returns true for the first caller only.
    fn claim(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

/// Handle to a running poller.
///
/// Dropping the handle detaches the poller; it keeps running until terminal.
pub struct PollHandle {
    cancel_token: CancellationToken,
    settled: Settled,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Stop probing. Pending timers never fire and an in-flight probe's
    /// outcome is ignored. Once this returns no callback will start, on any
    /// runtime flavor. Idempotent, and a no-op once the poller is terminal.
    pub fn cancel(&self) {
        self.settled.claim();
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Wait for the poller task to exit (terminal or cancelled).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
            tracing::warn!(error = %e, "Poller task aborted");
        }
    }
}

/// Start polling `probe` in a background task.
///
/// The first probe is issued as soon as the task runs; the caller is never
/// blocked. Must be called from within a tokio runtime.
pub fn start_polling(
    config: PollConfig,
    probe: Arc<dyn Probe>,
    observer: Arc<dyn PollObserver>,
) -> PollHandle {
    let cancel_token = CancellationToken::new();
    let settled = Settled::default();
    let task = tokio::spawn(run(
        PollState::new(config),
        probe,
        observer,
        cancel_token.clone(),
        settled.clone(),
    ));
    PollHandle {
        cancel_token,
        settled,
        task,
    }
}

async fn run(
    mut state: PollState,
    probe: Arc<dyn Probe>,
    observer: Arc<dyn PollObserver>,
    cancel_token: CancellationToken,
    settled: Settled,
) {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                tracing::debug!(attempt, "Polling cancelled with probe in flight");
                return;
            }
            outcome = probe.check_availability() => outcome,
        };

        if cancel_token.is_cancelled() {
            tracing::trace!(?outcome, "Discarding probe outcome after cancellation");
            return;
        }

        let (next, effect) = state.transition(outcome);
        state = next;

        match effect {
            Effect::Schedule(delay) => {
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Service not ready, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => {
                        tracing::debug!(attempt, "Polling cancelled while waiting to retry");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Effect::NotifyReady => {
                if !settled.claim() {
                    tracing::debug!("Cancelled before ready could be reported");
                    return;
                }
                tracing::info!(attempts = attempt, "Service is available");
                observer.on_ready();
                return;
            }
            Effect::NotifyFatal(detail) => {
                if !settled.claim() {
                    tracing::debug!(error = %detail, "Cancelled before failure could be reported");
                    return;
                }
                tracing::error!(attempts = attempt, error = %detail, "Service check failed, giving up");
                observer.on_fatal(&detail);
                return;
            }
            Effect::Discard => {
                tracing::trace!(status = state.status().as_str(), "Discarding probe outcome");
                return;
            }
        }
    }
}
