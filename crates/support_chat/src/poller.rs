//! Fixed-interval status poller
//!
//! One cooperative task per bound session. Ticks run sequentially and share
//! the in-flight permit with send-triggered refreshes, so they never overlap.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::SessionEvent;
use crate::sync::{Shared, Trigger};

pub struct StatusPoller {
    shared: Arc<Shared>,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl StatusPoller {
    /// Spawn the poll loop. The first tick fires one interval from now.
    pub(crate) fn start(shared: Arc<Shared>) -> Self {
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(run(Arc::clone(&shared), cancel_token.clone()));
        Self {
            shared,
            cancel_token,
            handle,
        }
    }

    /// Stop polling. Idempotent.
    ///
    /// Returns without waiting for the task. Responses to calls already in
    /// flight are discarded because the epoch moves before cancellation.
    pub fn stop(&self) {
        if self.cancel_token.is_cancelled() {
            return;
        }
        self.shared.invalidate();
        self.cancel_token.cancel();
        self.handle.abort();
        debug!("status poller stopped");
    }

    /// False once stopped, or once the loop ended on its own (auth loss,
    /// server-side closure, nothing bound).
    pub fn is_running(&self) -> bool {
        !self.cancel_token.is_cancelled() && !self.handle.is_finished()
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(shared: Arc<Shared>, cancel_token: CancellationToken) {
    let period = shared.config.poll_interval();
    let threshold = shared.config.failure_warning_threshold;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(interval_ms = period.as_millis() as u64, "status poller started");
    let mut consecutive_failures: u32 = 0;
    let mut degraded = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            result = shared.sync(Trigger::Tick) => result,
        };

        match result {
            Ok(report) if report.coalesced => {
                // Another refresh owns the permit; nothing was fetched.
                debug!("tick coalesced into in-flight refresh");
            }
            Ok(report) => {
                if consecutive_failures > 0 {
                    debug!(consecutive_failures, "poll recovered");
                    consecutive_failures = 0;
                }
                if degraded {
                    degraded = false;
                    shared.events.emit(SessionEvent::PollRecovered);
                }
                if report.idle || report.closed {
                    info!("no open session left to poll");
                    break;
                }
            }
            Err(e) if e.is_authentication() => {
                error!("polling halted, re-authentication required: {}", e);
                shared.events.emit(SessionEvent::AuthenticationRequired {
                    reason: e.to_string(),
                });
                break;
            }
            Err(e) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                warn!(consecutive_failures, "poll tick failed: {}", e);
                if consecutive_failures >= threshold && !degraded {
                    degraded = true;
                    shared.events.emit(SessionEvent::PollDegraded {
                        consecutive_failures,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    debug!("status poller loop exited");
}
