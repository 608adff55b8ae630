use crate::{ImapSmtpBackend, MailError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task;

/// RFC 2177: an IDLE session is re-issued at most every 29 minutes.
pub const IDLE_RENEWAL: Duration = Duration::from_secs(29 * 60);
/// Fixed delay before reconnecting after an I/O failure.
pub const IDLE_RETRY_DELAY: Duration = Duration::from_secs(30);

const IDLE_FOLDER: &str = "INBOX";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMailEvent {
    pub account_id: String,
    pub folder: String,
}

/// Renewal timing for the IDLE loop, split out so the schedule can be checked
/// against an arbitrary clock.
#[derive(Debug, Clone, Copy)]
pub struct IdleSchedule {
    renewal: Duration,
}

impl IdleSchedule {
    pub fn new() -> Self {
        Self {
            renewal: IDLE_RENEWAL,
        }
    }

    pub fn with_renewal(renewal: Duration) -> Self {
        Self { renewal }
    }

    /// Budget handed to each IDLE wait; the session exits by this deadline.
    pub fn wait_budget(&self) -> Duration {
        self.renewal
    }

    /// Whether, absent a push, the session entered at `entered_at` must be
    /// renewed by `now`. Before this point re-entering is not allowed.
    pub fn renewal_due(&self, entered_at: Instant, now: Instant) -> bool {
        now.duration_since(entered_at) >= self.renewal
    }
}

impl Default for IdleSchedule {
    fn default() -> Self {
        Self::new()
    }
}

type BackendFactory = Arc<dyn Fn() -> Result<ImapSmtpBackend, MailError> + Send + Sync>;
type NewMailNotify = Arc<dyn Fn(NewMailEvent) + Send + Sync>;

/// One long-lived IDLE task per connected account. The factory is re-invoked
/// on every (re)connect so each session starts from fresh credentials.
pub struct IdleManager {
    shutdown_senders: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl IdleManager {
    pub fn new() -> Self {
        Self {
            shutdown_senders: Mutex::new(HashMap::new()),
        }
    }

    pub async fn start(&self, account_id: String, factory: BackendFactory, notify: NewMailNotify) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        {
            let mut senders = self.shutdown_senders.lock().await;
            if let Some(old) = senders.remove(&account_id) {
                let _ = old.send(true);
            }
            senders.insert(account_id.clone(), shutdown_tx);
        }

        tokio::spawn(idle_loop(account_id, factory, notify, shutdown_rx));
    }

    /// The loop observes the signal within one IDLE cycle.
    pub async fn stop(&self, account_id: &str) {
        let mut senders = self.shutdown_senders.lock().await;
        if let Some(tx) = senders.remove(account_id) {
            let _ = tx.send(true);
        }
    }

    pub async fn stop_all(&self) {
        let mut senders = self.shutdown_senders.lock().await;
        for (_, tx) in senders.drain() {
            let _ = tx.send(true);
        }
    }
}

impl Default for IdleManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn idle_loop(
    account_id: String,
    factory: BackendFactory,
    notify: NewMailNotify,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let schedule = IdleSchedule::new();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let backend = match factory() {
            Ok(backend) => backend,
            Err(err) => {
                tracing::warn!(account_id, error = %err, "idle credentials unavailable, retrying");
                if sleep_or_shutdown(&mut shutdown_rx, IDLE_RETRY_DELAY).await {
                    break;
                }
                continue;
            }
        };

        let budget = schedule.wait_budget();
        let wait = task::spawn_blocking(move || backend.idle_wait(IDLE_FOLDER, budget)).await;

        match wait {
            Ok(Ok(true)) => {
                tracing::debug!(account_id, "idle reported new mail");
                notify(NewMailEvent {
                    account_id: account_id.clone(),
                    folder: IDLE_FOLDER.to_string(),
                });
            }
            Ok(Ok(false)) => {
                // Renewal timeout; loop re-enters IDLE immediately.
            }
            Ok(Err(err)) => {
                tracing::warn!(account_id, error = %err, "idle error, reconnecting");
                if sleep_or_shutdown(&mut shutdown_rx, IDLE_RETRY_DELAY).await {
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(account_id, error = %err, "idle task failed, reconnecting");
                if sleep_or_shutdown(&mut shutdown_rx, IDLE_RETRY_DELAY).await {
                    break;
                }
            }
        }
    }

    tracing::debug!(account_id, "idle loop exited");
}

/// Returns true when shutdown was requested during the sleep.
async fn sleep_or_shutdown(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        result = shutdown_rx.changed() => result.is_ok() && *shutdown_rx.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renewal_happens_by_twenty_nine_minutes() {
        let schedule = IdleSchedule::new();
        let entered = Instant::now();

        // The wait budget bounds the session: it exits at t <= 29 min.
        assert_eq!(schedule.wait_budget(), Duration::from_secs(29 * 60));
        assert!(schedule.renewal_due(entered, entered + Duration::from_secs(29 * 60)));
    }

    #[test]
    fn no_renewal_inside_the_window_without_a_push() {
        let schedule = IdleSchedule::new();
        let entered = Instant::now();

        for minutes in [1u64, 10, 28] {
            assert!(!schedule.renewal_due(entered, entered + Duration::from_secs(minutes * 60)));
        }
    }

    #[test]
    fn mocked_clock_renewal_sequence() {
        // A shortened schedule stands in for the 29-minute one.
        let schedule = IdleSchedule::with_renewal(Duration::from_secs(60));
        let t0 = Instant::now();

        let mut renewals = 0;
        let mut entered = t0;
        for tick in 1..=180u64 {
            let now = t0 + Duration::from_secs(tick);
            if schedule.renewal_due(entered, now) {
                renewals += 1;
                entered = now;
            }
        }

        // Three minutes of mocked clock: exactly one renewal per full window.
        assert_eq!(renewals, 3);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let manager = IdleManager::new();
        manager.stop("missing").await;
        manager.stop_all().await;
    }
}
