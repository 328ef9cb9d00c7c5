//! Periodic unpaid-settlement reminders. One worker per process; a single
//! minute ticker drives every configured reminder, so individual reminders
//! never own timers of their own.

use std::cmp::min;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant};
use tracing::{error, info, warn};

use crate::error::GatewayError;
use crate::gateway::ChatGateway;
use crate::session::{SessionRepository, SessionService};

const TICK: Duration = Duration::from_secs(60);
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(12);
const MAX_ATTEMPTS: u32 = 2;
const TRANSIENT_BACKOFF_MINUTES: i64 = 2;
const SIGNATURE: &str = "※このメッセージは自動投稿です";

pub struct ReminderWorker {
    repo: Arc<SessionRepository>,
    sessions: Arc<SessionService>,
    gateway: Arc<dyn ChatGateway>,
}

/// Stops the worker and waits for the loop to wind down.
pub struct ReminderHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ReminderHandle {
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

impl ReminderWorker {
    pub fn new(
        repo: Arc<SessionRepository>,
        sessions: Arc<SessionService>,
        gateway: Arc<dyn ChatGateway>,
    ) -> Self {
        Self {
            repo,
            sessions,
            gateway,
        }
    }

    pub fn start(self) -> ReminderHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(stop_rx));
        info!("reminder worker started (tick: {:?})", TICK);
        ReminderHandle {
            stop: stop_tx,
            handle,
        }
    }

    async fn run(self, mut stop: watch::Receiver<bool>) {
        // First tick a full period out; nothing is due at boot by definition.
        let mut ticker = interval_at(Instant::now() + TICK, TICK);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = stop.changed() => {
                    info!("reminder worker stopped");
                    return;
                }
            }
        }
    }

    async fn tick(&self) {
        let now = Utc::now().naive_utc();
        let targets = match self.repo.due_reminders(now).await {
            Ok(targets) => targets,
            Err(e) => {
                error!("reminder: failed to load due reminders: {e:?}");
                return;
            }
        };

        for target in targets {
            let body = match self.sessions.reminder_message_by_event(target.event_id).await {
                Ok(Some(body)) => body,
                Ok(None) => continue,
                Err(e) => {
                    error!(
                        event_id = target.event_id,
                        "reminder: failed to build message: {e:?}"
                    );
                    continue;
                }
            };

            let content = format!("{body}\n\n{SIGNATURE}");
            match self.send_with_retry(&target.channel_id, &content).await {
                Ok(()) => {
                    let next = now + ChronoDuration::minutes(target.interval_minutes as i64);
                    if let Err(e) = self.repo.mark_reminder_sent(target.event_id, now, next).await {
                        error!(event_id = target.event_id, "reminder: failed to mark sent: {e:?}");
                    }
                }
                Err(e) if e.is_transient() => {
                    // Reattempt sooner than a full interval, but never inside
                    // the same minute: a tight retry loop helps nobody.
                    let backoff = min(TRANSIENT_BACKOFF_MINUTES, target.interval_minutes as i64);
                    let next = now + ChronoDuration::minutes(backoff.max(1));
                    warn!(
                        event_id = target.event_id,
                        channel_id = %target.channel_id,
                        "reminder: transient send failure, retrying in {backoff} min: {e}"
                    );
                    if let Err(e) = self.repo.delay_reminder(target.event_id, next).await {
                        error!(event_id = target.event_id, "reminder: failed to delay: {e:?}");
                    }
                }
                Err(e) => {
                    // Permanent failure: no reschedule, the next tick
                    // re-observes the same due state.
                    error!(
                        event_id = target.event_id,
                        channel_id = %target.channel_id,
                        "reminder: failed to send message: {e}"
                    );
                }
            }
        }
    }

    async fn send_with_retry(&self, channel_id: &str, content: &str) -> Result<(), GatewayError> {
        let mut last_error = GatewayError::Timeout;
        for attempt in 1..=MAX_ATTEMPTS {
            let send = self.gateway.send_channel_message(channel_id, content);
            match tokio::time::timeout(ATTEMPT_TIMEOUT, send).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => {
                    if !e.is_transient() {
                        return Err(e);
                    }
                    last_error = e;
                }
                Err(_) => last_error = GatewayError::Timeout,
            }
            if attempt < MAX_ATTEMPTS {
                let jitter = { rand::thread_rng().gen_range(300u64..800) };
                tokio::time::sleep(Duration::from_millis(jitter)).await;
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Transfer;
    use async_trait::async_trait;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Mutex as StdMutex;

    struct RecordingGateway {
        sent: StdMutex<Vec<(String, String)>>,
        fail_times: StdMutex<u32>,
        failure: fn() -> GatewayError,
    }

    impl RecordingGateway {
        fn new(fail_times: u32, failure: fn() -> GatewayError) -> Self {
            Self {
                sent: StdMutex::new(Vec::new()),
                fail_times: StdMutex::new(fail_times),
                failure,
            }
        }
    }

    #[async_trait]
    impl ChatGateway for RecordingGateway {
        async fn send_channel_message(
            &self,
            channel_id: &str,
            content: &str,
        ) -> Result<(), GatewayError> {
            let mut remaining = self.fail_times.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err((self.failure)());
            }
            self.sent
                .lock()
                .unwrap()
                .push((channel_id.to_string(), content.to_string()));
            Ok(())
        }
    }

    fn worker_with(gateway: Arc<RecordingGateway>) -> ReminderWorker {
        // The pool is lazy; these tests never touch the database.
        let pool = PgPoolOptions::new().connect_lazy("postgres://localhost/test").unwrap();
        let repo = Arc::new(SessionRepository::new(pool));
        let sessions = Arc::new(SessionService::new(repo.clone()));
        ReminderWorker::new(repo, sessions, gateway)
    }

    #[tokio::test]
    async fn retry_succeeds_after_one_transient_failure() {
        let gateway = Arc::new(RecordingGateway::new(1, || GatewayError::Status(502)));
        let worker = worker_with(gateway.clone());

        worker.send_with_retry("c1", "hello").await.unwrap();
        assert_eq!(gateway.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn permanent_failure_short_circuits() {
        let gateway = Arc::new(RecordingGateway::new(2, || GatewayError::Status(403)));
        let worker = worker_with(gateway.clone());

        let err = worker.send_with_retry("c1", "hello").await.unwrap_err();
        assert!(!err.is_transient());
        // Only one attempt was made; permanent errors are not retried.
        assert_eq!(*gateway.fail_times.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn transient_failures_exhaust_both_attempts() {
        let gateway = Arc::new(RecordingGateway::new(5, || GatewayError::Status(503)));
        let worker = worker_with(gateway.clone());

        let err = worker.send_with_retry("c1", "hello").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(*gateway.fail_times.lock().unwrap(), 3);
    }

    #[test]
    fn reminder_content_carries_the_signature_line() {
        let tasks = vec![Transfer {
            payer_id: "b".to_string(),
            payee_id: "a".to_string(),
            amount: 500,
        }];
        let body = crate::session::service::render_reminder_body(&tasks);
        let content = format!("{body}\n\n{SIGNATURE}");
        assert!(content.ends_with(SIGNATURE));
        assert!(content.contains("<@b> → <@a>: 500 円"));
    }
}
