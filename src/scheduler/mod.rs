//! Durable one-shot / daily-recurring command scheduler. Persisted tasks are
//! rehydrated on boot, each live task owns exactly one armed timer, and fires
//! re-arm (repeating) or delete (one-shot) under the registry lock.

mod repository;

pub use repository::{ScheduleRepository, ScheduledTask};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};

use crate::error::AppResult;
use crate::gateway::ChatGateway;
use crate::responses::ResponseRepository;
use crate::session::service::{DEFAULT_REMAINDER_STRATEGY, DEFAULT_ROUNDING_UNIT};
use crate::session::SessionService;

/// Bound on database work inside a fire callback so a dead pool cannot pin
/// the task forever.
const FIRE_DB_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Scheduler {
    repo: Arc<ScheduleRepository>,
    sessions: Arc<SessionService>,
    responses: Arc<ResponseRepository>,
    gateway: Arc<dyn ChatGateway>,
    active: Mutex<HashMap<i64, ScheduledTask>>,
}

impl Scheduler {
    pub fn new(
        repo: Arc<ScheduleRepository>,
        sessions: Arc<SessionService>,
        responses: Arc<ResponseRepository>,
        gateway: Arc<dyn ChatGateway>,
    ) -> Self {
        Self {
            repo,
            sessions,
            responses,
            gateway,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Rehydrate persisted tasks: expired one-shots are deleted, lapsed daily
    /// tasks are advanced to their next upcoming occurrence, everything else
    /// is armed as-is. Running this twice without intervening fires is a
    /// no-op the second time.
    pub async fn restore(self: &Arc<Self>) -> AppResult<usize> {
        let tasks = self.repo.list_all().await?;
        let now = Utc::now().naive_utc();

        let mut active = self.active.lock().await;
        let mut restored = 0usize;
        for mut task in tasks {
            if task.fire_at < now && !task.repeat {
                if let Err(e) = self.repo.delete(task.id).await {
                    warn!(task_id = task.id, "failed to delete expired task: {e:?}");
                }
                continue;
            }
            if task.fire_at < now && task.repeat {
                let next = next_daily_occurrence(task.fire_at, now);
                if let Err(e) = self.repo.update_fire_at(task.id, next).await {
                    warn!(task_id = task.id, "failed to advance lapsed task: {e:?}");
                    continue;
                }
                task.fire_at = next;
            }
            active.insert(task.id, task.clone());
            self.arm(task);
            restored += 1;
        }

        info!("restored {restored} scheduled tasks");
        Ok(restored)
    }

    /// Persist a new task and arm its timer immediately. Callers validate
    /// that `fire_at` is in the future.
    pub async fn add(
        self: &Arc<Self>,
        command: &str,
        fire_at: NaiveDateTime,
        repeat: bool,
        channel_id: &str,
        guild_id: i64,
        user_id: &str,
    ) -> AppResult<ScheduledTask> {
        let task = self
            .repo
            .add(command, fire_at, repeat, channel_id, guild_id, user_id)
            .await?;

        self.active.lock().await.insert(task.id, task.clone());
        self.arm(task.clone());
        Ok(task)
    }

    /// The guild's live tasks, from the in-memory registry: a just-fired
    /// one-shot disappears without a database round-trip.
    pub async fn list(&self, guild_id: i64) -> Vec<ScheduledTask> {
        let active = self.active.lock().await;
        let mut tasks: Vec<ScheduledTask> = active
            .values()
            .filter(|t| t.guild_id == guild_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.fire_at, t.id));
        tasks
    }

    fn arm(self: &Arc<Self>, task: ScheduledTask) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let now = Utc::now().naive_utc();
            let wait = (task.fire_at - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            scheduler.fire(task).await;
        });
    }

    async fn fire(self: Arc<Self>, task: ScheduledTask) {
        // Dispatch outside the registry lock; the gateway may be slow.
        self.dispatch(&task).await;

        let mut active = self.active.lock().await;
        if !active.contains_key(&task.id) {
            return;
        }

        if task.repeat {
            let next = task.fire_at + ChronoDuration::hours(24);
            match timeout(FIRE_DB_TIMEOUT, self.repo.update_fire_at(task.id, next)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(task_id = task.id, "failed to update scheduled task time: {e:?}");
                    return;
                }
                Err(_) => {
                    error!(task_id = task.id, "timed out updating scheduled task time");
                    return;
                }
            }
            let mut next_task = task.clone();
            next_task.fire_at = next;
            active.insert(task.id, next_task.clone());
            drop(active);
            self.arm(next_task);
        } else {
            match timeout(FIRE_DB_TIMEOUT, self.repo.delete(task.id)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(task_id = task.id, "failed to delete scheduled task: {e:?}"),
                Err(_) => error!(task_id = task.id, "timed out deleting scheduled task"),
            }
            active.remove(&task.id);
        }
    }

    /// Execute a fired command string: `!name` resolves a custom response,
    /// `nomikai start|stop` drives the session service, anything else is sent
    /// to the channel verbatim.
    async fn dispatch(&self, task: &ScheduledTask) {
        let parts: Vec<&str> = task.command.split_whitespace().collect();
        let Some(&first) = parts.first() else {
            return;
        };

        if let Some(name) = first.strip_prefix('!') {
            if !name.is_empty() {
                match self.responses.get(task.guild_id, name).await {
                    Ok(Some(custom)) => {
                        self.send(&task.channel_id, &custom.response).await;
                        return;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(task_id = task.id, "custom response lookup failed: {e:?}");
                    }
                }
            }
        }

        match first {
            "nomikai" => {
                let Some(&sub) = parts.get(1) else {
                    self.send(&task.channel_id, "nomikai コマンドにはサブコマンドが必要です")
                        .await;
                    return;
                };
                match sub {
                    "start" => {
                        let result = self
                            .sessions
                            .start(
                                &task.channel_id,
                                task.guild_id,
                                &task.user_id,
                                DEFAULT_ROUNDING_UNIT,
                                DEFAULT_REMAINDER_STRATEGY,
                            )
                            .await;
                        match result {
                            Ok(()) => {
                                self.send(&task.channel_id, "予約実行: 飲み会セッションを開始しました")
                                    .await
                            }
                            Err(e) => {
                                self.send(
                                    &task.channel_id,
                                    &format!("予約実行エラー (nomikai start): {e}"),
                                )
                                .await
                            }
                        }
                    }
                    "stop" => match self.sessions.stop(&task.channel_id).await {
                        Ok(()) => {
                            self.send(&task.channel_id, "予約実行: 飲み会セッションを終了しました")
                                .await
                        }
                        Err(e) => {
                            self.send(
                                &task.channel_id,
                                &format!("予約実行エラー (nomikai stop): {e}"),
                            )
                            .await
                        }
                    },
                    other => {
                        self.send(
                            &task.channel_id,
                            &format!("予約実行: 未対応の nomikai サブコマンドです: {other}"),
                        )
                        .await
                    }
                }
            }
            _ => self.send(&task.channel_id, &task.command).await,
        }
    }

    async fn send(&self, channel_id: &str, content: &str) {
        if let Err(e) = self.gateway.send_channel_message(channel_id, content).await {
            error!(channel_id, "scheduled dispatch send failed: {e}");
        }
    }
}

/// Collapse any number of missed daily occurrences into the single next
/// upcoming fire time.
pub fn next_daily_occurrence(fire_at: NaiveDateTime, now: NaiveDateTime) -> NaiveDateTime {
    let days_past = (now - fire_at).num_hours() / 24;
    fire_at + ChronoDuration::days(days_past + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn lapsed_daily_task_collapses_to_next_occurrence() {
        // 73 hours past: three full missed days, next fire 23h out.
        let now = at(10, 13);
        let fire_at = now - ChronoDuration::hours(73);

        let next = next_daily_occurrence(fire_at, now);
        assert_eq!(next, now + ChronoDuration::hours(23));
    }

    #[test]
    fn one_minute_past_advances_a_single_day() {
        let now = at(10, 12);
        let fire_at = now - ChronoDuration::minutes(1);

        let next = next_daily_occurrence(fire_at, now);
        assert_eq!(next, fire_at + ChronoDuration::days(1));
        assert!(next > now);
    }

    #[test]
    fn advance_lands_strictly_in_the_future() {
        // Rehydration applies the advance at most once: afterwards the task
        // is upcoming, so a second boot pass leaves it untouched.
        let now = at(15, 9);
        for hours_past in [1, 24, 48, 100, 1000] {
            let fire_at = now - ChronoDuration::hours(hours_past);
            let next = next_daily_occurrence(fire_at, now);
            assert!(next > now, "hours_past={hours_past}");
            assert!(next - now <= ChronoDuration::hours(24));
        }
    }
}
