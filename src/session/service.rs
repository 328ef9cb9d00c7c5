use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use super::engine;
use super::models::{Expenditure, Member, SettleResult, Transfer};
use super::repository::SessionRepository;
use crate::error::{AppResult, SessionError};

pub const DEFAULT_ROUNDING_UNIT: i32 = 1;
pub const DEFAULT_REMAINDER_STRATEGY: &str = "organizer";
const DEFAULT_REMINDER_INTERVAL_MINUTES: i32 = 1440;

/// Per-channel session lifecycle, expenditure recording, settlement and
/// repayment bookkeeping.
///
/// Every operation runs under one service-wide mutex, held across the whole
/// transactional envelope so read-decide-write sequences (auto-join, settle
/// snapshots) cannot interleave. Contention is human-rate chat.
pub struct SessionService {
    repo: Arc<SessionRepository>,
    lock: Mutex<()>,
}

impl SessionService {
    pub fn new(repo: Arc<SessionRepository>) -> Self {
        Self {
            repo,
            lock: Mutex::new(()),
        }
    }

    /// Start a session for the channel. Idempotent: an existing active event
    /// is left untouched.
    pub async fn start(
        &self,
        channel_id: &str,
        guild_id: i64,
        organizer_id: &str,
        rounding_unit: i32,
        remainder_strategy: &str,
    ) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        if channel_id.is_empty() || guild_id == 0 || organizer_id.is_empty() {
            return Err(SessionError::MissingParameters.into());
        }
        if self.repo.active_event_by_channel(channel_id).await?.is_some() {
            return Ok(());
        }
        let event_id = self
            .repo
            .create_event(guild_id, channel_id, organizer_id, rounding_unit, remainder_strategy)
            .await?;
        debug!(event_id, channel_id, "session started");
        Ok(())
    }

    pub async fn stop(&self, channel_id: &str) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        let event = self.active_event(channel_id).await?;
        self.repo.close_event(event.id).await
    }

    /// Join is affirmative, not destructive: an existing membership keeps its
    /// weight.
    pub async fn join(&self, channel_id: &str, user_id: &str) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        let event = self.active_event(channel_id).await?;
        self.repo.insert_member_if_absent(event.id, user_id, 1.0).await?;
        Ok(())
    }

    /// Set a member's cost weight, creating the membership if needed.
    /// Returns whether this call created the row. Non-positive weights are
    /// normalized to 0 ("no share").
    pub async fn set_weight(&self, channel_id: &str, user_id: &str, weight: f64) -> AppResult<bool> {
        let _guard = self.lock.lock().await;
        let event = self.active_event(channel_id).await?;
        let members = self.repo.members(event.id).await?;
        let created = !members.iter().any(|m| m.user_id == user_id);
        let weight = if weight <= 0.0 { 0.0 } else { weight };
        self.repo.upsert_member(event.id, user_id, weight).await?;
        Ok(created)
    }

    /// Record an expenditure split over all members. The payer is auto-joined
    /// at weight 1.0 when absent; returns whether that happened. Amount may
    /// be negative (a correction); amount 0 only applies the join.
    pub async fn add_payment(
        &self,
        channel_id: &str,
        payer_id: &str,
        amount: i64,
        memo: &str,
    ) -> AppResult<bool> {
        let _guard = self.lock.lock().await;
        let event = self.active_event(channel_id).await?;
        let payer_joined = self.repo.insert_member_if_absent(event.id, payer_id, 1.0).await?;
        if amount != 0 {
            self.repo
                .add_expenditure(event.id, payer_id, amount, memo, &[])
                .await?;
        }
        Ok(payer_joined)
    }

    /// Record an expenditure with an explicit beneficiary set. Beneficiaries
    /// are de-duplicated preserving order and auto-joined when absent.
    /// Returns the payer-joined flag and the newly joined beneficiaries.
    pub async fn add_payment_for(
        &self,
        channel_id: &str,
        payer_id: &str,
        amount: i64,
        memo: &str,
        beneficiaries: &[String],
    ) -> AppResult<(bool, Vec<String>)> {
        let _guard = self.lock.lock().await;
        let event = self.active_event(channel_id).await?;
        let payer_joined = self.repo.insert_member_if_absent(event.id, payer_id, 1.0).await?;

        let mut unique = Vec::new();
        let mut newly_joined = Vec::new();
        for user_id in beneficiaries {
            if user_id.is_empty() || unique.contains(user_id) {
                continue;
            }
            unique.push(user_id.clone());
            if self.repo.insert_member_if_absent(event.id, user_id, 1.0).await? {
                newly_joined.push(user_id.clone());
            }
        }

        if amount != 0 {
            self.repo
                .add_expenditure(event.id, payer_id, amount, memo, &unique)
                .await?;
        }
        Ok((payer_joined, newly_joined))
    }

    /// Run the settlement engine over a consistent snapshot and replace the
    /// event's task set with the result.
    pub async fn settle(&self, channel_id: &str) -> AppResult<SettleResult> {
        let _guard = self.lock.lock().await;
        let event = self.active_event(channel_id).await?;

        let members = self.repo.members(event.id).await?;
        if members.len() < 2 {
            return Err(SessionError::TooFewMembers.into());
        }

        let mut expenditures = Vec::new();
        for expenditure in self.repo.expenditures(event.id).await? {
            let beneficiaries = self.repo.expenditure_beneficiaries(expenditure.id).await?;
            expenditures.push((expenditure, beneficiaries));
        }
        let repayments = self.repo.repayment_sums(event.id).await?;

        let tasks = engine::compute_settlement(&members, &expenditures, &repayments);
        self.repo.replace_settlement_tasks(event.id, &tasks).await?;

        let summary = render_settle_summary(&tasks);
        Ok(SettleResult { tasks, summary })
    }

    pub async fn status(&self, channel_id: &str) -> AppResult<String> {
        let _guard = self.lock.lock().await;
        let event = self.active_event(channel_id).await?;

        let mut members = self.repo.members(event.id).await?;
        if members.is_empty() {
            return Ok("参加者がいません".to_string());
        }
        members.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        let expenditures = self.repo.expenditures(event.id).await?;
        let tasks = self.repo.pending_tasks(event.id).await?;
        Ok(render_status(&members, &expenditures, &tasks))
    }

    pub async fn members(&self, channel_id: &str) -> AppResult<Vec<String>> {
        let _guard = self.lock.lock().await;
        let event = self.active_event(channel_id).await?;
        let mut ids: Vec<String> = self
            .repo
            .members(event.id)
            .await?
            .into_iter()
            .map(|m| m.user_id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Enable, disable or re-schedule the channel's reminder. A non-positive
    /// interval inherits the previously configured one (default one day).
    /// With `send_now`, the current unpaid summary is returned; when nothing
    /// is unpaid the reminder goes armed-silent instead of scheduling.
    pub async fn configure_reminder(
        &self,
        channel_id: &str,
        interval_minutes: i32,
        disable: bool,
        send_now: bool,
    ) -> AppResult<String> {
        let _guard = self.lock.lock().await;
        let event = self.active_event(channel_id).await?;

        let mut interval = interval_minutes;
        if interval <= 0 {
            interval = match self.repo.reminder_config(event.id).await? {
                Some(config) if config.interval_minutes > 0 => config.interval_minutes,
                _ => DEFAULT_REMINDER_INTERVAL_MINUTES,
            };
        }
        if interval < 1 {
            interval = 1;
        }

        if disable {
            self.repo.upsert_reminder(event.id, false, interval, None).await?;
            return Ok("リマインドを停止しました".to_string());
        }

        if send_now {
            let tasks = self.repo.pending_tasks(event.id).await?;
            if tasks.is_empty() {
                self.repo.upsert_reminder(event.id, true, interval, None).await?;
                return Ok(
                    "未払いのタスクはありません\nリマインドは有効です（未払いがあるときのみ自動送信します）"
                        .to_string(),
                );
            }
            let next = Utc::now().naive_utc() + Duration::minutes(interval as i64);
            self.repo.upsert_reminder(event.id, true, interval, Some(next)).await?;
            let body = render_reminder_body(&tasks);
            return Ok(format!("{body}\n次回は約 {interval} 分後に自動送信します"));
        }

        let next = Utc::now().naive_utc() + Duration::minutes(interval as i64);
        self.repo.upsert_reminder(event.id, true, interval, Some(next)).await?;
        Ok(format!(
            "リマインドを有効化しました。次回は約 {interval} 分後に送信します"
        ))
    }

    /// Current unpaid summary for a known event; `None` when nothing is
    /// pending. The reminder worker renders through this.
    pub async fn reminder_message_by_event(&self, event_id: i64) -> AppResult<Option<String>> {
        let _guard = self.lock.lock().await;
        let tasks = self.repo.pending_tasks(event_id).await?;
        if tasks.is_empty() {
            return Ok(None);
        }
        Ok(Some(render_reminder_body(&tasks)))
    }

    /// Record a repayment from payer to payee and consume outstanding tasks
    /// for the pair. With `pay_all` the full outstanding amount is used; a
    /// pair with nothing outstanding is a no-op.
    #[allow(clippy::too_many_arguments)]
    pub async fn register_payment(
        &self,
        channel_id: &str,
        payer_id: &str,
        payee_id: &str,
        amount: i64,
        memo: &str,
        actor_id: &str,
        pay_all: bool,
    ) -> AppResult<String> {
        if !pay_all && amount <= 0 {
            return Err(SessionError::InvalidAmount.into());
        }

        let _guard = self.lock.lock().await;
        let event = self.active_event(channel_id).await?;

        if pay_all {
            let paid = self
                .repo
                .apply_repayment_all(event.id, payer_id, payee_id, memo, actor_id)
                .await?;
            if paid <= 0 {
                return Ok(
                    "未払いタスクがありません（先に /nomikai settle を実行してください）".to_string(),
                );
            }
            let mut message = format!(
                "支払いを記録しました: <@{payer_id}> → <@{payee_id}> 未払い全額 {paid} 円"
            );
            if !memo.is_empty() {
                message.push_str(&format!(" ({memo})"));
            }
            message.push_str("\nこのペアの未払いタスクは解消されました");
            return Ok(message);
        }

        let remaining = self
            .repo
            .apply_repayment(event.id, payer_id, payee_id, amount, memo, actor_id)
            .await?;

        let mut message = format!("支払いを記録しました: <@{payer_id}> → <@{payee_id}> {amount} 円");
        if !memo.is_empty() {
            message.push_str(&format!(" ({memo})"));
        }
        if remaining > 0 {
            message.push_str(&format!("\nこのペアの未払い残高: {remaining} 円"));
        } else {
            message.push_str("\nこのペアの未払いタスクは解消されました");
        }
        Ok(message)
    }

    async fn active_event(&self, channel_id: &str) -> AppResult<super::models::Event> {
        self.repo
            .active_event_by_channel(channel_id)
            .await?
            .ok_or_else(|| SessionError::NoActiveSession.into())
    }
}

pub fn render_settle_summary(tasks: &[Transfer]) -> String {
    if tasks.is_empty() {
        return "精算は不要です".to_string();
    }
    let mut out = String::from("支払タスク:\n");
    for task in tasks {
        out.push_str(&format!(
            "<@{}> → <@{}>: {} 円\n",
            task.payer_id, task.payee_id, task.amount
        ));
    }
    out
}

pub fn render_reminder_body(tasks: &[Transfer]) -> String {
    let mut out = String::from("未払いのリマインドです。対応をお願いします。\n");
    for task in tasks {
        out.push_str(&format!(
            "<@{}> → <@{}>: {} 円\n",
            task.payer_id, task.payee_id, task.amount
        ));
    }
    out.trim_end_matches('\n').to_string()
}

fn render_status(members: &[Member], expenditures: &[Expenditure], tasks: &[Transfer]) -> String {
    let mut paid: HashMap<&str, i64> = HashMap::new();
    let mut total = 0i64;
    for expenditure in expenditures {
        *paid.entry(expenditure.payer_id.as_str()).or_insert(0) += expenditure.amount;
        total += expenditure.amount;
    }

    let mut out = format!("総支出: {total} 円\n");
    for member in members {
        out.push_str(&format!(
            "<@{}> weight={:.2} paid={}\n",
            member.user_id,
            member.weight,
            paid.get(member.user_id.as_str()).copied().unwrap_or(0)
        ));
    }
    if !tasks.is_empty() {
        out.push_str("\n未払いタスク:\n");
        for task in tasks {
            out.push_str(&format!(
                "<@{}> → <@{}>: {} 円\n",
                task.payer_id, task.payee_id, task.amount
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(payer: &str, payee: &str, amount: i64) -> Transfer {
        Transfer {
            payer_id: payer.to_string(),
            payee_id: payee.to_string(),
            amount,
        }
    }

    #[test]
    fn settle_summary_lists_each_task() {
        let tasks = vec![transfer("b", "a", 1000), transfer("c", "a", 1000)];
        let summary = render_settle_summary(&tasks);
        assert!(summary.starts_with("支払タスク:"));
        assert!(summary.contains("<@b> → <@a>: 1000 円"));
        assert!(summary.contains("<@c> → <@a>: 1000 円"));
    }

    #[test]
    fn settle_summary_for_empty_task_list() {
        assert_eq!(render_settle_summary(&[]), "精算は不要です");
    }

    #[test]
    fn reminder_body_has_no_trailing_newline() {
        let body = render_reminder_body(&[transfer("b", "a", 500)]);
        assert!(body.starts_with("未払いのリマインドです"));
        assert!(body.ends_with("<@b> → <@a>: 500 円"));
    }

    #[test]
    fn status_shows_totals_weights_and_pending_tasks() {
        let members = vec![
            Member {
                event_id: 1,
                user_id: "a".to_string(),
                weight: 2.0,
            },
            Member {
                event_id: 1,
                user_id: "b".to_string(),
                weight: 1.0,
            },
        ];
        let expenditures = vec![Expenditure {
            id: 1,
            event_id: 1,
            payer_id: "a".to_string(),
            amount: 3000,
            memo: String::new(),
        }];
        let tasks = vec![transfer("b", "a", 1000)];

        let status = render_status(&members, &expenditures, &tasks);
        assert!(status.starts_with("総支出: 3000 円"));
        assert!(status.contains("<@a> weight=2.00 paid=3000"));
        assert!(status.contains("<@b> weight=1.00 paid=0"));
        assert!(status.contains("未払いタスク:"));
    }
}
