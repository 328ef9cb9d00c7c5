use chrono::NaiveDateTime;
use sqlx::PgPool;

use super::models::{
    Event, Expenditure, Member, ReminderConfig, ReminderDue, Transfer, STATUS_ACTIVE, STATUS_CLOSED,
};
use crate::error::{AppResult, SessionError};

/// Persistence for everything a settlement session owns: the event row, its
/// members, expenditures with beneficiary sets, settlement tasks, the
/// repayment log and the reminder configuration.
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ========== EVENTS ==========

    pub async fn active_event_by_channel(&self, channel_id: &str) -> AppResult<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(
            r#"
            SELECT id, guild_id, channel_id, organizer_id, status, rounding_unit, remainder_strategy
            FROM nomikai_events
            WHERE channel_id = $1 AND status = $2
            LIMIT 1
            "#,
        )
        .bind(channel_id)
        .bind(STATUS_ACTIVE)
        .fetch_optional(&self.pool)
        .await?;

        Ok(event)
    }

    pub async fn create_event(
        &self,
        guild_id: i64,
        channel_id: &str,
        organizer_id: &str,
        rounding_unit: i32,
        remainder_strategy: &str,
    ) -> AppResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO nomikai_events (guild_id, channel_id, organizer_id, status, rounding_unit, remainder_strategy)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(guild_id)
        .bind(channel_id)
        .bind(organizer_id)
        .bind(STATUS_ACTIVE)
        .bind(rounding_unit)
        .bind(remainder_strategy)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn close_event(&self, event_id: i64) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE nomikai_events
            SET status = $2, closed_at = NOW() AT TIME ZONE 'utc'
            WHERE id = $1 AND status = $3
            "#,
        )
        .bind(event_id)
        .bind(STATUS_CLOSED)
        .bind(STATUS_ACTIVE)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SessionError::NoActiveSession.into());
        }
        Ok(())
    }

    // ========== MEMBERS ==========

    /// Insert a membership row unless one exists; an existing weight is never
    /// touched. Returns whether the row was created.
    pub async fn insert_member_if_absent(
        &self,
        event_id: i64,
        user_id: &str,
        weight: f64,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO nomikai_event_members (event_id, user_id, weight)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id, user_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(user_id)
        .bind(weight)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn upsert_member(&self, event_id: i64, user_id: &str, weight: f64) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO nomikai_event_members (event_id, user_id, weight)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id, user_id) DO UPDATE SET weight = EXCLUDED.weight
            "#,
        )
        .bind(event_id)
        .bind(user_id)
        .bind(weight)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn members(&self, event_id: i64) -> AppResult<Vec<Member>> {
        let members = sqlx::query_as::<_, Member>(
            r#"
            SELECT event_id, user_id, weight
            FROM nomikai_event_members
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(members)
    }

    // ========== EXPENDITURES ==========

    /// Insert an expenditure and its beneficiary set in one transaction.
    pub async fn add_expenditure(
        &self,
        event_id: i64,
        payer_id: &str,
        amount: i64,
        memo: &str,
        beneficiaries: &[String],
    ) -> AppResult<i64> {
        let mut tx = self.pool.begin().await?;

        let expenditure_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO nomikai_payments (event_id, payer_id, amount, memo)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(event_id)
        .bind(payer_id)
        .bind(amount)
        .bind(memo)
        .fetch_one(&mut *tx)
        .await?;

        for user_id in beneficiaries {
            if user_id.is_empty() {
                continue;
            }
            sqlx::query(
                r#"
                INSERT INTO nomikai_payment_beneficiaries (payment_id, user_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(expenditure_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(expenditure_id)
    }

    pub async fn expenditures(&self, event_id: i64) -> AppResult<Vec<Expenditure>> {
        let expenditures = sqlx::query_as::<_, Expenditure>(
            r#"
            SELECT id, event_id, payer_id, amount, COALESCE(memo, '') AS memo
            FROM nomikai_payments
            WHERE event_id = $1
            ORDER BY id
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(expenditures)
    }

    pub async fn expenditure_beneficiaries(&self, expenditure_id: i64) -> AppResult<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT user_id
            FROM nomikai_payment_beneficiaries
            WHERE payment_id = $1
            "#,
        )
        .bind(expenditure_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    // ========== SETTLEMENT TASKS ==========

    /// Replace the event's task set wholesale: delete then insert, in one
    /// transaction. Rows with non-positive amounts or blank ids are skipped.
    pub async fn replace_settlement_tasks(
        &self,
        event_id: i64,
        tasks: &[Transfer],
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM nomikai_settlement_tasks WHERE event_id = $1")
            .bind(event_id)
            .execute(&mut *tx)
            .await?;

        for task in tasks {
            if task.amount <= 0 || task.payer_id.is_empty() || task.payee_id.is_empty() {
                continue;
            }
            sqlx::query(
                r#"
                INSERT INTO nomikai_settlement_tasks (event_id, payer_id, payee_id, amount, completed)
                VALUES ($1, $2, $3, $4, FALSE)
                "#,
            )
            .bind(event_id)
            .bind(&task.payer_id)
            .bind(&task.payee_id)
            .bind(task.amount)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn pending_tasks(&self, event_id: i64) -> AppResult<Vec<Transfer>> {
        let tasks = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT payer_id, payee_id, amount
            FROM nomikai_settlement_tasks
            WHERE event_id = $1 AND completed = FALSE
            ORDER BY payer_id, payee_id
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }

    /// Pending sum for one ordered pair; the seisan autocomplete reads this.
    pub async fn outstanding_amount(
        &self,
        event_id: i64,
        payer_id: &str,
        payee_id: &str,
    ) -> AppResult<i64> {
        let sum: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0)::BIGINT
            FROM nomikai_settlement_tasks
            WHERE event_id = $1 AND completed = FALSE AND payer_id = $2 AND payee_id = $3
            "#,
        )
        .bind(event_id)
        .bind(payer_id)
        .bind(payee_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(sum)
    }

    // ========== TASK PAYMENTS ==========

    /// Total recorded repayments per ordered pair, for the settlement engine.
    pub async fn repayment_sums(&self, event_id: i64) -> AppResult<Vec<Transfer>> {
        let sums = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT payer_id, payee_id, COALESCE(SUM(amount), 0)::BIGINT AS amount
            FROM nomikai_task_payments
            WHERE event_id = $1
            GROUP BY payer_id, payee_id
            ORDER BY payer_id, payee_id
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(sums)
    }

    /// Record a repayment and consume pending tasks for the ordered pair,
    /// oldest first. The pair's rows are locked for the duration so two
    /// concurrent repayments on the same pair are linearized. Returns the
    /// pair's remaining pending sum.
    pub async fn apply_repayment(
        &self,
        event_id: i64,
        payer_id: &str,
        payee_id: &str,
        amount: i64,
        memo: &str,
        recorded_by: &str,
    ) -> AppResult<i64> {
        if amount <= 0 {
            return Err(SessionError::InvalidAmount.into());
        }

        let mut tx = self.pool.begin().await?;

        let pending: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT id, amount
            FROM nomikai_settlement_tasks
            WHERE event_id = $1 AND completed = FALSE AND payer_id = $2 AND payee_id = $3
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(event_id)
        .bind(payer_id)
        .bind(payee_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut remaining_payment = amount;
        for (task_id, task_amount) in pending {
            if remaining_payment <= 0 {
                break;
            }
            if remaining_payment >= task_amount {
                remaining_payment -= task_amount;
                sqlx::query(
                    r#"
                    UPDATE nomikai_settlement_tasks
                    SET completed = TRUE, completed_at = COALESCE(completed_at, NOW() AT TIME ZONE 'utc')
                    WHERE id = $1
                    "#,
                )
                .bind(task_id)
                .execute(&mut *tx)
                .await?;
            } else {
                let new_amount = task_amount - remaining_payment;
                remaining_payment = 0;
                sqlx::query("UPDATE nomikai_settlement_tasks SET amount = $2 WHERE id = $1")
                    .bind(task_id)
                    .bind(new_amount)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        self.insert_task_payment(&mut tx, event_id, payer_id, payee_id, amount, memo, recorded_by)
            .await?;

        let remaining: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0)::BIGINT
            FROM nomikai_settlement_tasks
            WHERE event_id = $1 AND completed = FALSE AND payer_id = $2 AND payee_id = $3
            "#,
        )
        .bind(event_id)
        .bind(payer_id)
        .bind(payee_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(remaining)
    }

    /// Pay-all: settle the pair's entire outstanding amount in one call.
    /// Returns the amount paid, 0 when nothing was outstanding (no rows are
    /// written in that case).
    pub async fn apply_repayment_all(
        &self,
        event_id: i64,
        payer_id: &str,
        payee_id: &str,
        memo: &str,
        recorded_by: &str,
    ) -> AppResult<i64> {
        let mut tx = self.pool.begin().await?;

        let pending: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT id, amount
            FROM nomikai_settlement_tasks
            WHERE event_id = $1 AND completed = FALSE AND payer_id = $2 AND payee_id = $3
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(event_id)
        .bind(payer_id)
        .bind(payee_id)
        .fetch_all(&mut *tx)
        .await?;

        let total: i64 = pending.iter().map(|(_, amount)| amount).sum();
        if total <= 0 {
            return Ok(0);
        }

        for (task_id, _) in &pending {
            sqlx::query(
                r#"
                UPDATE nomikai_settlement_tasks
                SET completed = TRUE, completed_at = COALESCE(completed_at, NOW() AT TIME ZONE 'utc')
                WHERE id = $1
                "#,
            )
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        }

        self.insert_task_payment(&mut tx, event_id, payer_id, payee_id, total, memo, recorded_by)
            .await?;

        tx.commit().await?;
        Ok(total)
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_task_payment(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        event_id: i64,
        payer_id: &str,
        payee_id: &str,
        amount: i64,
        memo: &str,
        recorded_by: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO nomikai_task_payments (event_id, payer_id, payee_id, amount, memo, recorded_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event_id)
        .bind(payer_id)
        .bind(payee_id)
        .bind(amount)
        .bind(memo)
        .bind(recorded_by)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    // ========== REMINDERS ==========

    /// Upsert the reminder row. `next_due_at = None` is written as NULL,
    /// which is the armed-silent state: enabled, but nothing scheduled until
    /// unpaid tasks appear.
    pub async fn upsert_reminder(
        &self,
        event_id: i64,
        enabled: bool,
        interval_minutes: i32,
        next_due_at: Option<NaiveDateTime>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO nomikai_reminders (event_id, enabled, interval_minutes, next_due_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_id) DO UPDATE
            SET enabled = EXCLUDED.enabled,
                interval_minutes = EXCLUDED.interval_minutes,
                next_due_at = EXCLUDED.next_due_at
            "#,
        )
        .bind(event_id)
        .bind(enabled)
        .bind(interval_minutes)
        .bind(next_due_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn reminder_config(&self, event_id: i64) -> AppResult<Option<ReminderConfig>> {
        let config = sqlx::query_as::<_, ReminderConfig>(
            r#"
            SELECT enabled, interval_minutes, next_due_at
            FROM nomikai_reminders
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(config)
    }

    /// Targets that are enabled, due (or armed with no scheduled time), and
    /// still carry at least one pending task. Both conditions live in the SQL
    /// so idle events are never fetched.
    pub async fn due_reminders(&self, now: NaiveDateTime) -> AppResult<Vec<ReminderDue>> {
        let due = sqlx::query_as::<_, ReminderDue>(
            r#"
            SELECT r.event_id, e.channel_id, r.interval_minutes
            FROM nomikai_reminders r
            JOIN nomikai_events e ON e.id = r.event_id
            WHERE r.enabled = TRUE
              AND (r.next_due_at IS NULL OR r.next_due_at <= $1)
              AND EXISTS (
                SELECT 1 FROM nomikai_settlement_tasks t
                WHERE t.event_id = r.event_id AND t.completed = FALSE
              )
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(due)
    }

    pub async fn mark_reminder_sent(
        &self,
        event_id: i64,
        sent_at: NaiveDateTime,
        next_due: NaiveDateTime,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE nomikai_reminders
            SET last_sent_at = $2, next_due_at = $3
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(sent_at)
        .bind(next_due)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Push `next_due_at` back without touching `last_sent_at`; used after a
    /// transient send failure.
    pub async fn delay_reminder(&self, event_id: i64, next_due: NaiveDateTime) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE nomikai_reminders
            SET next_due_at = $2
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(next_due)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
