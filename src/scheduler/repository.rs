use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::AppResult;

/// A timed future execution of a chat command, optionally daily-recurring.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduledTask {
    pub id: i64,
    pub command: String,
    pub fire_at: NaiveDateTime,
    pub repeat: bool,
    pub channel_id: String,
    pub guild_id: i64,
    pub user_id: String,
    pub created_at: NaiveDateTime,
}

pub struct ScheduleRepository {
    pool: PgPool,
}

impl ScheduleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn add(
        &self,
        command: &str,
        fire_at: NaiveDateTime,
        repeat: bool,
        channel_id: &str,
        guild_id: i64,
        user_id: &str,
    ) -> AppResult<ScheduledTask> {
        let task = sqlx::query_as::<_, ScheduledTask>(
            r#"
            INSERT INTO scheduled_tasks (command, fire_at, repeat, channel_id, guild_id, user_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, command, fire_at, repeat, channel_id, guild_id, user_id, created_at
            "#,
        )
        .bind(command)
        .bind(fire_at)
        .bind(repeat)
        .bind(channel_id)
        .bind(guild_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(task)
    }

    pub async fn list_all(&self) -> AppResult<Vec<ScheduledTask>> {
        let tasks = sqlx::query_as::<_, ScheduledTask>(
            r#"
            SELECT id, command, fire_at, repeat, channel_id, guild_id, user_id, created_at
            FROM scheduled_tasks
            ORDER BY fire_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }

    pub async fn update_fire_at(&self, id: i64, fire_at: NaiveDateTime) -> AppResult<()> {
        sqlx::query("UPDATE scheduled_tasks SET fire_at = $2 WHERE id = $1")
            .bind(id)
            .bind(fire_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn delete(&self, id: i64) -> AppResult<()> {
        sqlx::query("DELETE FROM scheduled_tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
