//! Per-guild custom responses: `(guild_id, name) → response text`, triggered
//! by slash-command CRUD and the `!name` message prefix.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::AppResult;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CustomResponse {
    pub guild_id: i64,
    pub name: String,
    pub response: String,
}

pub struct ResponseRepository {
    pool: PgPool,
}

impl ResponseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, guild_id: i64, name: &str) -> AppResult<Option<CustomResponse>> {
        let response = sqlx::query_as::<_, CustomResponse>(
            "SELECT guild_id, name, response FROM commands WHERE guild_id = $1 AND name = $2",
        )
        .bind(guild_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(response)
    }

    /// Returns false when the name is already taken for the guild.
    pub async fn add(&self, guild_id: i64, name: &str, response: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO commands (guild_id, name, response)
            VALUES ($1, $2, $3)
            ON CONFLICT (guild_id, name) DO NOTHING
            "#,
        )
        .bind(guild_id)
        .bind(name)
        .bind(response)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns false when no such command exists.
    pub async fn update(&self, guild_id: i64, name: &str, response: &str) -> AppResult<bool> {
        let result =
            sqlx::query("UPDATE commands SET response = $3 WHERE guild_id = $1 AND name = $2")
                .bind(guild_id)
                .bind(name)
                .bind(response)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns false when no such command exists.
    pub async fn remove(&self, guild_id: i64, name: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM commands WHERE guild_id = $1 AND name = $2")
            .bind(guild_id)
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All of a guild's responses, optionally filtered by a substring match
    /// over both name and response text.
    pub async fn list(&self, guild_id: i64, pattern: &str) -> AppResult<Vec<CustomResponse>> {
        let responses = if pattern.is_empty() {
            sqlx::query_as::<_, CustomResponse>(
                "SELECT guild_id, name, response FROM commands WHERE guild_id = $1 ORDER BY name",
            )
            .bind(guild_id)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, CustomResponse>(
                r#"
                SELECT guild_id, name, response
                FROM commands
                WHERE guild_id = $1 AND (name ILIKE $2 OR response ILIKE $2)
                ORDER BY name
                "#,
            )
            .bind(guild_id)
            .bind(format!("%{pattern}%"))
            .fetch_all(&self.pool)
            .await?
        };

        Ok(responses)
    }

    /// Guilds with at least one registered response; the admin surface
    /// intersects the caller's guilds against this.
    pub async fn registered_guild_ids(&self) -> AppResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>("SELECT DISTINCT guild_id FROM commands")
            .fetch_all(&self.pool)
            .await?;

        Ok(ids)
    }
}
