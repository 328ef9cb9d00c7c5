use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub database_url: String,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Ok(Self {
            discord_token: require_env("DISCORD_TOKEN")?,
            database_url: require_env("DATABASE_URL")?,
        })
    }
}

fn require_env(key: &str) -> AppResult<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Config(format!("{key} must be set")))
}
