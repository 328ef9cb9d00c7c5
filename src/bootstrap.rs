use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::Config;
use crate::error::AppResult;
use crate::gateway::{ChatGateway, RestGateway};
use crate::reminder::{ReminderHandle, ReminderWorker};
use crate::responses::ResponseRepository;
use crate::scheduler::{ScheduleRepository, Scheduler};
use crate::session::{SessionRepository, SessionService};

/// Everything the process shares: repositories, the session service, the
/// scheduler registry and the outbound gateway.
pub struct AppState {
    pub sessions: Arc<SessionService>,
    pub session_repo: Arc<SessionRepository>,
    pub responses: Arc<ResponseRepository>,
    pub scheduler: Arc<Scheduler>,
    pub gateway: Arc<dyn ChatGateway>,
}

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let pool = initialize_database(&config.database_url).await?;

    let session_repo = Arc::new(SessionRepository::new(pool.clone()));
    let sessions = Arc::new(SessionService::new(session_repo.clone()));
    info!("✅ Session service initialized");

    let responses = Arc::new(ResponseRepository::new(pool.clone()));
    info!("✅ Custom-response store initialized");

    let gateway: Arc<dyn ChatGateway> = Arc::new(RestGateway::new(config.discord_token.clone()));

    let schedule_repo = Arc::new(ScheduleRepository::new(pool));
    let scheduler = Arc::new(Scheduler::new(
        schedule_repo,
        sessions.clone(),
        responses.clone(),
        gateway.clone(),
    ));
    info!("✅ Command scheduler initialized");

    Ok(AppState {
        sessions,
        session_repo,
        responses,
        scheduler,
        gateway,
    })
}

/// Spawn the minute-tick reminder worker. Exactly one per process.
pub fn start_reminder_worker(state: &AppState) -> ReminderHandle {
    ReminderWorker::new(
        state.session_repo.clone(),
        state.sessions.clone(),
        state.gateway.clone(),
    )
    .start()
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await?;

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
