use splitbot::{bootstrap, config::Config};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,splitbot=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("🚀 Starting splitbot core");

    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    let state = bootstrap::initialize_app_state(&config).await?;

    // Rehydrate persisted timers; a failure here degrades, not aborts.
    if let Err(e) = state.scheduler.restore().await {
        warn!("failed to restore scheduled tasks: {e:?}");
    }

    let reminder = bootstrap::start_reminder_worker(&state);

    info!("🌐 splitbot core is running");

    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    reminder.stop().await;

    Ok(())
}
