mod issuer;
mod leads;
mod problem;
mod properties;
mod router;
mod session;
mod telemetry;

use std::net::SocketAddr;

use tracing::info;

use estate_desk_core::code::DEFAULT_CODE_WIDTH;
use estate_desk_core::{AllocatorPolicy, CodeAllocator, FollowUpSchedule, HighlightQuota};
use estate_desk_storage::Database;
use estate_desk_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let storage = Database::connect(&config.database_url).await?;
    storage.run_migrations().await?;

    let schedule = FollowUpSchedule::new(&config.timezone)?;
    let allocator = CodeAllocator::new(AllocatorPolicy::new(
        DEFAULT_CODE_WIDTH,
        config.code_max_attempts,
    )?);
    let state = router::AppState::new(
        metrics,
        storage,
        session::SessionVerifier::new(&config.session_secret),
        allocator,
        schedule,
        HighlightQuota::new(config.highlight_quota),
    );

    let addr: SocketAddr = config.bind_addr;
    info!(
        stage = "app",
        %addr,
        env = %config.environment.as_str(),
        timezone = %config.timezone,
        highlight_quota = config.highlight_quota,
        "starting HTTP server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
