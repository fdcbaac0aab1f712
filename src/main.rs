use color_eyre::eyre::Context;
use dotenvy::dotenv;
use focus_unlock::{
    config::Config,
    startup::HttpServer,
    tokens::reaper::start_reaper,
    utils::{state::setup, telemetry::config_tracing},
};
use tracing::Level;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenv().ok();
    config_tracing(Level::DEBUG);

    let config = Config::load().wrap_err("Failed to load configuration")?;
    let state = setup(&config).await?;

    // Kept alive for the lifetime of the server
    let _reaper = match &config.tokens.reaper_schedule {
        Some(schedule) => Some(
            start_reaper(
                schedule,
                state.token_repo.clone(),
                state.clock.clone(),
                config.tokens.retention()?,
            )
            .await
            .wrap_err("Failed to schedule token reaper")?,
        ),
        None => None,
    };

    let server = HttpServer::new(&config, state).await?;
    server.run().await
}
