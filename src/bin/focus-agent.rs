//! focus-agent - keeps the device's redirect rules in line with its blocklist
//! and runs the QR unlock flow for a blocked site.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, eyre, Context};
use dotenvy::dotenv;
use focus_unlock::{
    agent::Agent,
    blocking::{BlockingError, FileBlockingStore},
    client::TokenStoreClient,
    config::{AgentConfig, Config},
    poller::PollerState,
    rules::FileRuleEngine,
    utils::telemetry::config_tracing,
};
use tracing::{info, Level};

/// Blocks distracting sites until a QR code is scanned from another device
#[derive(Parser, Debug)]
#[command(name = "focus-agent")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// State file (overrides agent.state_path)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Rules file read by the extension (overrides agent.rules_path)
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty state file if none exists
    Init,
    /// Add a site to the blocklist
    Block { host: String },
    /// Remove a site from the blocklist
    Unblock { host: String },
    /// Show blocked sites
    List,
    /// Rewrite the rules file once from the current state
    Sync,
    /// Keep the rules file in sync until interrupted
    Watch,
    /// Show an unlock code for a blocked site and wait for it to be scanned
    Unlock { host: String },
}

async fn unlock(
    agent: &Agent<FileBlockingStore, FileRuleEngine>,
    config: &AgentConfig,
    host: &str,
) -> color_eyre::Result<()> {
    let client = TokenStoreClient::new(&config.store_url, config.api_key.clone())?;
    let poller = agent.unlock_poller(client);
    let mut states = poller.subscribe();
    let mut countdown = poller.countdown();

    let run = agent.unlock(&poller, host);
    tokio::pin!(run);
    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome?,
            Ok(()) = states.changed() => {
                if let PollerState::Polling { unlock_url, .. } = &*states.borrow_and_update() {
                    println!("Scan to unlock {host}:\n  {unlock_url}");
                }
            }
            Ok(()) = countdown.changed() => {
                if let Some(remaining) = *countdown.borrow_and_update() {
                    let marker = if remaining.is_expiring() { "!" } else { " " };
                    eprint!("\r{marker} {:<24}", remaining.label());
                }
            }
        }
    };
    eprintln!();

    match outcome {
        PollerState::Unlocked { destination } => {
            println!("Sites unlocked! Continue to {destination}");
            Ok(())
        }
        PollerState::Expired => Err(eyre!("QR code expired")),
        PollerState::Failed { reason } => Err(eyre!(reason)),
        other => Err(eyre!("unlock ended in state {other:?}")),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenv().ok();
    let cli = Cli::parse();
    config_tracing(if cli.verbose { Level::DEBUG } else { Level::WARN });

    let mut config = Config::load()
        .wrap_err("Failed to load configuration")?
        .agent;
    if let Some(state) = cli.state {
        config.state_path = state;
    }
    if let Some(rules) = cli.rules {
        config.rules_path = rules;
    }

    let agent = Agent::open(&config).await?;
    let controller = agent.controller();

    match cli.command {
        Commands::Init => {
            let state = controller.initialize().await?;
            agent.synchronizer().synchronize_state(&state).await?;
            println!("Initialized {:?}", config.state_path);
        }
        Commands::Block { host } => match controller.add_blocked(&host).await {
            Ok(host) => {
                agent.sync().await?;
                println!("Blocked {host}");
            }
            Err(BlockingError::AlreadyBlocked(_)) => bail!("Site already blocked!"),
            Err(e) => return Err(e.into()),
        },
        Commands::Unblock { host } => {
            if controller.remove_blocked(&host).await? {
                agent.sync().await?;
                println!("Unblocked {host}");
            } else {
                println!("{host} was not blocked");
            }
        }
        Commands::List => {
            let state = controller.load().await?;
            if state.blocked_hosts.is_empty() {
                println!("No blocked sites");
            }
            for host in &state.blocked_hosts {
                if state.temporarily_unlocked.contains_key(host) {
                    println!("{host} (temporarily unlocked)");
                } else {
                    println!("{host}");
                }
            }
        }
        Commands::Sync => {
            let count = agent.sync().await?;
            println!("{count} rule(s) written to {:?}", agent.synchronizer().engine().path());
        }
        Commands::Watch => {
            info!(rules = ?config.rules_path, "Starting watch");
            agent.watch(shutdown_signal()).await?
        }
        Commands::Unlock { host } => unlock(&agent, &config, &host).await?,
    }

    Ok(())
}
