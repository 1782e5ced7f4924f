//! xrtally - operator CLI for the telemetry SDK
//!
//! Subcommands:
//! - `xrtally config` - Print the resolved configuration and where it came from
//! - `xrtally ping --scene <name>` - Run a minimal session against the collector

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tallyconf::TallyConfig;
use xrtally::{telemetry, SessionController};

#[derive(Parser)]
#[command(name = "xrtally")]
#[command(about = "Telemetry SDK tooling")]
#[command(version)]
struct Cli {
    /// Config file used in place of ./xrtally.toml
    #[arg(short, long, env = "XRTALLY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved configuration as TOML
    Config,

    /// Start a session, send one event and end it
    Ping {
        /// Configured scene name to send to
        #[arg(short, long)]
        scene: String,

        /// Name of the test event
        #[arg(long, default_value = "xrtally.ping")]
        event: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = TallyConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Config => {
            for file in &sources.files {
                println!("# loaded {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# env {}", var);
            }
            print!("{}", config.to_toml());
            Ok(())
        }
        Commands::Ping { scene, event } => {
            telemetry::init(&config.telemetry).context("Failed to initialize telemetry")?;
            let result = ping(&config, &scene, &event).await;
            telemetry::shutdown();
            result
        }
    }
}

async fn ping(config: &TallyConfig, scene: &str, event: &str) -> Result<()> {
    if config.find_scene(scene).is_none() {
        bail!("scene '{}' is not configured", scene);
    }

    let sdk = SessionController::new(config);
    sdk.set_scene(scene).await;
    sdk.start_session();
    sdk.custom_event().send(event, [0.0; 3], None);

    let outcome = sdk
        .end_session()
        .await
        .with_context(|| format!("Failed to reach collector at {}", config.network.base_url()))?;

    match outcome.status() {
        Some(status) => println!("collector answered {}", status),
        None => println!("nothing sent: {:?}", outcome),
    }
    Ok(())
}
