use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use discd::config::{CliOverrides, ConfigLoader, DEFAULT_CONFIG_PATH, RipOverrides};
use discd::context;
use discd::core::{EjectMode, Orchestrator};
use discd::logging::{self, LogConfig};

#[derive(Parser)]
#[command(name = "discd")]
#[command(about = "Automatic optical disc ripping daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch optical drives and rip inserted discs
    Daemon(DaemonArgs),
    /// Print the resolved configuration as TOML
    Config,
}

#[derive(Args)]
struct DaemonArgs {
    #[arg(long)]
    video_outdir: Option<PathBuf>,

    #[arg(long)]
    audio_outdir: Option<PathBuf>,

    #[arg(long)]
    poll_timeout_ms: Option<u64>,

    #[arg(long)]
    eject: Option<EjectMode>,

    /// Read simulated disc events from stdin instead of udev
    #[arg(long)]
    simulation: bool,

    #[arg(long, short)]
    verbose: bool,

    #[arg(long)]
    json_logs: bool,
}

impl From<&DaemonArgs> for CliOverrides {
    fn from(args: &DaemonArgs) -> Self {
        let flag = |set: bool| set.then_some(true);
        Self {
            video: RipOverrides {
                outdir: args.video_outdir.clone(),
            },
            audio: RipOverrides {
                outdir: args.audio_outdir.clone(),
            },
            poll_timeout_ms: args.poll_timeout_ms,
            simulation: flag(args.simulation),
            verbose: flag(args.verbose),
            json_logs: flag(args.json_logs),
            eject: args.eject,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides = match &cli.command {
        Commands::Daemon(args) => CliOverrides::from(args),
        Commands::Config => CliOverrides::default(),
    };
    let loader = ConfigLoader::new(cli.config.clone(), overrides);
    let config = loader.load().context("Failed to load configuration")?;

    match &cli.command {
        Commands::Daemon(_) => {
            logging::init(LogConfig::from(&config))?;
            let ctx = context::AppContext::new(config);
            run_daemon(ctx, loader)
                .await
                .context("Failed to run daemon")?
        }
        Commands::Config => print!("{}", config.to_toml()?),
    }

    Ok(())
}

async fn run_daemon(ctx: context::AppContext, loader: ConfigLoader) -> Result<()> {
    Orchestrator::new(ctx, loader).start().await
}
