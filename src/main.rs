use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use reelsync::cli::{commands, tui};
use reelsync::logging::{self, LogConfig};
use reelsync::simulator::SimulatorServer;
use reelsync::{config, context};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "reelsync")]
#[command(about = "Track video jobs and arrange scenes from the terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll one or more staging jobs until they finish
    Watch {
        #[arg(required = true)]
        job_ids: Vec<String>,
    },
    /// Wait until a video-creation submission is accepted
    AwaitSubmission { submission_id: String },
    /// Start a job on the backend and print its id
    CreateJob {
        #[arg(long, default_value_t = 10)]
        total: u32,
    },
    /// List or reorder the scenes of a video
    #[command(subcommand)]
    Scenes(SceneCommands),
    /// Interactive job progress and scene editor
    Editor {
        video_id: String,
        /// Track this job first, then open the scenes when it completes
        #[arg(long)]
        job: Option<String>,
    },
    /// Print the anonymous visitor id, creating it on first use
    VisitorId,
    /// Serve a local stand-in for the backend
    Simulate(SimulateArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Subcommand)]
enum SceneCommands {
    List {
        video_id: String,
    },
    /// Move the scene at FROM to position TO (zero-based)
    Move {
        video_id: String,
        from: usize,
        to: usize,
    },
}

#[derive(Args, Serialize)]
struct GlobalArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    api_base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    api_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    database_path: Option<PathBuf>,

    /// Seconds between staging job status checks
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    staging_poll_interval_secs: Option<u64>,

    /// Seconds between submission status checks
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    submission_poll_interval_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    json_logs: Option<bool>,

    #[serde(skip_serializing_if = "SimulateArgs::is_empty")]
    #[arg(skip)]
    simulator: SimulateArgs,
}

#[derive(Args, Serialize, Clone, Default)]
struct SimulateArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Answer every Nth status request with a 503
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    fail_every: Option<u32>,
}

impl SimulateArgs {
    fn is_empty(&self) -> bool {
        self.bind.is_none() && self.fail_every.is_none()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    if let Commands::Simulate(args) = &cli.command {
        cli.global.simulator = args.clone();
    }
    let config = config::AppConfig::new(Some(&cli.global))?;

    logging::init(LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
        quiet: matches!(cli.command, Commands::Editor { .. }),
    });

    match cli.command {
        Commands::Config => print!("{}", config.to_toml()?),
        Commands::Simulate(_) => commands::simulate(SimulatorServer::new(config.simulator))
            .await
            .context("Backend simulator failed")?,
        command => run_command(context::AppContext::new(config)?, command).await?,
    }

    Ok(())
}

async fn run_command(ctx: context::AppContext, command: Commands) -> Result<()> {
    match command {
        Commands::Watch { job_ids } => commands::watch(ctx, job_ids).await,
        Commands::AwaitSubmission { submission_id } => {
            commands::await_submission(ctx, submission_id).await
        }
        Commands::CreateJob { total } => commands::create_job(ctx, total).await,
        Commands::Scenes(SceneCommands::List { video_id }) => {
            commands::list_scenes(ctx, video_id).await
        }
        Commands::Scenes(SceneCommands::Move { video_id, from, to }) => {
            commands::move_scene(ctx, video_id, from, to).await
        }
        Commands::Editor { video_id, job } => tui::run(ctx, video_id, job)
            .await
            .context("Editor exited with an error"),
        Commands::VisitorId => commands::visitor_id(ctx).await,
        Commands::Simulate(_) | Commands::Config => Ok(()),
    }
}
