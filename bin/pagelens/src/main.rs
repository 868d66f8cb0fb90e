mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pagelens")]
#[command(about = "LLM web browsing over accessibility outlines", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.pagelens/config.json)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a browse task with the configured model
    Run {
        /// What the agent should accomplish
        task: String,

        /// URL to start from
        #[arg(short, long)]
        url: String,

        /// Model override (e.g. "anthropic/claude-sonnet-4-20250514")
        #[arg(short, long)]
        model: Option<String>,

        /// Step budget override
        #[arg(long)]
        max_steps: Option<u32>,

        /// Launch a visible browser window
        #[arg(long)]
        headed: bool,

        /// Print the step log as JSON when done
        #[arg(long)]
        json: bool,
    },

    /// Print the outline of one URL and exit
    Snapshot {
        url: String,

        /// Skip the reducer pipeline (raw ref-tagged outline)
        #[arg(long)]
        raw: bool,

        /// Keep only ref-carrying lines and their ancestors
        #[arg(long)]
        interactive_only: bool,
    },

    /// Report which browser binaries and API keys are available
    Doctor,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let result = match cli.command {
        Commands::Run {
            task,
            url,
            model,
            max_steps,
            headed,
            json,
        } => commands::run_task(cli.config.as_deref(), &task, &url, model, max_steps, headed, json).await,
        Commands::Snapshot {
            url,
            raw,
            interactive_only,
        } => commands::snapshot_page(cli.config.as_deref(), &url, raw, interactive_only).await,
        Commands::Doctor => commands::doctor(cli.config.as_deref()),
    };

    if let Err(err) = result {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}
