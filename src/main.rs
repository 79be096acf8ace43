use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gator::commands::{self, Command, State};
use gator::config::Config;
use gator::db::Database;
use gator::fetcher::FetchContext;

/// Command-line RSS feed aggregator
#[derive(Debug, Parser)]
#[command(name = "gator", version)]
struct Cli {
    /// Config file (defaults to $GATOR_CONFIG or ~/.gatorconfig.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// One of: login, register, reset, users, agg, addfeed
    command: Option<String>,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "gator=warn",
        1 => "gator=info",
        _ => "gator=debug",
    };

    // stdout carries command output, logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let Some(name) = cli.command.as_deref() else {
        eprintln!("Usage: gator <command> [args...]");
        return ExitCode::from(2);
    };

    match execute(&cli, name).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: &Cli, name: &str) -> anyhow::Result<()> {
    let command = Command::parse(name, &cli.args)?;

    // Load configuration
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let mut config = Config::load_or_init(&config_path)?;
    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.db_url = url;
    }
    info!(path = %config_path.display(), user = %config.current_user_name, "Config loaded");

    // Initialize database
    let db = Database::new(&config.db_url)
        .await
        .with_context(|| format!("opening database {}", config.db_url))?;
    db.initialize().await?;

    let timeout = Duration::from_secs(config.fetch_timeout_secs);
    let mut state = State::new(db, config, config_path)?;

    let ctx = FetchContext::with_timeout(timeout);
    let token = ctx.token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            token.cancel();
        }
    });

    let mut stdout = std::io::stdout().lock();
    commands::run(&mut state, command, &ctx, &mut stdout).await?;

    Ok(())
}
