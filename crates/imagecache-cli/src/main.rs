mod cli;
mod commands;
mod error;
mod output;
mod setup;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(&cli);

    if let Err(err) = commands::run(cli).await {
        error::handle_error(err);
    }
    Ok(())
}

/// Log to stderr, or to a daily rolling file when `--log-dir` is given.
fn init_logging(cli: &Cli) -> Option<WorkerGuard> {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match &cli.log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir).ok();
            let file_appender = tracing_appender::rolling::daily(log_dir, "imagecache.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .with_level(true)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
            None
        }
    }
}
