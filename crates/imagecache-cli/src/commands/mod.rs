pub mod cleanup;
pub mod entries;
pub mod lookup;
pub mod purge;
pub mod resolve;
pub mod stats;
pub mod tags;

use anyhow::Result;

use crate::cli::{Cli, Commands};
use crate::setup::CacheContext;

pub async fn run(cli: Cli) -> Result<()> {
    let format = cli.format;

    if let Commands::Tags { prompt } = &cli.command {
        return tags::run(prompt, format);
    }

    let ctx = CacheContext::load(&cli)?;
    match cli.command {
        Commands::Resolve(args) => resolve::run(&ctx, args, format).await,
        Commands::Lookup(args) => lookup::run(&ctx, args, format).await,
        Commands::Stats => stats::run(&ctx, format),
        Commands::Cleanup(args) => cleanup::run(&ctx, args, format).await,
        Commands::Invalidate { id } => entries::invalidate(&ctx, &id, format).await,
        Commands::List => entries::list(&ctx, format),
        Commands::Purge { yes } => purge::run(&ctx, yes, format).await,
        Commands::Tags { .. } => Ok(()),
    }
}
