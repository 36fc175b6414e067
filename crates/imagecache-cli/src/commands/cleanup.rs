use anyhow::Result;

use crate::cli::CleanupArgs;
use crate::output::OutputFormat;
use crate::setup::{CacheContext, Credentials};

pub async fn run(ctx: &CacheContext, args: CleanupArgs, format: OutputFormat) -> Result<()> {
    let (manager, _) = ctx.open(Credentials::NotNeeded)?;
    let min_usage = args.min_usage.unwrap_or(ctx.config.cleanup_min_usage);
    let days_old = args.days_old.unwrap_or(ctx.config.cleanup_days_old);

    let report = manager.cleanup(min_usage, days_old).await?;
    manager.flush_snapshots().await;

    format.render(&report, |report| {
        println!("Cleanup finished (usage <= {min_usage}, age >= {days_old} days):");
        println!("  removed: {}", report.removed_count);
        println!("  file_delete_failures: {}", report.file_delete_failures);
        Ok(())
    })
}
