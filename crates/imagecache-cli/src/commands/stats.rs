use anyhow::Result;

use crate::output::OutputFormat;
use crate::setup::{CacheContext, Credentials};

pub fn run(ctx: &CacheContext, format: OutputFormat) -> Result<()> {
    let (manager, _) = ctx.open(Credentials::NotNeeded)?;
    let stats = manager.stats()?;

    format.render(&stats, |stats| {
        println!("Cache statistics:");
        println!("  total_entries: {}", stats.total_entries);
        println!("  total_usage: {}", stats.total_usage);
        println!("  index_size: {}", stats.index_size);
        println!("  dimension: {}", manager.config().dimension);
        println!("  threshold: {}", manager.config().similarity_threshold);
        Ok(())
    })
}
