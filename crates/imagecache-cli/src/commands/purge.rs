use anyhow::Result;
use imagecache_core::purge_storage;
use serde_json::json;

use crate::output::OutputFormat;
use crate::setup::CacheContext;

/// Purge without opening the cache, so it also works after the configured
/// embedding dimension changed.
pub async fn run(ctx: &CacheContext, yes: bool, format: OutputFormat) -> Result<()> {
    if !yes {
        anyhow::bail!("Refusing to purge without --yes");
    }

    let storage = ctx.storage()?;
    let file_store = ctx.file_store()?;
    let removed = purge_storage(&storage, file_store.as_ref()).await?;

    format.render(&json!({ "removed": removed }), |_| {
        println!("Purged {removed} entries.");
        Ok(())
    })
}
