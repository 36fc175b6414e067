use anyhow::Result;
use comfy_table::{Cell, Table};
use imagecache_core::CacheEntry;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;

use crate::output::OutputFormat;
use crate::output::table::{format_timestamp, short_id, truncate};
use crate::setup::{CacheContext, Credentials};

/// An entry without its embedding.
#[derive(Serialize)]
struct EntrySummary<'a> {
    id: &'a str,
    prompt: &'a str,
    tags: &'a BTreeSet<String>,
    style: Option<&'a str>,
    file_reference: String,
    usage_count: u64,
    created_at: i64,
    last_used_at: Option<i64>,
}

impl<'a> From<&'a CacheEntry> for EntrySummary<'a> {
    fn from(entry: &'a CacheEntry) -> Self {
        Self {
            id: &entry.id,
            prompt: &entry.prompt,
            tags: &entry.tags,
            style: entry.style.as_deref(),
            file_reference: entry.file_reference.to_string(),
            usage_count: entry.usage_count,
            created_at: entry.created_at,
            last_used_at: entry.last_used_at,
        }
    }
}

pub fn list(ctx: &CacheContext, format: OutputFormat) -> Result<()> {
    let (manager, _) = ctx.open(Credentials::NotNeeded)?;
    let entries = manager.list_entries()?;
    let summaries: Vec<EntrySummary<'_>> = entries.iter().map(EntrySummary::from).collect();

    format.render(&summaries, |summaries| {
        if summaries.is_empty() {
            println!("No cached images.");
            return Ok(());
        }

        let mut table = Table::new();
        table.set_header(vec!["ID", "Prompt", "Tags", "Uses", "Created", "Last used"]);
        for summary in summaries {
            let tags = summary.tags.iter().cloned().collect::<Vec<_>>().join(", ");
            table.add_row(vec![
                Cell::new(short_id(summary.id)),
                Cell::new(truncate(summary.prompt, 48)),
                Cell::new(tags),
                Cell::new(summary.usage_count),
                Cell::new(format_timestamp(Some(summary.created_at))),
                Cell::new(format_timestamp(summary.last_used_at)),
            ]);
        }
        println!("{table}");
        Ok(())
    })
}

pub async fn invalidate(ctx: &CacheContext, id: &str, format: OutputFormat) -> Result<()> {
    let (manager, _) = ctx.open(Credentials::NotNeeded)?;
    let removed = manager.invalidate(id).await?;
    manager.flush_snapshots().await;

    format.render(&json!({ "id": id, "removed": removed }), |_| {
        if !removed {
            anyhow::bail!("Entry not found: {id}");
        }
        println!("Removed entry {id}");
        Ok(())
    })
}
