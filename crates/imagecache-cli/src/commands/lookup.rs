use anyhow::Result;
use colored::Colorize;
use imagecache_core::{CacheEntry, ImageRequest, LookupOutcome};
use serde::Serialize;

use crate::cli::LookupArgs;
use crate::output::OutputFormat;
use crate::setup::{CacheContext, Credentials};

#[derive(Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum LookupView<'a> {
    Hit {
        score: f32,
        entry_id: &'a str,
        prompt: &'a str,
        file_reference: String,
        usage_count: u64,
    },
    Miss,
    ProviderUnavailable {
        reason: &'a str,
    },
}

impl<'a> LookupView<'a> {
    fn hit(entry: &'a CacheEntry, score: f32) -> Self {
        LookupView::Hit {
            score,
            entry_id: &entry.id,
            prompt: &entry.prompt,
            file_reference: entry.file_reference.to_string(),
            usage_count: entry.usage_count,
        }
    }
}

pub async fn run(ctx: &CacheContext, args: LookupArgs, format: OutputFormat) -> Result<()> {
    let (manager, _) = ctx.open(Credentials::Required)?;

    let mut request = ImageRequest::new(args.prompt).with_tags(args.tags);
    if args.auto_tags {
        request = request.with_extracted_tags();
    }

    let outcome = manager.lookup(&request).await?;
    let view = match &outcome {
        LookupOutcome::Hit { entry, score } => LookupView::hit(entry, *score),
        LookupOutcome::Miss => LookupView::Miss,
        LookupOutcome::ProviderUnavailable(reason) => LookupView::ProviderUnavailable { reason },
    };

    format.render(&view, |view| {
        match view {
            LookupView::Hit {
                score,
                entry_id,
                prompt,
                file_reference,
                usage_count,
            } => {
                println!("{} (score {:.4})", "Hit".green().bold(), score);
                println!("  entry:  {entry_id}");
                println!("  prompt: {prompt}");
                println!("  file:   {file_reference}");
                println!("  usage:  {usage_count}");
            }
            LookupView::Miss => println!("{}", "Miss".yellow().bold()),
            LookupView::ProviderUnavailable { reason } => {
                println!("{} {}", "Embedding provider unavailable:".red().bold(), reason);
            }
        }
        Ok(())
    })
}
