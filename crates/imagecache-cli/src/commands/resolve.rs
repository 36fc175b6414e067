use anyhow::Result;
use colored::Colorize;
use imagecache_core::{FileStore, ImageRequest, ImageSource, LocalFileStore};
use serde_json::json;

use crate::cli::ResolveArgs;
use crate::output::OutputFormat;
use crate::setup::{CacheContext, Credentials};

pub async fn run(ctx: &CacheContext, args: ResolveArgs, format: OutputFormat) -> Result<()> {
    let (manager, file_store) = ctx.open(Credentials::Required)?;

    let mut request = ImageRequest::new(args.prompt).with_tags(args.tags);
    if args.auto_tags {
        request = request.with_extracted_tags();
    }
    if let Some(style) = args.style {
        request = request.with_style(style);
    }

    let result = manager.resolve(&request).await?;
    manager.flush_snapshots().await;
    let path = display_path(&file_store, &result.file_reference).await;

    let view = json!({
        "source": result.source,
        "entry_id": result.entry_id,
        "score": result.score,
        "file_reference": result.file_reference,
        "path": path,
        "tags": request.tags,
    });

    format.render(&view, |_| {
        let source = match result.source {
            ImageSource::Hit => "hit".green().bold(),
            ImageSource::Generated => "generated".yellow().bold(),
        };
        println!("Source: {source}");
        match &result.entry_id {
            Some(id) => println!("Entry:  {id}"),
            None => println!("Entry:  {}", "(not cached)".dimmed()),
        }
        if let Some(score) = result.score {
            println!("Score:  {score:.4}");
        }
        println!("File:   {path}");
        Ok(())
    })
}

async fn display_path(
    store: &LocalFileStore,
    reference: &imagecache_core::FileReference,
) -> String {
    match store.path_of(reference) {
        Ok(path) if store.exists(reference).await.unwrap_or(false) => {
            path.display().to_string()
        }
        _ => reference.to_string(),
    }
}
