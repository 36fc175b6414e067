use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "imagecache")]
#[command(version, about = "imagecache - reuse generated images for semantically similar prompts")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Cache directory (defaults to ~/.imagecache)
    #[arg(long, global = true, env = "IMAGECACHE_DIR")]
    pub dir: Option<PathBuf>,

    /// Config file (defaults to <dir>/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Write logs to a daily rolling file in this directory instead of stderr
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Return a cached image for a prompt, generating one on a miss
    Resolve(ResolveArgs),

    /// Check whether a prompt would hit the cache, without recording usage
    Lookup(LookupArgs),

    /// Show cache statistics
    Stats,

    /// Remove rarely used old entries
    Cleanup(CleanupArgs),

    /// Remove one entry and its image
    Invalidate {
        /// Entry ID
        id: String,
    },

    /// List cached entries
    List,

    /// Show the tags extracted from a prompt
    Tags {
        prompt: String,
    },

    /// Delete every entry, image and the index (needed after a dimension change)
    Purge {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args)]
pub struct ResolveArgs {
    pub prompt: String,

    /// Tag to match on (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Style passed to the image generator
    #[arg(long)]
    pub style: Option<String>,

    /// Add tags extracted from the prompt
    #[arg(long)]
    pub auto_tags: bool,
}

#[derive(Args)]
pub struct LookupArgs {
    pub prompt: String,

    /// Tag to match on (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Add tags extracted from the prompt
    #[arg(long)]
    pub auto_tags: bool,
}

#[derive(Args)]
pub struct CleanupArgs {
    /// Remove entries used at most this many times (defaults to config)
    #[arg(long)]
    pub min_usage: Option<u64>,

    /// Remove entries at least this many days old (defaults to config)
    #[arg(long)]
    pub days_old: Option<u32>,
}
