pub mod table;

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

/// How command results are printed.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    /// Pretty-printed JSON on stdout, for scripts
    Json,
}

impl OutputFormat {
    /// Print `value` as JSON, or hand it to `text` for the human-readable
    /// rendering.
    pub fn render<T, F>(self, value: &T, text: F) -> Result<()>
    where
        T: Serialize,
        F: FnOnce(&T) -> Result<()>,
    {
        match self {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(value)?);
                Ok(())
            }
            OutputFormat::Text => text(value),
        }
    }
}
