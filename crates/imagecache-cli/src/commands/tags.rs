use anyhow::Result;
use imagecache_core::extract_tags;
use serde_json::json;

use crate::output::OutputFormat;

pub fn run(prompt: &str, format: OutputFormat) -> Result<()> {
    let tags = extract_tags(prompt);

    format.render(&json!({ "prompt": prompt, "tags": tags }), |_| {
        if tags.is_empty() {
            println!("No tags found.");
        } else {
            println!("{}", tags.iter().cloned().collect::<Vec<_>>().join(", "));
        }
        Ok(())
    })
}
