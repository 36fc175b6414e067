use colored::Colorize;

pub fn handle_error(err: anyhow::Error) -> ! {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    let msg = err.to_string().to_lowercase();

    if msg.contains("environment variable") && msg.contains("not set") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Export your API key, for example:");
        eprintln!("  {} export OPENAI_API_KEY=<value>", "$".dimmed());
    }

    if msg.contains("dimension mismatch") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  The index was built with a different embedding dimension.");
        eprintln!("  Rebuild it from scratch with:");
        eprintln!("  {} imagecache purge --yes", "$".dimmed());
    }

    if msg.contains("connection refused") || msg.contains("request failed") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Check your internet connection and the configured base_url.");
    }

    std::process::exit(1);
}
