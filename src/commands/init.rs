use anyhow::{Context, Result};
use scholarship_ingest::config::Config;
use std::path::Path;

const HEADER: &str = r#"# Scholarship Ingest Configuration
#
# Every key is optional; missing keys take the values shown here.
# Per-domain crawl overrides and selector rules go under [scraping.sources]:
#
# [scraping.sources."scholarships.gov.in"]
# delay_ms = 2000
# max_pages = 20
#
# [scraping.sources."scholarships.gov.in".rules]
# item = "div.scheme-card"
# title = "h3"
# amount = ".amount"
# deadline = ".last-date"
# next_page = "a.next"

"#;

/// Write the default configuration to `path`
pub fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let config = Config::default();
    let body = Config::default_toml()?;
    std::fs::write(path, format!("{}{}", HEADER, body))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created configuration file: {}", path.display());
    println!("Data directory: {}", config.storage.data_dir.display());

    Ok(())
}
