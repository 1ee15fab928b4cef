//! Configuration for the ingestion daemon

mod daemon;
mod logging;
mod pipeline;
mod scraping;

pub use daemon::{HttpConfig, MetricsConfig, SchedulerConfig, StorageConfig};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use pipeline::{
    ClassifierConfig, DedupConfig, ExtractionConfig, NormalizeConfig, TrustScores,
    ValidationConfig,
};
pub use scraping::{ScrapingConfig, SelectorRules, SourceConfig};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default user agent for all HTTP requests (page fetches, robots.txt, liveness)
pub const DEFAULT_USER_AGENT: &str = "ShikshaSetu-Bot/1.0 (+https://shikshasetu.in/bot)";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scraping: ScrapingConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Default configuration rendered as TOML, for `init-config`
    pub fn default_toml() -> Result<String> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }

    /// Validate all configuration fields.
    ///
    /// Collects all validation errors and reports them together.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // Scraping validation
        if self.scraping.user_agent.trim().is_empty() {
            errors.push("user_agent must not be empty".to_string());
        }
        if self.scraping.request_timeout_secs == 0 {
            errors.push("request_timeout_secs must be positive".to_string());
        }
        if self.scraping.max_pages == 0 {
            errors.push("max_pages must be positive".to_string());
        }
        if self.scraping.max_concurrent_per_domain == 0 {
            errors.push("max_concurrent_per_domain must be positive".to_string());
        }
        for (domain, source) in &self.scraping.sources {
            if source.max_concurrent == Some(0) {
                errors.push(format!("sources.{}.max_concurrent must be positive", domain));
            }
            if let Some(rules) = &source.rules {
                if rules.item.trim().is_empty() || rules.title.trim().is_empty() {
                    errors.push(format!(
                        "sources.{}.rules needs both an item and a title selector",
                        domain
                    ));
                }
            }
        }

        // Normalization validation
        if self.normalize.date_formats.is_empty() {
            errors.push("date_formats must not be empty".to_string());
        }
        if self.normalize.min_amount > self.normalize.max_amount {
            errors.push("min_amount must not exceed max_amount".to_string());
        }

        // Validation thresholds
        let scores = &self.validation.trust_scores;
        for (name, value) in [
            ("trusted", scores.trusted),
            ("neutral", scores.neutral),
            ("suspicious", scores.suspicious),
            ("min_trust_score", self.validation.min_trust_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(format!("{} trust score must be between 0.0 and 1.0", name));
            }
        }
        if self.validation.check_timeout_secs == 0 {
            errors.push("check_timeout_secs must be positive".to_string());
        }

        // Dedup validation
        if !(0.0..=1.0).contains(&self.dedup.similarity_threshold) {
            errors.push("similarity_threshold must be between 0.0 and 1.0".to_string());
        }

        // Scheduler validation
        if self.scheduler.workers == 0 {
            errors.push("workers must be positive".to_string());
        }
        if self.scheduler.retry_base_delay_secs > self.scheduler.retry_max_delay_secs {
            errors.push("retry_base_delay_secs must not exceed retry_max_delay_secs".to_string());
        }
        if self.scheduler.stuck_threshold_secs == 0 {
            errors.push("stuck_threshold_secs must be positive".to_string());
        }

        // HTTP config validation
        if self.http.enabled && !self.http.listen_addr.is_empty() {
            if let Some(port_str) = self.http.listen_addr.rsplit(':').next() {
                if let Ok(port) = port_str.parse::<u32>() {
                    if port == 0 || port > 65535 {
                        errors.push(format!(
                            "HTTP listen port must be between 1 and 65535, got {}",
                            port
                        ));
                    }
                }
            }
        }

        // Storage validation
        if self.storage.data_dir.as_os_str().is_empty() {
            errors.push("data_dir must not be empty".to_string());
        }
        if self.storage.flush_interval_ms == 0 {
            errors.push("flush_interval_ms must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    // ========================================================================
    // Helper: build a valid default config for mutation-based testing
    // ========================================================================

    fn valid_config() -> Config {
        Config::default()
    }

    // ========================================================================
    // Config::validate – happy path
    // ========================================================================

    #[test]
    fn default_config_passes_validation() {
        let cfg = valid_config();
        assert!(cfg.validate().is_ok(), "default config should be valid");
    }

    // ========================================================================
    // Config::validate – individual errors
    // ========================================================================

    #[test]
    fn validate_rejects_zero_workers() {
        let mut cfg = valid_config();
        cfg.scheduler.workers = 0;
        let err = cfg.validate().unwrap_err();
        assert!(
            err.to_string().contains("workers must be positive"),
            "unexpected error message: {}",
            err
        );
    }

    #[test]
    fn validate_rejects_similarity_threshold_out_of_range() {
        let mut cfg = valid_config();
        cfg.dedup.similarity_threshold = 1.5;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("similarity_threshold must be between 0.0 and 1.0"));
    }

    #[test]
    fn validate_rejects_bad_trust_score() {
        let mut cfg = valid_config();
        cfg.validation.trust_scores.neutral = -0.2;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("neutral trust score"));
    }

    #[test]
    fn validate_rejects_inverted_amount_bounds() {
        let mut cfg = valid_config();
        cfg.normalize.min_amount = 10;
        cfg.normalize.max_amount = 5;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("min_amount must not exceed max_amount"));
    }

    #[test]
    fn validate_rejects_source_rules_without_item_selector() {
        let mut cfg = valid_config();
        cfg.scraping.sources.insert(
            "example.org".to_string(),
            SourceConfig {
                rules: Some(SelectorRules {
                    title: "h3".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("sources.example.org.rules"));
    }

    #[test]
    fn validate_rejects_http_port_zero() {
        let mut cfg = valid_config();
        cfg.http.enabled = true;
        cfg.http.listen_addr = "0.0.0.0:0".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("HTTP listen port must be between 1 and 65535"));
    }

    #[test]
    fn validate_skips_http_port_check_when_disabled() {
        let mut cfg = valid_config();
        cfg.http.enabled = false;
        cfg.http.listen_addr = "0.0.0.0:0".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_data_dir() {
        let mut cfg = valid_config();
        cfg.storage.data_dir = PathBuf::from("");
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("data_dir must not be empty"));
    }

    #[test]
    fn validate_rejects_zero_flush_interval() {
        let mut cfg = valid_config();
        cfg.storage.flush_interval_ms = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("flush_interval_ms must be positive"));
    }

    // ========================================================================
    // Config::validate – multiple errors collected
    // ========================================================================

    #[test]
    fn validate_collects_multiple_errors() {
        let mut cfg = valid_config();
        cfg.scheduler.workers = 0;
        cfg.scraping.max_pages = 0;
        cfg.normalize.date_formats.clear();
        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("workers must be positive"));
        assert!(msg.contains("max_pages must be positive"));
        assert!(msg.contains("date_formats must not be empty"));
    }

    // ========================================================================
    // Loading and per-source lookups
    // ========================================================================

    #[test]
    fn load_reads_partial_toml_with_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[scheduler]
workers = 2
max_retries = 1

[dedup]
similarity_threshold = 0.9

[scraping.sources."scholarships.gov.in"]
delay_ms = 5000
max_concurrent = 1
"#,
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.scheduler.workers, 2);
        assert_eq!(cfg.scheduler.max_retries, 1);
        assert_eq!(cfg.scheduler.stuck_threshold_secs, 7200);
        assert!((cfg.dedup.similarity_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(cfg.scraping.delay_ms_for("scholarships.gov.in"), 5000);
        assert_eq!(cfg.scraping.max_concurrent_for("scholarships.gov.in"), 1);
        assert_eq!(cfg.scraping.delay_ms_for("other.org"), 2000);
    }

    #[test]
    fn source_lookup_matches_subdomains() {
        let mut cfg = valid_config();
        cfg.scraping.sources.insert(
            "ugc.ac.in".to_string(),
            SourceConfig {
                max_pages: Some(3),
                ..Default::default()
            },
        );
        assert_eq!(cfg.scraping.max_pages_for("www.ugc.ac.in"), 3);
        assert_eq!(cfg.scraping.max_pages_for("notugc.ac.in"), 10);
    }

    #[test]
    fn default_toml_round_trips_through_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, Config::default_toml().unwrap()).unwrap();
        assert!(Config::load(&path).is_ok());
    }

    #[test]
    fn load_or_default_without_file() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = Config::load_or_default(&tmp.path().join("missing.toml")).unwrap();
        assert_eq!(cfg.scheduler.workers, 5);
    }
}
