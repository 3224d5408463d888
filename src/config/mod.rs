//! Configuration management.
//!
//! Settings are layered: built-in defaults, then a TOML file, then
//! `RESEARCH_AGGREGATOR__*` environment variables (double underscore separates
//! nesting, e.g. `RESEARCH_AGGREGATOR__CACHE__CAPACITY=100`), then the well-known
//! variables `ACADEMIC_CONTACT_EMAIL` / `OPENALEX_EMAIL` and
//! `SEMANTIC_SCHOLAR_API_KEY`.

mod file_config;

pub use file_config::{
    default_config_path, find_config_file, init_config_file, load_from_file, save_to_file,
    ConfigFileError, CONFIG_FILE_NAME,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::models::SourceKind;
use crate::sources::Operation;
use crate::utils::{LimitMode, RateSpec, RetryConfig};

/// Prefix for structured environment overrides
pub const ENV_PREFIX: &str = "RESEARCH_AGGREGATOR";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Polite-pool contact details
    #[serde(default)]
    pub contact: ContactConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeys,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub aggregator: AggregatorSettings,

    /// Rate limiting and retry defaults
    #[serde(default)]
    pub governor: GovernorConfig,

    /// Per-source overrides
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceSettings>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Contact details sent to OpenAlex and CrossRef for their polite pools
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactConfig {
    #[serde(default)]
    pub email: Option<String>,
}

/// API keys for external services
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiKeys {
    /// Semantic Scholar API key (optional, for higher rate limits)
    #[serde(default)]
    pub semantic_scholar: Option<String>,
}

/// Response cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of entries; 0 means unbounded
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default = "default_search_ttl")]
    pub search_ttl_seconds: u64,

    #[serde(default = "default_details_ttl")]
    pub details_ttl_seconds: u64,

    #[serde(default = "default_bibtex_ttl")]
    pub bibtex_ttl_seconds: u64,

    #[serde(default = "default_citations_ttl")]
    pub citations_ttl_seconds: u64,

    /// TTL overrides keyed by source id (`openalex`, `dblp`, ...)
    #[serde(default)]
    pub source_ttl_seconds: BTreeMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_capacity(),
            search_ttl_seconds: default_search_ttl(),
            details_ttl_seconds: default_details_ttl(),
            bibtex_ttl_seconds: default_bibtex_ttl(),
            citations_ttl_seconds: default_citations_ttl(),
            source_ttl_seconds: BTreeMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_capacity() -> usize {
    5000
}

fn default_search_ttl() -> u64 {
    600 // 10 minutes
}

fn default_details_ttl() -> u64 {
    3600
}

fn default_bibtex_ttl() -> u64 {
    86400 // 1 day
}

fn default_citations_ttl() -> u64 {
    3600
}

/// Fan-out timeouts and merge ordering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorSettings {
    #[serde(default = "default_source_timeout")]
    pub source_timeout_seconds: u64,

    #[serde(default = "default_overall_timeout")]
    pub overall_timeout_seconds: u64,

    /// Tie-break order for merged results; unlisted sources follow in default order
    #[serde(default = "default_priority")]
    pub source_priority: Vec<String>,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            source_timeout_seconds: default_source_timeout(),
            overall_timeout_seconds: default_overall_timeout(),
            source_priority: default_priority(),
        }
    }
}

fn default_source_timeout() -> u64 {
    10
}

fn default_overall_timeout() -> u64 {
    15
}

fn default_priority() -> Vec<String> {
    SourceKind::ALL.iter().map(|k| k.id().to_string()).collect()
}

/// Rate limiting and retry defaults shared by every source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// `block` waits for a token, `fail_fast` returns a rate-limit error
    #[serde(default)]
    pub mode: LimitMode,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            mode: LimitMode::default(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_base_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    3
}

/// Overrides for a single source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Source id (`openalex`, `dblp`, `crossref`, `semantic`, `arxiv`)
    pub id: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Rate override: `requests` per `per_seconds`
    #[serde(default)]
    pub requests: Option<u32>,

    #[serde(default)]
    pub per_seconds: Option<u64>,

    /// API base URL override (mirrors, test servers)
    #[serde(default)]
    pub base_url: Option<String>,
}

impl SourceSettings {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            id: kind.id().to_string(),
            enabled: true,
            timeout_seconds: None,
            max_attempts: None,
            requests: None,
            per_seconds: None,
            base_url: None,
        }
    }

    pub fn disabled(kind: SourceKind) -> Self {
        Self {
            enabled: false,
            ..Self::new(kind)
        }
    }

    fn kind(&self) -> Option<SourceKind> {
        self.id.parse().ok()
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `text` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Overrides for a source, if configured
    pub fn source(&self, kind: SourceKind) -> Option<&SourceSettings> {
        self.sources.iter().find(|s| s.kind() == Some(kind))
    }

    /// Sources are enabled unless a `[[sources]]` entry says otherwise
    pub fn is_source_enabled(&self, kind: SourceKind) -> bool {
        self.source(kind).map(|s| s.enabled).unwrap_or(true)
    }

    /// Resolved tie-break order; always lists every catalog exactly once
    pub fn source_priority(&self) -> Vec<SourceKind> {
        let mut order = Vec::with_capacity(SourceKind::ALL.len());
        for id in &self.aggregator.source_priority {
            match id.parse::<SourceKind>() {
                Ok(kind) if !order.contains(&kind) => order.push(kind),
                Ok(_) => {}
                Err(e) => tracing::warn!("Ignoring source_priority entry: {}", e),
            }
        }
        for kind in SourceKind::ALL {
            if !order.contains(&kind) {
                order.push(kind);
            }
        }
        order
    }

    /// Cache TTL for an operation on a source
    pub fn cache_ttl(&self, kind: SourceKind, operation: Operation) -> Duration {
        if let Some(seconds) = self.cache.source_ttl_seconds.get(kind.id()) {
            return Duration::from_secs(*seconds);
        }
        let seconds = match operation {
            Operation::Search | Operation::AuthorSearch | Operation::Related => {
                self.cache.search_ttl_seconds
            }
            Operation::Details => self.cache.details_ttl_seconds,
            Operation::Bibtex => self.cache.bibtex_ttl_seconds,
            Operation::Citations | Operation::References => self.cache.citations_ttl_seconds,
        };
        Duration::from_secs(seconds)
    }

    /// Per-call timeout for a source
    pub fn source_timeout(&self, kind: SourceKind) -> Duration {
        let seconds = self
            .source(kind)
            .and_then(|s| s.timeout_seconds)
            .unwrap_or(self.aggregator.source_timeout_seconds);
        Duration::from_secs(seconds.max(1))
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.aggregator.overall_timeout_seconds.max(1))
    }

    /// Published rate for a source, or the configured override
    pub fn rate_for(&self, kind: SourceKind) -> RateSpec {
        let default = RateSpec::default_for(kind, self.api_keys.semantic_scholar.is_some());
        match self.source(kind) {
            Some(settings) => RateSpec {
                requests: settings.requests.unwrap_or(default.requests),
                per: settings
                    .per_seconds
                    .map(Duration::from_secs)
                    .unwrap_or(default.per),
            },
            None => default,
        }
    }

    /// Retry policy for a source
    pub fn retry_for(&self, kind: SourceKind) -> RetryConfig {
        RetryConfig {
            max_attempts: self
                .source(kind)
                .and_then(|s| s.max_attempts)
                .unwrap_or(self.governor.max_attempts)
                .max(1),
            initial_delay: Duration::from_millis(self.governor.base_delay_ms),
            max_delay: Duration::from_millis(self.governor.max_delay_ms),
            ..RetryConfig::default()
        }
    }

    /// Apply the well-known environment variables on top of this config
    pub fn with_env_overrides(mut self) -> Self {
        let email = std::env::var("ACADEMIC_CONTACT_EMAIL")
            .or_else(|_| std::env::var("OPENALEX_EMAIL"))
            .ok()
            .filter(|v| !v.trim().is_empty());
        if email.is_some() {
            self.contact.email = email;
        }

        if let Some(key) = std::env::var("SEMANTIC_SCHOLAR_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            self.api_keys.semantic_scholar = Some(key);
        }
        self
    }
}

/// Load configuration from an optional file plus environment overrides
pub fn load_config(path: Option<&Path>) -> Result<Config, config::ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config: Config = settings.try_deserialize()?;
    Ok(config.with_env_overrides())
}

/// Get the configuration from the discovered config file, env vars or defaults
pub fn get_config() -> Result<Config, config::ConfigError> {
    let path = find_config_file();
    load_config(path.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.capacity, 5000);
        assert_eq!(config.aggregator.source_timeout_seconds, 10);
        assert_eq!(config.aggregator.overall_timeout_seconds, 15);
        assert_eq!(config.source_priority(), SourceKind::ALL.to_vec());
    }

    #[test]
    fn test_partial_priority_is_completed() {
        let mut config = Config::default();
        config.aggregator.source_priority =
            vec!["arxiv".to_string(), "bogus".to_string(), "arxiv".to_string()];

        assert_eq!(
            config.source_priority(),
            vec![
                SourceKind::Arxiv,
                SourceKind::OpenAlex,
                SourceKind::Dblp,
                SourceKind::CrossRef,
                SourceKind::SemanticScholar,
            ]
        );
    }

    #[test]
    fn test_cache_ttls() {
        let mut config = Config::default();
        assert_eq!(
            config.cache_ttl(SourceKind::Dblp, Operation::Search),
            Duration::from_secs(600)
        );
        assert_eq!(
            config.cache_ttl(SourceKind::Dblp, Operation::Bibtex),
            Duration::from_secs(86400)
        );

        config.cache.source_ttl_seconds.insert("dblp".to_string(), 5);
        assert_eq!(
            config.cache_ttl(SourceKind::Dblp, Operation::Bibtex),
            Duration::from_secs(5)
        );
        assert_eq!(
            config.cache_ttl(SourceKind::CrossRef, Operation::Details),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn test_source_overrides() {
        let mut config = Config::default();
        let mut settings = SourceSettings::new(SourceKind::SemanticScholar);
        settings.timeout_seconds = Some(3);
        settings.max_attempts = Some(5);
        settings.requests = Some(20);
        config.sources.push(settings);

        assert_eq!(config.source_timeout(SourceKind::SemanticScholar), Duration::from_secs(3));
        assert_eq!(config.source_timeout(SourceKind::Arxiv), Duration::from_secs(10));
        assert_eq!(config.retry_for(SourceKind::SemanticScholar).max_attempts, 5);
        assert_eq!(config.retry_for(SourceKind::Arxiv).max_attempts, 3);

        let rate = config.rate_for(SourceKind::SemanticScholar);
        assert_eq!(rate.requests, 20);
        assert_eq!(rate.per, Duration::from_secs(300));
    }

    #[test]
    fn test_semantic_rate_depends_on_key() {
        let mut config = Config::default();
        let keyless = config.rate_for(SourceKind::SemanticScholar);
        assert_eq!((keyless.requests, keyless.per), (100, Duration::from_secs(300)));

        config.api_keys.semantic_scholar = Some("key".to_string());
        let keyed = config.rate_for(SourceKind::SemanticScholar);
        assert_eq!((keyed.requests, keyed.per), (1, Duration::from_secs(1)));
    }
}
