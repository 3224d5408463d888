//! Configuration file support.
//!
//! # Configuration File Format
//!
//! ```toml
//! [contact]
//! email = "you@example.org"
//!
//! [api_keys]
//! semantic_scholar = "your-api-key"
//!
//! [cache]
//! enabled = true
//! capacity = 5000
//! search_ttl_seconds = 600
//! details_ttl_seconds = 3600
//! bibtex_ttl_seconds = 86400
//! citations_ttl_seconds = 3600
//!
//! [cache.source_ttl_seconds]
//! arxiv = 1800
//!
//! [aggregator]
//! source_timeout_seconds = 10
//! overall_timeout_seconds = 15
//! source_priority = ["openalex", "dblp", "crossref", "semantic", "arxiv"]
//!
//! [governor]
//! mode = "block"
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! max_attempts = 3
//!
//! [[sources]]
//! id = "semantic"
//! timeout_seconds = 5
//! requests = 1
//! per_seconds = 1
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```

use std::path::{Path, PathBuf};

use super::Config;

/// File name looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "research-aggregator.toml";

const TEMPLATE_HEADER: &str = "\
# research-aggregator configuration
#
# Every value below is the built-in default. Environment variables prefixed with
# RESEARCH_AGGREGATOR__ override this file (e.g. RESEARCH_AGGREGATOR__CACHE__CAPACITY=100).
# ACADEMIC_CONTACT_EMAIL and SEMANTIC_SCHOLAR_API_KEY are also honored.
#
# Per-source overrides use [[sources]] tables:
#
# [[sources]]
# id = \"semantic\"
# enabled = true
# timeout_seconds = 5
# max_attempts = 3
# requests = 1
# per_seconds = 1

";

/// Load configuration from a TOML file (no environment layering)
pub fn load_from_file(path: &Path) -> Result<Config, ConfigFileError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io(e.to_string()))?;

    toml::from_str(&content).map_err(|e| ConfigFileError::Parse(e.to_string()))
}

/// Save configuration to a TOML file
pub fn save_to_file(config: &Config, path: &Path) -> Result<(), ConfigFileError> {
    let body =
        toml::to_string_pretty(config).map_err(|e| ConfigFileError::Serialize(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigFileError::Io(e.to_string()))?;
    }
    std::fs::write(path, format!("{}{}", TEMPLATE_HEADER, body))
        .map_err(|e| ConfigFileError::Io(e.to_string()))
}

/// Write a default configuration file, refusing to overwrite unless `force` is set
pub fn init_config_file(path: &Path, force: bool) -> Result<(), ConfigFileError> {
    if path.exists() && !force {
        return Err(ConfigFileError::AlreadyExists(path.to_path_buf()));
    }
    save_to_file(&Config::default(), path)
}

/// Per-user configuration file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("research-aggregator")
        .join("config.toml")
}

/// Find a config file in the working directory, then the user config directory
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }

    let user = default_config_path();
    if user.is_file() {
        return Some(user);
    }

    None
}

/// Configuration file errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Config file already exists: {} (use --force to overwrite)", .0.display())]
    AlreadyExists(PathBuf),
}
