use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CortexConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub consolidation: ConsolidationConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    pub default_project: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
}

/// Ranking-fusion weights and candidate limits for hybrid search.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub fts_weight: f64,
    pub vector_weight: f64,
    pub decay_weight: f64,
    pub priority_weight: f64,
    pub overlap_weight: f64,
    pub min_vector_similarity: f64,
    pub default_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub enabled: bool,
    /// Salience at or above which a short-term memory promotes to long-term.
    pub promotion_threshold: f64,
    /// Decayed score below which short-term memories are evicted.
    pub eviction_floor: f64,
    pub light_tick_secs: u64,
    pub medium_tick_secs: u64,
    /// Every Nth light tick persists recomputed decay scores.
    pub persist_every: u32,
    /// Window size for the light-tick decay recompute.
    pub decay_window: usize,
    /// Access window (hours) for predictive early promotion.
    pub predictive_window_hours: i64,
}

impl Default for CortexConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            consolidation: ConsolidationConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8765,
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path().to_string_lossy().into_owned(),
            default_project: None,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_cortex_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            fts_weight: 0.30,
            vector_weight: 0.30,
            decay_weight: 0.25,
            priority_weight: 0.10,
            overlap_weight: 0.05,
            min_vector_similarity: 0.3,
            default_limit: 10,
        }
    }
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            promotion_threshold: 0.7,
            eviction_floor: 0.1,
            light_tick_secs: 60,
            medium_tick_secs: 300,
            persist_every: 5,
            decay_window: 200,
            predictive_window_hours: 24,
        }
    }
}

/// Returns `~/.claude-cortex/`
pub fn default_cortex_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".claude-cortex")
}

/// Default database path, honoring the legacy location.
///
/// New installs use `~/.claude-cortex/memories.db`; an existing
/// `~/.claude-memory/memories.db` is picked up when the new path is absent.
pub fn default_db_path() -> PathBuf {
    let new_path = default_cortex_dir().join("memories.db");
    if new_path.exists() {
        return new_path;
    }
    let legacy = dirs::home_dir()
        .expect("home directory must exist")
        .join(".claude-memory")
        .join("memories.db");
    if legacy.exists() {
        return legacy;
    }
    new_path
}

/// Returns the default config file path: `~/.claude-cortex/config.toml`
pub fn default_config_path() -> PathBuf {
    default_cortex_dir().join("config.toml")
}

impl CortexConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            CortexConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (CLAUDE_MEMORY_DB, CORTEX_PROJECT / CLAUDE_MEMORY_PROJECT, CORTEX_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CLAUDE_MEMORY_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("CORTEX_PROJECT") {
            self.storage.default_project = Some(val);
        } else if let Ok(val) = std::env::var("CLAUDE_MEMORY_PROJECT") {
            self.storage.default_project = Some(val);
        }
        if let Ok(val) = std::env::var("CORTEX_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CortexConfig::default();
        assert_eq!(config.server.log_level, "info");
        assert!(config.storage.db_path.ends_with("memories.db"));
        assert_eq!(config.consolidation.promotion_threshold, 0.7);
        let weight_sum = config.search.fts_weight
            + config.search.vector_weight
            + config.search.decay_weight
            + config.search.priority_weight
            + config.search.overlap_weight;
        assert!((weight_sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"
port = 9000

[storage]
db_path = "/tmp/test.db"
default_project = "myproject"

[consolidation]
promotion_threshold = 0.8
"#;
        let config: CortexConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.storage.default_project.as_deref(), Some("myproject"));
        assert_eq!(config.consolidation.promotion_threshold, 0.8);
        // defaults still apply for unset fields
        assert_eq!(config.consolidation.eviction_floor, 0.1);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = CortexConfig::default();
        std::env::set_var("CLAUDE_MEMORY_DB", "/tmp/override.db");
        std::env::set_var("CORTEX_PROJECT", "env-project");
        std::env::set_var("CORTEX_LOG_LEVEL", "trace");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(
            config.storage.default_project.as_deref(),
            Some("env-project")
        );
        assert_eq!(config.server.log_level, "trace");

        std::env::remove_var("CLAUDE_MEMORY_DB");
        std::env::remove_var("CORTEX_PROJECT");
        std::env::remove_var("CORTEX_LOG_LEVEL");
    }

    #[test]
    fn legacy_project_env_honored() {
        let mut config = CortexConfig::default();
        config.storage.default_project = None;
        std::env::remove_var("CORTEX_PROJECT");
        std::env::set_var("CLAUDE_MEMORY_PROJECT", "legacy-project");

        config.apply_env_overrides();
        assert_eq!(
            config.storage.default_project.as_deref(),
            Some("legacy-project")
        );

        std::env::remove_var("CLAUDE_MEMORY_PROJECT");
    }
}
