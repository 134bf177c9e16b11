//! Configuration management for evidx
//!
//! Configuration is a TOML file with one table per subsystem. A missing file
//! means defaults; `EVIDX_SECTION__KEY` environment variables override
//! individual values after loading.

use crate::embedding::{ProviderKind, RetryPolicy};
use crate::error::{EvidxError, Result};
use crate::storage::StoreOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Evidence store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub pool_size: u32,
    /// Register the cosine distance SQL function on every connection
    pub vector_functions: bool,
    /// Build and maintain the FTS5 index
    pub full_text: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("~/.evidx/evidence.sqlite"),
            pool_size: 8,
            vector_functions: true,
            full_text: true,
        }
    }
}

impl StorageConfig {
    /// `database_path` with a leading `~` expanded
    pub fn resolved_database_path(&self) -> Result<PathBuf> {
        expand_home(&self.database_path)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            pool_size: self.pool_size,
            vector_functions: self.vector_functions,
            full_text: self.full_text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    Word,
    Huggingface,
}

/// Chunking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chunk_tokens: usize,
    pub chunk_overlap: usize,
    pub tokenizer: TokenizerKind,
    /// tokenizer.json when `tokenizer = "huggingface"`
    pub tokenizer_path: PathBuf,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: crate::chunking::DEFAULT_MAX_CHUNK_TOKENS,
            chunk_overlap: crate::chunking::DEFAULT_CHUNK_OVERLAP,
            tokenizer: TokenizerKind::Word,
            tokenizer_path: PathBuf::new(),
        }
    }
}

/// Embedding provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    /// Provider default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Provider default for the model when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    /// Environment variable holding the API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Override for OpenAI-compatible endpoints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: None,
            dimension: None,
            api_key_env: None,
            base_url: None,
            batch_size: 100,
            max_concurrent_batches: 4,
            max_retries: 3,
            retry_base_delay_ms: 500,
            request_timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn effective_model(&self) -> String {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.provider.default_model())
            .to_string()
    }

    pub fn effective_dimension(&self) -> usize {
        self.dimension
            .unwrap_or_else(|| self.provider.default_dimension(&self.effective_model()))
    }

    /// Configured key variable, or the provider's conventional one
    pub fn api_key_env_name(&self) -> Option<&str> {
        self.api_key_env
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| self.provider.default_api_key_env())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }
}

/// Hybrid search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub rrf_k: f64,
    /// Each sub-search fetches `k * overfetch_factor` candidates before fusion
    pub overfetch_factor: usize,
    /// Shared deadline for both sub-searches of one query
    pub sub_search_timeout_ms: u64,
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rrf_k: crate::retrieval::DEFAULT_RRF_K,
            overfetch_factor: 2,
            sub_search_timeout_ms: 5000,
            default_limit: 10,
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_dimension: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_search_timeout_ms: Option<u64>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EvidxError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| EvidxError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        tracing::debug!("No config at {:?}, using defaults", path);
        let mut config = Config::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Save configuration to a file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EvidxError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| EvidxError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Write a default configuration unless one exists and `force` is false
    pub fn init(path: &Path, force: bool) -> Result<Self> {
        if path.exists() && !force {
            return Err(EvidxError::Config(format!(
                "Config file already exists at {:?} (use --force to overwrite)",
                path
            )));
        }

        let config = Config::default();
        config.save(path)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| EvidxError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(provider) = overrides.embedding_provider {
            if provider != self.embedding.provider {
                // provider-specific settings do not carry over
                self.embedding.model = None;
                self.embedding.dimension = None;
                self.embedding.api_key_env = None;
                self.embedding.base_url = None;
            }
            self.embedding.provider = provider;
        }
        if let Some(model) = overrides.embedding_model {
            self.embedding.model = Some(model);
        }
        if let Some(dimension) = overrides.embedding_dimension {
            self.embedding.dimension = Some(dimension);
        }
        if let Some(timeout) = overrides.sub_search_timeout_ms {
            self.search.sub_search_timeout_ms = timeout;
        }

        ConfigValidator::validate(self)
    }

    /// Apply environment variable overrides
    /// Environment variables in format: EVIDX_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("EVIDX_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "EMBEDDING__PROVIDER" => {
                self.embedding.provider = parse_value(path, value)?;
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = Some(value.to_string());
            }
            "EMBEDDING__DIMENSION" => {
                self.embedding.dimension = Some(parse_value(path, value)?);
            }
            "STORAGE__DATABASE_PATH" => {
                self.storage.database_path = PathBuf::from(value);
            }
            "SEARCH__RRF_K" => {
                self.search.rrf_k = parse_value(path, value)?;
            }
            "SEARCH__SUB_SEARCH_TIMEOUT_MS" => {
                self.search.sub_search_timeout_ms = parse_value(path, value)?;
            }
            "CHUNKING__MAX_CHUNK_TOKENS" => {
                self.chunking.max_chunk_tokens = parse_value(path, value)?;
            }
            "CHUNKING__CHUNK_OVERLAP" => {
                self.chunking.chunk_overlap = parse_value(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| EvidxError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("evidx").join("config.toml"))
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            "offline".to_string(),
            ProfileOverrides {
                embedding_provider: Some(ProviderKind::Local),
                ..ProfileOverrides::default()
            },
        );

        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            profiles,
        }
    }
}

fn parse_value<T: FromStr>(path: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| EvidxError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}': {}", value, e),
    })
}

fn expand_home(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| EvidxError::Config("Cannot determine home directory".to_string()))?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let config = Config::init(&path, false).unwrap();
        let loaded = Config::load(&path).unwrap();

        assert_eq!(loaded.meta.schema_version, SCHEMA_VERSION);
        assert_eq!(loaded.chunking.max_chunk_tokens, config.chunking.max_chunk_tokens);
        assert_eq!(loaded.search.rrf_k, 60.0);
        assert_eq!(loaded.embedding.provider, ProviderKind::OpenAi);
        assert!(loaded.profiles.contains_key("offline"));
    }

    #[test]
    fn test_init_refuses_overwrite() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        Config::init(&path, false).unwrap();
        assert!(Config::init(&path, false).is_err());
        assert!(Config::init(&path, true).is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[_meta]
schema_version = "1.0.0"

[embedding]
provider = "gemini"

[search]
rrf_k = 30.0
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.embedding.provider, ProviderKind::Gemini);
        assert_eq!(config.embedding.effective_dimension(), 768);
        assert_eq!(config.embedding.api_key_env_name(), Some("GEMINI_API_KEY"));
        assert_eq!(config.search.rrf_k, 30.0);
        assert_eq!(config.search.overfetch_factor, 2);
        assert_eq!(config.storage.pool_size, 8);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config = Config::load_or_default(&temp.path().join("absent.toml")).unwrap();
        assert_eq!(config.chunking.chunk_overlap, 100);

        assert!(matches!(
            Config::load(&temp.path().join("absent.toml")),
            Err(EvidxError::ConfigNotFound { .. })
        ));
    }

    #[test]
    fn test_env_value_parsing() {
        let mut config = Config::default();

        config.set_value_from_env("EMBEDDING__PROVIDER", "local").unwrap();
        config.set_value_from_env("EMBEDDING__DIMENSION", "384").unwrap();
        config.set_value_from_env("SEARCH__RRF_K", "20").unwrap();
        config.set_value_from_env("CHUNKING__CHUNK_OVERLAP", "5").unwrap();

        assert_eq!(config.embedding.provider, ProviderKind::Local);
        assert_eq!(config.embedding.dimension, Some(384));
        assert_eq!(config.search.rrf_k, 20.0);
        assert_eq!(config.chunking.chunk_overlap, 5);

        let err = config.set_value_from_env("EMBEDDING__DIMENSION", "wide").unwrap_err();
        assert!(matches!(err, EvidxError::InvalidConfigValue { .. }));
    }

    #[test]
    fn test_offline_profile() {
        let mut config = Config::default();
        config.embedding.model = Some("text-embedding-3-large".to_string());

        config.apply_profile("offline").unwrap();

        assert_eq!(config.embedding.provider, ProviderKind::Local);
        assert_eq!(config.embedding.model, None);
        assert_eq!(config.embedding.api_key_env_name(), None);
        assert!(config.apply_profile("missing").is_err());
    }

    #[test]
    fn test_effective_model_defaults() {
        let mut embedding = EmbeddingConfig::default();
        assert_eq!(embedding.effective_model(), "text-embedding-3-small");
        assert_eq!(embedding.effective_dimension(), 1536);

        embedding.model = Some("  ".to_string());
        assert_eq!(embedding.effective_model(), "text-embedding-3-small");

        embedding.dimension = Some(256);
        assert_eq!(embedding.effective_dimension(), 256);
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(
            expand_home(Path::new("/var/db.sqlite")).unwrap(),
            PathBuf::from("/var/db.sqlite")
        );
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_home(Path::new("~/.evidx/e.sqlite")).unwrap(),
                home.join(".evidx/e.sqlite")
            );
        }
    }
}
