use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::search::OutputFormat;
use crate::error::ConfigError;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 1536;
pub const DEFAULT_LOCAL_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_LOCAL_DIMENSION: u32 = 384;
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const DEFAULT_COLLECTION: &str = "docqa";
pub const DEFAULT_CHUNK_SIZE: u32 = 800;
pub const DEFAULT_CHUNK_OVERLAP: u32 = 200;
pub const DEFAULT_TOP_K: u32 = 4;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_METRICS_RETENTION_DAYS: u32 = 30;

const APP_DIR: &str = "docqa";
const PROJECT_DIR: &str = ".docqa";
const CONFIG_FILE: &str = "config.toml";

/// Environment variables holding the OpenAI key, in lookup order.
const OPENAI_KEY_VARS: [&str; 2] = ["OPENAI_API_KEY", "OPENAI_KEY"];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Read from the environment only; never written to disk.
    #[serde(skip)]
    pub openai_api_key: Option<String>,
}

/// A loaded configuration together with the files it came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: Config,
    pub global_path: Option<PathBuf>,
    pub project_path: Option<PathBuf>,
}

impl Config {
    pub fn global_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR).join(CONFIG_FILE))
    }

    pub fn project_config_dir() -> Option<PathBuf> {
        std::env::current_dir().ok().map(|p| p.join(PROJECT_DIR))
    }

    /// Walk up from the current directory looking for `.docqa/config.toml`.
    pub fn find_project_config() -> Option<PathBuf> {
        let cwd = std::env::current_dir().ok()?;
        cwd.ancestors()
            .map(|dir| dir.join(PROJECT_DIR).join(CONFIG_FILE))
            .find(|p| p.is_file())
    }

    pub fn data_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map(|p| p.join(APP_DIR))
    }

    pub fn models_dir() -> Option<PathBuf> {
        Self::data_dir().map(|p| p.join("models"))
    }

    pub fn metrics_db_path() -> Option<PathBuf> {
        Self::data_dir().map(|p| p.join("metrics.db"))
    }

    fn runtime_dir(&self) -> PathBuf {
        self.daemon
            .runtime_dir
            .clone()
            .or_else(Self::data_dir)
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.runtime_dir().join("docqa.sock")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.runtime_dir().join("docqa.pid")
    }

    /// Load defaults, then the global file, then the project file, then the environment.
    pub fn load() -> Result<ResolvedConfig, ConfigError> {
        let global = Self::global_path().filter(|p| p.is_file());
        let project = Self::find_project_config();
        let mut resolved = Self::load_from(global.as_deref(), project.as_deref())?;
        resolved.config.apply_env(|key| std::env::var(key).ok());
        resolved.config.validate()?;
        Ok(resolved)
    }

    /// Layer the given files over the defaults. Environment is not consulted.
    pub fn load_from(
        global: Option<&Path>,
        project: Option<&Path>,
    ) -> Result<ResolvedConfig, ConfigError> {
        let mut merged = toml::Table::try_from(Config::default())?;

        for path in [global, project].into_iter().flatten() {
            let content = std::fs::read_to_string(path)?;
            let overlay: toml::Table = toml::from_str(&content)?;
            merge_tables(&mut merged, overlay);
        }

        let config: Config = merged.try_into()?;
        Ok(ResolvedConfig {
            config,
            global_path: global.map(Path::to_path_buf),
            project_path: project.map(Path::to_path_buf),
        })
    }

    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = OPENAI_KEY_VARS.iter().find_map(|k| non_empty(k)) {
            self.openai_api_key = Some(key);
        }
        if let Some(url) = non_empty("DOCQA_INDEX_URL") {
            self.index.url = url;
        }
        if let Some(key) = non_empty("DOCQA_INDEX_API_KEY") {
            self.index.api_key = Some(key);
        }
        if let Some(model) = non_empty("DOCQA_LLM_MODEL") {
            self.llm.model = model;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let chunking = &self.chunking;
        if chunking.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "chunking.chunk_size must be at least 1".to_string(),
            ));
        }
        if chunking.chunk_overlap >= chunking.chunk_size {
            return Err(ConfigError::ValidationError(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                chunking.chunk_overlap, chunking.chunk_size
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.top_k must be at least 1".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.batch_size must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn require_openai_key(&self) -> Result<&str, ConfigError> {
        self.openai_api_key.as_deref().ok_or_else(|| {
            ConfigError::MissingCredential(
                "set OPENAI_API_KEY in the environment or a .env file".to_string(),
            )
        })
    }

    pub fn init_global() -> Result<PathBuf, ConfigError> {
        let path = Self::global_path().ok_or_else(|| {
            ConfigError::PathError("could not determine config directory".to_string())
        })?;
        Self::default().save_to(&path)?;
        Ok(path)
    }

    pub fn init_project() -> Result<PathBuf, ConfigError> {
        let dir = Self::project_config_dir().ok_or_else(|| {
            ConfigError::PathError("could not determine current directory".to_string())
        })?;
        let path = dir.join(CONFIG_FILE);
        Self::default().save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// OpenAI embeddings API
    #[default]
    OpenAi,
    /// Local ONNX model served by `docqa serve`
    Local,
}

impl std::fmt::Display for EmbeddingProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingProviderKind::OpenAi => write!(f, "openai"),
            EmbeddingProviderKind::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Overrides the provider's native dimension when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<u32>,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_local_model_id")]
    pub model_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,
}

impl EmbeddingConfig {
    pub fn effective_dimension(&self) -> u32 {
        self.dimension.unwrap_or(match self.provider {
            EmbeddingProviderKind::OpenAi => DEFAULT_EMBEDDING_DIMENSION,
            EmbeddingProviderKind::Local => DEFAULT_LOCAL_DIMENSION,
        })
    }
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_openai_base_url() -> String {
    DEFAULT_OPENAI_BASE_URL.to_string()
}

fn default_batch_size() -> u32 {
    64
}

fn default_timeout() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    512
}

fn default_local_model_id() -> String {
    DEFAULT_LOCAL_MODEL_ID.to_string()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            model: default_embedding_model(),
            base_url: default_openai_base_url(),
            dimension: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout(),
            max_tokens: default_max_tokens(),
            model_id: default_local_model_id(),
            model_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_answer_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_chat_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}

fn default_temperature() -> f32 {
    0.0
}

fn default_answer_tokens() -> u32 {
    512
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            base_url: default_openai_base_url(),
            temperature: default_temperature(),
            max_tokens: default_answer_tokens(),
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexDriver {
    #[default]
    Memory,
    Qdrant,
    #[serde(alias = "postgres")]
    PostgreSQL,
}

impl std::fmt::Display for IndexDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexDriver::Memory => write!(f, "memory"),
            IndexDriver::Qdrant => write!(f, "qdrant"),
            IndexDriver::PostgreSQL => write!(f, "postgresql"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub driver: IndexDriver,

    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    #[serde(default = "default_pool_max")]
    pub pool_max: u32,

    #[serde(default = "default_pool_acquire_timeout")]
    pub pool_acquire_timeout: u32,
}

impl IndexConfig {
    pub fn qualified_table_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.collection),
            None => self.collection.clone(),
        }
    }
}

fn default_qdrant_url() -> String {
    DEFAULT_QDRANT_URL.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_pool_max() -> u32 {
    5
}

fn default_pool_acquire_timeout() -> u32 {
    30
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            driver: IndexDriver::default(),
            url: default_qdrant_url(),
            collection: default_collection(),
            api_key: None,
            schema: None,
            pool_max: default_pool_max(),
            pool_acquire_timeout: default_pool_acquire_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Characters repeated between consecutive chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: u32,

    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: u64,
}

fn default_chunk_size() -> u32 {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> u32 {
    DEFAULT_CHUNK_OVERLAP
}

fn default_max_document_bytes() -> u64 {
    50 * 1024 * 1024
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_document_bytes: default_max_document_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: u32,

    #[serde(default)]
    pub default_format: OutputFormat,
}

fn default_top_k() -> u32 {
    DEFAULT_TOP_K
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            default_format: OutputFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub auto_start: bool,

    /// Directory for the socket and pid file; defaults to the data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_dir: Option<PathBuf>,
}

fn default_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            auto_start: true,
            runtime_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    DEFAULT_METRICS_RETENTION_DAYS
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: default_retention_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.chunking.chunk_size, 800);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.index.driver, IndexDriver::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_effective_dimension_follows_provider() {
        let mut config = EmbeddingConfig::default();
        assert_eq!(config.effective_dimension(), DEFAULT_EMBEDDING_DIMENSION);
        config.provider = EmbeddingProviderKind::Local;
        assert_eq!(config.effective_dimension(), DEFAULT_LOCAL_DIMENSION);
        config.dimension = Some(256);
        assert_eq!(config.effective_dimension(), 256);
    }

    #[test]
    fn test_validate_rejects_overlap_not_below_chunk_size() {
        let mut config = Config::default();
        config.chunking.chunk_size = 100;
        config.chunking.chunk_overlap = 100;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let mut config = Config::default();
        config.retrieval.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_project_file_overrides_global_file() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("global.toml");
        let project = dir.path().join("project.toml");
        std::fs::write(
            &global,
            "[chunking]\nchunk_size = 1000\nchunk_overlap = 100\n[retrieval]\ntop_k = 8\n",
        )
        .unwrap();
        std::fs::write(&project, "[chunking]\nchunk_overlap = 50\n").unwrap();

        let resolved = Config::load_from(Some(&global), Some(&project)).unwrap();
        let config = resolved.config;
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.llm.model, DEFAULT_CHAT_MODEL);
        assert_eq!(resolved.project_path.as_deref(), Some(project.as_path()));
    }

    #[test]
    fn test_driver_alias() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[index]\ndriver = \"postgres\"\n").unwrap();
        let resolved = Config::load_from(None, Some(&path)).unwrap();
        assert_eq!(resolved.config.index.driver, IndexDriver::PostgreSQL);
    }

    #[test]
    fn test_apply_env_prefers_openai_api_key() {
        let vars: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-primary"),
            ("OPENAI_KEY", "sk-legacy"),
            ("DOCQA_INDEX_URL", "http://qdrant:6334"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-primary"));
        assert_eq!(config.index.url, "http://qdrant:6334");
    }

    #[test]
    fn test_apply_env_falls_back_to_legacy_key() {
        let mut config = Config::default();
        config.apply_env(|k| (k == "OPENAI_KEY").then(|| "sk-legacy".to_string()));
        assert_eq!(config.require_openai_key().unwrap(), "sk-legacy");
    }

    #[test]
    fn test_api_keys_never_serialized() {
        let mut config = Config::default();
        config.openai_api_key = Some("sk-secret".to_string());
        config.index.api_key = Some("qdrant-secret".to_string());
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(!toml.contains("sk-secret"));
        assert!(!toml.contains("qdrant-secret"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        Config::default().save_to(&path).unwrap();
        let resolved = Config::load_from(Some(&path), None).unwrap();
        assert_eq!(resolved.config.chunking.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_qualified_table_name() {
        let mut config = IndexConfig::default();
        assert_eq!(config.qualified_table_name(), "docqa");
        config.schema = Some("rag".to_string());
        assert_eq!(config.qualified_table_name(), "rag.docqa");
    }
}
