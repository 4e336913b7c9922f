//! TOML configuration.
//!
//! Loaded once per process by [`load_config`] and passed by reference to
//! every subsystem. Credentials are never stored in the file: each LLM
//! endpoint names the environment variable that holds its key, and the key
//! is read when the client is constructed.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_ignore_dirs")]
    pub ignore_dirs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Extractor threads; 0 picks one per core.
    #[serde(default)]
    pub workers: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            ignore_dirs: default_ignore_dirs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            workers: 0,
        }
    }
}

fn default_extensions() -> Vec<String> {
    ["py", "js", "jsx", "ts", "tsx"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_ignore_dirs() -> Vec<String> {
    ["node_modules", "venv", "__pycache__", ".git", "dist", "build"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub docs: LlmEndpointConfig,
    #[serde(default)]
    pub plan: LlmEndpointConfig,
    #[serde(default)]
    pub chat: LlmEndpointConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
            docs: LlmEndpointConfig::default(),
            plan: LlmEndpointConfig::default(),
            chat: LlmEndpointConfig::default(),
        }
    }
}

fn default_llm_timeout_secs() -> u64 {
    120
}

/// One model endpoint (documentation, plan, or chat).
#[derive(Debug, Deserialize, Clone)]
pub struct LlmEndpointConfig {
    /// `disabled`, `anthropic`, or `openai`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Defaults to `ANTHROPIC_API_KEY` / `OPENAI_API_KEY` by provider.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for LlmEndpointConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            max_tokens: default_max_tokens(),
            api_key_env: None,
            base_url: None,
        }
    }
}

impl LlmEndpointConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn key_env(&self) -> String {
        match &self.api_key_env {
            Some(name) => name.clone(),
            None if self.provider == "openai" => "OPENAI_API_KEY".to_string(),
            None => "ANTHROPIC_API_KEY".to_string(),
        }
    }
}

fn default_max_tokens() -> u32 {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Allowed browser origins; an empty list allows any origin.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

impl Config {
    /// Configuration for commands that never touch the database or a
    /// remote service.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/kt.sqlite"),
            },
            scan: ScanConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.scan.extensions.is_empty() {
        anyhow::bail!("scan.extensions must not be empty");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    for (name, endpoint) in [
        ("docs", &config.llm.docs),
        ("plan", &config.llm.plan),
        ("chat", &config.llm.chat),
    ] {
        match endpoint.provider.as_str() {
            "disabled" | "anthropic" | "openai" => {}
            other => anyhow::bail!(
                "Unknown llm.{}.provider: '{}'. Must be disabled, anthropic, or openai.",
                name,
                other
            ),
        }
        if endpoint.is_enabled() && endpoint.max_tokens == 0 {
            anyhow::bail!("llm.{}.max_tokens must be > 0", name);
        }
    }

    if config.embedding.is_enabled() {
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        if config.embedding.provider != "local" && config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    Ok(())
}
