//! TOML configuration parsing and validation.
//!
//! Every command reads a single file (default `./config/posa.toml`). Only
//! `[db]` and `[server]` are required; the scan, LLM and chat sections fall
//! back to defaults matching the dashboard's built-in assistant.

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
    pub chat: ChatConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    /// Origin the dashboard routes are fetched from.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_routes")]
    pub routes: Vec<String>,
    #[serde(default = "default_scan_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub collapse_whitespace: bool,
    #[serde(default)]
    pub snapshots: Option<SnapshotsConfig>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            routes: default_routes(),
            timeout_secs: default_scan_timeout(),
            collapse_whitespace: true,
            snapshots: None,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

/// Routes scanned by "scan all" and by the chat flow when the cache is empty.
pub fn default_routes() -> Vec<String> {
    [
        "/",
        "/dashboard",
        "/products",
        "/inventory",
        "/sales",
        "/customers",
        "/orders",
        "/users",
    ]
    .iter()
    .map(|r| r.to_string())
    .collect()
}

fn default_scan_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// A directory of saved HTML pages that can be indexed without a running
/// dashboard.
#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotsConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.html".to_string(), "**/*.htm".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_prompt_char_limit")]
    pub prompt_char_limit: usize,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            base_url: default_llm_base_url(),
            prompt_char_limit: default_prompt_char_limit(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    "gemini-pro".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_llm_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_prompt_char_limit() -> usize {
    14_000
}
fn default_llm_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}

impl LlmConfig {
    /// Reads the API key from the configured environment variable. Blank
    /// values are treated as missing.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_context_char_limit")]
    pub context_char_limit: usize,
    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,
    /// Below this many characters the cached context is considered empty
    /// and every route is rescanned before answering.
    #[serde(default = "default_min_context_chars")]
    pub min_context_chars: usize,
    /// Send questions to a remote `/api/chat` instead of answering in-process.
    #[serde(default)]
    pub remote_url: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            context_char_limit: default_context_char_limit(),
            title_max_chars: default_title_max_chars(),
            min_context_chars: default_min_context_chars(),
            remote_url: None,
        }
    }
}

fn default_max_attempts() -> u32 {
    2
}
fn default_context_char_limit() -> usize {
    16_000
}
fn default_title_max_chars() -> usize {
    30
}
fn default_min_context_chars() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Config {
    /// Config used when no file is available (in-memory tests, ad-hoc runs).
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            scan: ScanConfig::default(),
            llm: LlmConfig::default(),
            chat: ChatConfig::default(),
            server: ServerConfig {
                bind: "127.0.0.1:7341".to_string(),
            },
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

pub fn validate(config: &Config) -> Result<()> {
    if config.chat.max_attempts == 0 {
        anyhow::bail!("chat.max_attempts must be >= 1");
    }
    if config.chat.context_char_limit == 0 {
        anyhow::bail!("chat.context_char_limit must be > 0");
    }
    if config.llm.prompt_char_limit == 0 {
        anyhow::bail!("llm.prompt_char_limit must be > 0");
    }

    reqwest::Url::parse(&config.scan.base_url)
        .with_context(|| format!("scan.base_url is not a valid URL: {}", config.scan.base_url))?;

    match config.llm.provider.as_str() {
        "disabled" | "gemini" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }

    Ok(())
}
