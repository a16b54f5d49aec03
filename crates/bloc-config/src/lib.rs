use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const BLOC_DIR_NAME: &str = ".bloc";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const RUNS_DIR_NAME: &str = "runs";
pub const RISK_THRESHOLD_ENV: &str = "BLOC_RISK_THRESHOLD";
pub const DEFAULT_WEBHOOK_URL_ENV: &str = "DISCORD_WEBHOOK_URL";
pub const DEFAULT_DASHBOARD_URL: &str = "http://localhost:8000";
pub const DEFAULT_BLOCK_THRESHOLD: f64 = 0.8;
pub const DEFAULT_NOTIFY_THRESHOLD: f64 = 0.5;
pub const DEFAULT_OLLAMA_EMBEDDING_ENDPOINT: &str = "http://127.0.0.1:11434/api/embeddings";
pub const DEFAULT_OLLAMA_EMBEDDING_MODEL: &str = "nomic-embed-text";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    #[default]
    Hashed,
    Ollama,
}

impl EmbeddingProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hashed => "hashed",
            Self::Ollama => "ollama",
        }
    }
}

impl std::str::FromStr for EmbeddingProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "hashed" => Ok(Self::Hashed),
            "ollama" => Ok(Self::Ollama),
            other => Err(format!(
                "invalid embedding provider '{other}', expected one of: hashed, ollama"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BlocConfig {
    #[serde(default)]
    pub miner: MinerConfig,
    #[serde(default)]
    pub dead_code: DeadCodeConfig,
    #[serde(default)]
    pub harness: HarnessConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_fallback_window_lines")]
    pub fallback_window_lines: usize,
    #[serde(default = "default_max_path_hops")]
    pub max_path_hops: usize,
    #[serde(default = "default_max_side_effect_paths")]
    pub max_side_effect_paths: usize,
    /// Worker threads for per-file extraction; 0 uses every available core.
    #[serde(default)]
    pub parallelism: usize,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            fallback_window_lines: default_fallback_window_lines(),
            max_path_hops: default_max_path_hops(),
            max_side_effect_paths: default_max_side_effect_paths(),
            parallelism: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadCodeConfig {
    #[serde(default = "default_min_commented_run")]
    pub min_commented_run: usize,
}

impl Default for DeadCodeConfig {
    fn default() -> Self {
        Self {
            min_commented_run: default_min_commented_run(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default = "default_harness_command")]
    pub command: Vec<String>,
    #[serde(default = "default_test_dir")]
    pub test_dir: String,
    #[serde(default = "default_report_file")]
    pub report_file: String,
    #[serde(default = "default_harness_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_per_test_timeout_secs")]
    pub per_test_timeout_secs: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            command: default_harness_command(),
            test_dir: default_test_dir(),
            report_file: default_report_file(),
            timeout_secs: default_harness_timeout_secs(),
            per_test_timeout_secs: default_per_test_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_block_threshold")]
    pub block_threshold: f64,
    #[serde(default = "default_notify_threshold")]
    pub notify_threshold: f64,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            block_threshold: DEFAULT_BLOCK_THRESHOLD,
            notify_threshold: DEFAULT_NOTIFY_THRESHOLD,
            history_window: default_history_window(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_db_file")]
    pub db_file: String,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    #[serde(default)]
    pub embedding_provider: EmbeddingProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_file: default_db_file(),
            min_similarity: default_min_similarity(),
            embedding_provider: EmbeddingProviderKind::Hashed,
            embedding_endpoint: None,
            embedding_model: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_webhook_url_env")]
    pub webhook_url_env: String,
    #[serde(default = "default_dashboard_url")]
    pub dashboard_url: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url_env: default_webhook_url_env(),
            dashboard_url: default_dashboard_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub fn bloc_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(BLOC_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    bloc_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn runs_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    bloc_dir(workspace_root).join(RUNS_DIR_NAME)
}

pub fn memory_db_path(workspace_root: impl AsRef<Path>, config: &BlocConfig) -> PathBuf {
    bloc_dir(workspace_root).join(&config.memory.db_file)
}

pub fn load_workspace_config(workspace_root: impl AsRef<Path>) -> Result<BlocConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(with_env_overrides(BlocConfig::default()));
    }

    let raw = fs::read_to_string(path)?;
    let parsed: BlocConfig = toml::from_str(&raw)?;
    Ok(with_env_overrides(normalize_config(parsed)))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<BlocConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(bloc_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = BlocConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(with_env_overrides(config))
}

/// Applies an operator-supplied block threshold. Unparseable or out-of-range
/// values are ignored and the configured threshold stays in effect.
pub fn apply_risk_threshold_override(mut config: BlocConfig, raw: Option<&str>) -> BlocConfig {
    if let Some(value) = raw.and_then(|raw| raw.trim().parse::<f64>().ok())
        && (0.0..=1.0).contains(&value)
    {
        config.risk.block_threshold = value;
    }
    config
}

pub fn validate_config(config: &BlocConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if config.harness.command.is_empty() {
        warnings.push(ConfigWarning {
            code: "harness_command_empty",
            message: "harness.command is empty; baseline and validation stages cannot run"
                .to_owned(),
        });
    }
    if config.harness.timeout_secs == 0 {
        warnings.push(ConfigWarning {
            code: "harness_timeout_zero",
            message: "harness.timeout_secs is 0; every suite execution will time out".to_owned(),
        });
    }
    if (config.risk.block_threshold - DEFAULT_BLOCK_THRESHOLD).abs() > f64::EPSILON {
        warnings.push(ConfigWarning {
            code: "risk_threshold_custom",
            message: format!(
                "risk.block_threshold is {:.2}; the BLOCKED risk level label still starts at {DEFAULT_BLOCK_THRESHOLD:.2}",
                config.risk.block_threshold
            ),
        });
    }
    if config.risk.notify_threshold > config.risk.block_threshold {
        warnings.push(ConfigWarning {
            code: "notify_above_block",
            message: "risk.notify_threshold exceeds risk.block_threshold; blocked runs may not notify"
                .to_owned(),
        });
    }
    if config.risk.history_window == 0 {
        warnings.push(ConfigWarning {
            code: "history_window_zero",
            message: "risk.history_window is 0; run history never contributes to risk".to_owned(),
        });
    }
    if !(0.0..=1.0).contains(&config.memory.min_similarity) {
        warnings.push(ConfigWarning {
            code: "min_similarity_range",
            message: format!(
                "memory.min_similarity {} is outside 0..=1",
                config.memory.min_similarity
            ),
        });
    }
    if config.memory.embedding_provider == EmbeddingProviderKind::Ollama
        && config.memory.embedding_endpoint.is_none()
    {
        warnings.push(ConfigWarning {
            code: "embedding_endpoint_default",
            message: format!(
                "memory.embedding_endpoint not set; using {DEFAULT_OLLAMA_EMBEDDING_ENDPOINT}"
            ),
        });
    }

    warnings
}

fn with_env_overrides(config: BlocConfig) -> BlocConfig {
    let raw = std::env::var(RISK_THRESHOLD_ENV).ok();
    apply_risk_threshold_override(config, raw.as_deref())
}

fn default_extensions() -> Vec<String> {
    vec!["py".to_owned()]
}

fn default_fallback_window_lines() -> usize {
    30
}

fn default_max_path_hops() -> usize {
    8
}

fn default_max_side_effect_paths() -> usize {
    20
}

fn default_min_commented_run() -> usize {
    6
}

fn default_harness_command() -> Vec<String> {
    vec!["python3".to_owned(), "-m".to_owned(), "pytest".to_owned()]
}

fn default_test_dir() -> String {
    "_bloc_tests".to_owned()
}

fn default_report_file() -> String {
    "_bloc_report.json".to_owned()
}

fn default_harness_timeout_secs() -> u64 {
    120
}

fn default_per_test_timeout_secs() -> u64 {
    30
}

fn default_block_threshold() -> f64 {
    DEFAULT_BLOCK_THRESHOLD
}

fn default_notify_threshold() -> f64 {
    DEFAULT_NOTIFY_THRESHOLD
}

fn default_history_window() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_db_file() -> String {
    "memory.sqlite".to_owned()
}

fn default_min_similarity() -> f64 {
    0.35
}

fn default_webhook_url_env() -> String {
    DEFAULT_WEBHOOK_URL_ENV.to_owned()
}

fn default_dashboard_url() -> String {
    DEFAULT_DASHBOARD_URL.to_owned()
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn normalize_config(mut config: BlocConfig) -> BlocConfig {
    config.miner.extensions = config
        .miner
        .extensions
        .into_iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect();
    if config.miner.extensions.is_empty() {
        config.miner.extensions = default_extensions();
    }
    if config.miner.max_path_hops == 0 {
        config.miner.max_path_hops = default_max_path_hops();
    }
    if config.dead_code.min_commented_run == 0 {
        config.dead_code.min_commented_run = default_min_commented_run();
    }

    if config.harness.test_dir.trim().is_empty() {
        config.harness.test_dir = default_test_dir();
    }
    if config.harness.report_file.trim().is_empty() {
        config.harness.report_file = default_report_file();
    }
    config.harness.command = config
        .harness
        .command
        .into_iter()
        .map(|part| part.trim().to_owned())
        .filter(|part| !part.is_empty())
        .collect();

    if config.memory.db_file.trim().is_empty() {
        config.memory.db_file = default_db_file();
    }
    config.memory.embedding_endpoint = normalize_optional(config.memory.embedding_endpoint.take());
    config.memory.embedding_model = normalize_optional(config.memory.embedding_model.take());

    let webhook_env = config.notify.webhook_url_env.trim();
    if webhook_env.is_empty() {
        config.notify.webhook_url_env = default_webhook_url_env();
    } else {
        config.notify.webhook_url_env = webhook_env.to_owned();
    }
    config.notify.dashboard_url = config.notify.dashboard_url.trim().trim_end_matches('/').to_owned();

    config
}
