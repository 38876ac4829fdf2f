//! Multi-tier TOML configuration for chatrelay.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > config file > defaults

mod provider;

pub use provider::{CustomModel, ModelData, ProviderEndpoint, ProviderKind};

use chatrelay_mcp::ToolServerConfig;
use chatrelay_types::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Address the relay listens on when nothing else is configured.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:3000";

/// Azure OpenAI REST API version sent as `api-version`.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-01";

/// `HTTP-Referer` sent to OpenRouter when no site URL is configured.
pub const DEFAULT_SITE_URL: &str = "http://localhost:3000";

/// `X-Title` sent to OpenRouter when no app name is configured.
pub const DEFAULT_APP_NAME: &str = "chatrelay";

/// Resolved configuration for a relay process.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: String,
    pub config_dir: PathBuf,
    pub openai_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub use_azure_openai: bool,
    pub azure: AzureSettings,
    pub openrouter: OpenRouterSettings,
    pub models: BTreeMap<String, CustomModel>,
    pub servers: BTreeMap<String, ToolServerConfig>,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    pub listen: Option<String>,
    #[serde(default)]
    pub providers: ProviderSettings,
    #[serde(default)]
    pub azure: AzureSettings,
    #[serde(default)]
    pub openrouter: OpenRouterSettings,
    #[serde(default)]
    pub models: BTreeMap<String, CustomModel>,
    #[serde(default)]
    pub servers: BTreeMap<String, ToolServerConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub openai_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    /// Route `openai` models through Azure OpenAI.
    #[serde(default)]
    pub use_azure_openai: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureSettings {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub api_version: String,
    /// Model name → deployment id.
    pub deployments: BTreeMap<String, String>,
}

impl Default for AzureSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            deployments: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenRouterSettings {
    pub site_url: String,
    pub app_name: String,
}

impl Default for OpenRouterSettings {
    fn default() -> Self {
        Self {
            site_url: DEFAULT_SITE_URL.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
        }
    }
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub listen: Option<String>,
    pub config_dir: Option<PathBuf>,
}

impl RelayConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables
    /// 3. Config file (~/.chatrelay/config.toml)
    /// 4. Defaults
    pub fn load(overrides: CliOverrides) -> Self {
        Self::load_with_env(overrides, |key| std::env::var(key).ok())
    }

    /// [`load`](Self::load) with an explicit environment lookup.
    pub fn load_with_env(overrides: CliOverrides, env: impl Fn(&str) -> Option<String>) -> Self {
        let config_dir = overrides
            .config_dir
            .clone()
            .or_else(|| env("CHATRELAY_CONFIG_DIR").map(PathBuf::from))
            .unwrap_or_else(default_config_dir);
        let settings = load_settings_file(&config_dir.join("config.toml"));
        Self::from_settings(settings, config_dir, overrides, env)
    }

    fn from_settings(
        settings: SettingsFile,
        config_dir: PathBuf,
        overrides: CliOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let listen = overrides
            .listen
            .or_else(|| env("CHATRELAY_LISTEN"))
            .or(settings.listen)
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string());

        let mut azure = settings.azure;
        azure.endpoint = env("AZURE_OPENAI_ENDPOINT").or(azure.endpoint);
        azure.api_key = env("AZURE_OPENAI_API_KEY").or(azure.api_key);

        RelayConfig {
            listen,
            config_dir,
            openai_api_key: env("OPENAI_API_KEY").or(settings.providers.openai_api_key),
            openrouter_api_key: env("OPENROUTER_API_KEY")
                .or(settings.providers.openrouter_api_key),
            use_azure_openai: settings.providers.use_azure_openai,
            azure,
            openrouter: settings.openrouter,
            models: settings.models,
            servers: settings.servers,
        }
    }

    /// Look up the requested tool servers, preserving request order.
    pub fn resolve_servers(
        &self,
        ids: &[String],
    ) -> Result<Vec<(String, ToolServerConfig)>, ConfigError> {
        ids.iter()
            .map(|id| {
                let config = self
                    .servers
                    .get(id)
                    .ok_or_else(|| ConfigError::UnknownServer { id: id.clone() })?;
                config
                    .validate(id)
                    .map_err(|e| ConfigError::InvalidValue {
                        key: format!("servers.{id}"),
                        message: e.to_string(),
                    })?;
                Ok((id.clone(), config.clone()))
            })
            .collect()
    }
}

/// Get the chatrelay config directory path (~/.chatrelay/).
pub fn default_config_dir() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chatrelay")
}

/// Load and parse a TOML settings file, returning defaults on any error.
fn load_settings_file(path: &Path) -> SettingsFile {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Failed to parse {}: {}", path.display(), e);
            SettingsFile::default()
        }),
        Err(_) => SettingsFile::default(),
    }
}
