//! Selecting the chat-completions endpoint and credential for a request.

use crate::RelayConfig;
use chatrelay_api::{ApiClient, AuthScheme, OpenAiCompatProvider};
use chatrelay_types::{ApiError, ChatProvider, ConfigError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// The `modelData` object of an inbound chat request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelData {
    pub provider: String,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub tool_call: Option<bool>,
}

/// A self-hosted or third-party OpenAI-compatible model, from a
/// `[models.<id>]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomModel {
    pub model_id: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Azure,
    OpenRouter,
    Custom,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Azure => "azure",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Custom => "custom",
        })
    }
}

/// Where and how to send chat-completions requests for one turn.
#[derive(Clone)]
pub struct ProviderEndpoint {
    pub kind: ProviderKind,
    /// Model name placed in the request body.
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub auth: AuthScheme,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
}

impl fmt::Debug for ProviderEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key: String = self.api_key.chars().take(4).collect();
        f.debug_struct("ProviderEndpoint")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &format!("{key}****"))
            .field("auth", &self.auth)
            .field("headers", &self.headers)
            .field("query", &self.query)
            .finish()
    }
}

impl ProviderEndpoint {
    pub fn client(&self) -> Result<ApiClient, ApiError> {
        let mut client =
            ApiClient::new(&self.api_key, &self.base_url)?.with_auth_scheme(self.auth);
        for (name, value) in &self.headers {
            client = client.with_header(name, value);
        }
        for (key, value) in &self.query {
            client = client.with_query(key, value);
        }
        Ok(client)
    }

    pub fn provider(&self) -> Result<Arc<dyn ChatProvider>, ApiError> {
        Ok(Arc::new(OpenAiCompatProvider::new(
            self.kind.to_string(),
            self.client()?,
        )))
    }

    fn bearer(kind: ProviderKind, model: &str, base_url: &str, api_key: &str) -> Self {
        Self {
            kind,
            model: model.to_string(),
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            auth: AuthScheme::Bearer,
            headers: Vec::new(),
            query: Vec::new(),
        }
    }
}

fn credential<'a>(key: &'a Option<String>, provider: &str) -> Result<&'a str, ConfigError> {
    key.as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ConfigError::MissingCredential {
            provider: provider.to_string(),
        })
}

impl RelayConfig {
    /// Endpoint for a tool-calling turn.
    ///
    /// Models flagged as not supporting tool calls are rejected before
    /// anything else; custom models must opt in explicitly.
    pub fn resolve_tool_provider(
        &self,
        model_data: &ModelData,
        model: &str,
    ) -> Result<ProviderEndpoint, ConfigError> {
        if model_data.tool_call == Some(false) {
            return Err(ConfigError::ToolCallingUnsupported);
        }

        let endpoint = match model_data.provider.as_str() {
            "openai" if self.use_azure_openai => self.azure_endpoint(model)?,
            "azure" => self.azure_endpoint(model)?,
            "openai" => self.openai_endpoint(model)?,
            "openrouter" => self.openrouter_endpoint(model)?,
            "custom" if model_data.tool_call == Some(true) => {
                self.custom_endpoint(&model_data.model_id, None)?
            }
            "custom" => return Err(ConfigError::ToolCallingUnsupported),
            "anthropic" => {
                return Err(ConfigError::UnsupportedProvider(
                    "Anthropic tool calling not yet supported, please wait for fix".into(),
                ));
            }
            _ => {
                return Err(ConfigError::UnsupportedProvider(
                    "Other models not yet supported, please wait for fix".into(),
                ));
            }
        };

        tracing::debug!(
            provider = %endpoint.kind,
            model = %endpoint.model,
            base_url = %endpoint.base_url,
            "resolved tool-calling provider"
        );
        Ok(endpoint)
    }

    pub fn openai_endpoint(&self, model: &str) -> Result<ProviderEndpoint, ConfigError> {
        let key = credential(&self.openai_api_key, "OpenAI")?;
        Ok(ProviderEndpoint::bearer(
            ProviderKind::OpenAi,
            model,
            OPENAI_BASE_URL,
            key,
        ))
    }

    /// Azure deployment serving `model`. The model must have a configured
    /// deployment, and the endpoint and key must both be set.
    pub fn azure_endpoint(&self, model: &str) -> Result<ProviderEndpoint, ConfigError> {
        let deployment = self
            .azure
            .deployments
            .get(model)
            .ok_or_else(|| ConfigError::UnknownModel {
                model: model.to_string(),
            })?;
        let (Some(endpoint), Some(key)) = (
            self.azure.endpoint.as_deref().filter(|e| !e.is_empty()),
            self.azure.api_key.as_deref().filter(|k| !k.is_empty()),
        ) else {
            return Err(ConfigError::AzureResourcesMissing);
        };
        if deployment.is_empty() {
            return Err(ConfigError::AzureResourcesMissing);
        }

        Ok(ProviderEndpoint {
            kind: ProviderKind::Azure,
            model: model.to_string(),
            base_url: format!(
                "{}/openai/deployments/{deployment}",
                endpoint.trim_end_matches('/')
            ),
            api_key: key.to_string(),
            auth: AuthScheme::ApiKeyHeader,
            headers: Vec::new(),
            query: vec![("api-version".into(), self.azure.api_version.clone())],
        })
    }

    pub fn openrouter_endpoint(&self, model: &str) -> Result<ProviderEndpoint, ConfigError> {
        let key = credential(&self.openrouter_api_key, "OpenRouter")?;
        let mut endpoint =
            ProviderEndpoint::bearer(ProviderKind::OpenRouter, model, OPENROUTER_BASE_URL, key);
        endpoint.headers = vec![
            ("HTTP-Referer".into(), self.openrouter.site_url.clone()),
            ("X-Title".into(), self.openrouter.app_name.clone()),
        ];
        Ok(endpoint)
    }

    /// Custom model by table id or by `model_id`. `model` overrides the
    /// model name sent upstream.
    pub fn custom_endpoint(
        &self,
        id: &str,
        model: Option<&str>,
    ) -> Result<ProviderEndpoint, ConfigError> {
        let custom = self
            .models
            .get(id)
            .or_else(|| self.models.values().find(|m| m.model_id == id))
            .ok_or_else(|| ConfigError::UnknownModel {
                model: id.to_string(),
            })?;
        Ok(ProviderEndpoint::bearer(
            ProviderKind::Custom,
            model.unwrap_or(&custom.model_id),
            custom.base_url.trim_end_matches('/'),
            custom.api_key.as_deref().unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CliOverrides, SettingsFile};
    use std::path::PathBuf;

    fn config(settings: &str, env: &[(&str, &str)]) -> RelayConfig {
        let settings: SettingsFile = toml::from_str(settings).unwrap();
        let env: Vec<(String, String)> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_settings(
            settings,
            PathBuf::from("/nonexistent"),
            CliOverrides::default(),
            move |key: &str| env.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()),
        )
    }

    fn model_data(provider: &str, tool_call: Option<bool>) -> ModelData {
        ModelData {
            provider: provider.into(),
            model_id: String::new(),
            tool_call,
        }
    }

    #[test]
    fn tool_call_false_is_rejected_first() {
        let cfg = config("", &[("OPENAI_API_KEY", "sk")]);
        let err = cfg
            .resolve_tool_provider(&model_data("openai", Some(false)), "gpt-4o")
            .unwrap_err();
        assert!(matches!(err, ConfigError::ToolCallingUnsupported));
        assert_eq!(
            err.to_string(),
            "This model does not support tool calling, please switch to another model"
        );
    }

    #[test]
    fn openai_endpoint() {
        let cfg = config("", &[("OPENAI_API_KEY", "sk-live")]);
        let endpoint = cfg
            .resolve_tool_provider(&model_data("openai", None), "gpt-4o")
            .unwrap();
        assert_eq!(endpoint.kind, ProviderKind::OpenAi);
        assert_eq!(endpoint.base_url, OPENAI_BASE_URL);
        assert_eq!(endpoint.api_key, "sk-live");
        assert_eq!(endpoint.auth, AuthScheme::Bearer);
        assert!(!format!("{endpoint:?}").contains("sk-live"));
    }

    #[test]
    fn missing_openai_key() {
        let cfg = config("", &[]);
        let err = cfg
            .resolve_tool_provider(&model_data("openai", Some(true)), "gpt-4o")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "OpenAI API Key not found. Please set it in your profile settings."
        );
    }

    #[test]
    fn azure_replaces_openai_when_enabled() {
        let cfg = config(
            r#"
[providers]
use_azure_openai = true

[azure]
endpoint = "https://example.openai.azure.com/"
api_key = "azure-key"

[azure.deployments]
"gpt-4o" = "gpt4o-prod"
"#,
            &[],
        );
        let endpoint = cfg
            .resolve_tool_provider(&model_data("openai", None), "gpt-4o")
            .unwrap();
        assert_eq!(endpoint.kind, ProviderKind::Azure);
        assert_eq!(
            endpoint.base_url,
            "https://example.openai.azure.com/openai/deployments/gpt4o-prod"
        );
        assert_eq!(endpoint.auth, AuthScheme::ApiKeyHeader);
        assert_eq!(
            endpoint.query,
            vec![("api-version".to_string(), "2024-02-01".to_string())]
        );

        let err = cfg
            .resolve_tool_provider(&model_data("openai", None), "gpt-3.5-turbo")
            .unwrap_err();
        assert_eq!(err.to_string(), "Model not found");
    }

    #[test]
    fn azure_without_credentials() {
        let cfg = config(
            "[providers]\nuse_azure_openai = true\n[azure.deployments]\n\"gpt-4o\" = \"d\"\n",
            &[],
        );
        let err = cfg
            .resolve_tool_provider(&model_data("openai", None), "gpt-4o")
            .unwrap_err();
        assert_eq!(err.to_string(), "Azure resources not found");
    }

    #[test]
    fn openrouter_adds_attribution_headers() {
        let cfg = config(
            "[openrouter]\nsite_url = \"https://chat.example.com\"\napp_name = \"Example\"\n",
            &[("OPENROUTER_API_KEY", "or-key")],
        );
        let endpoint = cfg
            .resolve_tool_provider(&model_data("openrouter", None), "openai/gpt-4o")
            .unwrap();
        assert_eq!(endpoint.base_url, OPENROUTER_BASE_URL);
        assert!(
            endpoint
                .headers
                .contains(&("HTTP-Referer".into(), "https://chat.example.com".into()))
        );
        assert!(
            endpoint
                .headers
                .contains(&("X-Title".into(), "Example".into()))
        );
    }

    #[test]
    fn custom_requires_explicit_tool_support() {
        let cfg = config(
            r#"
[models.local]
model_id = "qwen3-32b"
base_url = "http://127.0.0.1:8000/v1/"
"#,
            &[],
        );
        let mut data = model_data("custom", None);
        data.model_id = "qwen3-32b".into();
        assert!(matches!(
            cfg.resolve_tool_provider(&data, "ignored"),
            Err(ConfigError::ToolCallingUnsupported)
        ));

        data.tool_call = Some(true);
        let endpoint = cfg.resolve_tool_provider(&data, "ignored").unwrap();
        assert_eq!(endpoint.model, "qwen3-32b");
        assert_eq!(endpoint.base_url, "http://127.0.0.1:8000/v1");
        assert_eq!(endpoint.api_key, "");

        let by_id = cfg.custom_endpoint("local", Some("qwen3-32b-instruct")).unwrap();
        assert_eq!(by_id.model, "qwen3-32b-instruct");
    }

    #[test]
    fn unsupported_providers() {
        let cfg = config("", &[]);
        let anthropic = cfg
            .resolve_tool_provider(&model_data("anthropic", None), "claude")
            .unwrap_err();
        assert_eq!(
            anthropic.to_string(),
            "Anthropic tool calling not yet supported, please wait for fix"
        );
        let other = cfg
            .resolve_tool_provider(&model_data("mistral", None), "m")
            .unwrap_err();
        assert_eq!(
            other.to_string(),
            "Other models not yet supported, please wait for fix"
        );
    }

    #[test]
    fn endpoint_builds_client() {
        let cfg = config("", &[("OPENROUTER_API_KEY", "or-key")]);
        let endpoint = cfg.openrouter_endpoint("x").unwrap();
        let client = endpoint.client().unwrap();
        assert_eq!(client.base_url(), OPENROUTER_BASE_URL);
        assert_eq!(endpoint.provider().unwrap().name(), "openrouter");
    }
}
