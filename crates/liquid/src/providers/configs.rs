use std::collections::HashMap;

use super::base::ModelSettings;
use super::factory::ProviderType;
use super::gate::AllowModelRequests;
use crate::errors::{ModelError, ModelResult};

pub const OPENAI_HOST: &str = "https://api.openai.com";
pub const GROQ_HOST: &str = "https://api.groq.com/openai";
pub const OLLAMA_HOST: &str = "http://localhost:11434";
pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const GEMINI_HOST: &str = "https://generativelanguage.googleapis.com";

/// Host and key override for one provider. Unset values fall back to the
/// provider's defaults and its conventional environment variable.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub host: Option<String>,
    pub api_key: Option<String>,
}

/// Everything a model factory needs besides the model name
#[derive(Debug, Clone, Default)]
pub struct ProviderContext {
    pub credentials: HashMap<ProviderType, ProviderCredentials>,
    pub allow_model_requests: AllowModelRequests,
    pub defaults: ModelSettings,
}

impl ProviderContext {
    pub fn with_credentials(mut self, provider: ProviderType, credentials: ProviderCredentials) -> Self {
        self.credentials.insert(provider, credentials);
        self
    }

    pub fn with_allow_model_requests(mut self, gate: AllowModelRequests) -> Self {
        self.allow_model_requests = gate;
        self
    }

    pub fn host(&self, provider: ProviderType, default: &str) -> String {
        self.credentials
            .get(&provider)
            .and_then(|c| c.host.clone())
            .unwrap_or_else(|| default.to_string())
    }

    /// Configured key, or the value of `env_var`
    pub fn api_key(&self, provider: ProviderType, env_var: &str) -> Option<String> {
        self.credentials
            .get(&provider)
            .and_then(|c| c.api_key.clone())
            .or_else(|| std::env::var(env_var).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub provider: ProviderType,
    pub host: String,
    pub api_key: Option<String>,
    pub model: String,
    /// OpenAI compatible servers such as ollama run without a key
    pub require_api_key: bool,
    /// Ask for a usage chunk at the end of a stream; only the canonical
    /// OpenAI API accepts `stream_options`
    pub stream_usage: bool,
    pub defaults: ModelSettings,
}

#[derive(Debug, Clone)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: Option<String>,
    pub model: String,
    pub defaults: ModelSettings,
}

#[derive(Debug, Clone)]
pub struct GeminiProviderConfig {
    pub host: String,
    pub api_key: Option<String>,
    pub model: String,
    pub defaults: ModelSettings,
}

/// Fail with a configuration error when a required key is missing
pub(crate) fn require_api_key<'a>(key: &'a Option<String>, provider: ProviderType) -> ModelResult<&'a str> {
    key.as_deref().ok_or_else(|| {
        ModelError::Configuration(format!("no API key configured for provider '{}'", provider))
    })
}
