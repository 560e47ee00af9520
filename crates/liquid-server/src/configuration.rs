use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment, File};
use liquid::models::tool::ToolDefinition;
use liquid::providers::{
    base::ModelSettings,
    configs::{ProviderContext, ProviderCredentials},
    factory::ProviderType,
    gate::AllowModelRequests,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Default, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|_| ConfigError::InvalidAddress(addr))
    }
}

/// Which model serves the chat, and its generation defaults
#[derive(Debug, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub allow_requests: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// A canned prompt offered by the chat UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedAction {
    pub title: String,
    pub label: String,
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub model: ModelConfig,
    /// Keyed by provider tag; `google_gla` stands for `google-gla` since
    /// environment variable names cannot contain dashes
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
    /// Tools the chat UI executes itself; results come back as tool
    /// invocations on the next request
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub suggestions: Vec<SuggestedAction>,
}

impl Settings {
    /// Load from `liquid.toml` in the working directory, if present, and the
    /// environment
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate(File::with_name("liquid").required(false))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_and_validate(File::from(path.as_ref()).required(true))
    }

    fn load_and_validate<S>(file: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = Config::builder()
            // Server defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            // Model defaults
            .set_default("model.name", default_model())?
            .set_default("model.allow_requests", true)?
            .add_source(file)
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("LIQUID")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    // "missing field `name`"
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }

    /// Credentials, request gate and defaults handed to the model registry
    pub fn provider_context(&self) -> ProviderContext {
        let mut context = ProviderContext::default()
            .with_allow_model_requests(AllowModelRequests::new(self.model.allow_requests));
        context.defaults = ModelSettings {
            temperature: self.model.temperature,
            max_tokens: self.model.max_tokens,
        };

        for (tag, provider) in &self.providers {
            match ProviderType::from_str(&tag.replace('_', "-")) {
                Ok(provider_type) => {
                    context = context.with_credentials(
                        provider_type,
                        ProviderCredentials {
                            host: provider.host.clone(),
                            api_key: provider.api_key.clone(),
                        },
                    );
                }
                Err(_) => tracing::warn!(%tag, "ignoring settings for unknown provider"),
            }
        }

        context
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_model() -> String {
    "openai:gpt-4o".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("LIQUID_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.model.name, "openai:gpt-4o");
        assert!(settings.model.allow_requests);
        assert_eq!(settings.model.temperature, None);
        assert_eq!(settings.model.max_tokens, None);
        assert!(settings.providers.is_empty());
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        clean_env();
        env::set_var("LIQUID_SERVER__PORT", "8080");
        env::set_var("LIQUID_MODEL__NAME", "groq:llama-3.3-70b-versatile");
        env::set_var("LIQUID_MODEL__ALLOW_REQUESTS", "false");
        env::set_var("LIQUID_MODEL__TEMPERATURE", "0.5");
        env::set_var("LIQUID_MODEL__MAX_TOKENS", "2000");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.model.name, "groq:llama-3.3-70b-versatile");
        assert!(!settings.model.allow_requests);
        assert_eq!(settings.model.temperature, Some(0.5));
        assert_eq!(settings.model.max_tokens, Some(2000));

        let context = settings.provider_context();
        assert!(!context.allow_model_requests.is_allowed());
        assert_eq!(context.defaults.max_tokens, Some(2000));

        clean_env();
    }

    #[test]
    #[serial]
    fn test_provider_credentials() {
        clean_env();
        env::set_var("LIQUID_PROVIDERS__OPENAI__API_KEY", "sk-test");
        env::set_var("LIQUID_PROVIDERS__GOOGLE_GLA__HOST", "http://localhost:8089");
        env::set_var("LIQUID_PROVIDERS__MISTRAL__API_KEY", "ignored");

        let settings = Settings::new().unwrap();
        let context = settings.provider_context();
        assert_eq!(
            context.api_key(ProviderType::OpenAi, "LIQUID_TEST_UNSET_KEY").as_deref(),
            Some("sk-test")
        );
        assert_eq!(
            context.host(ProviderType::Gemini, "https://unused"),
            "http://localhost:8089"
        );
        assert_eq!(context.credentials.len(), 2);

        clean_env();
    }

    #[test]
    #[serial]
    fn test_file_settings_with_env_precedence() {
        clean_env();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[model]
name = "anthropic:claude-3-5-haiku-latest"

[[suggestions]]
title = "What is the weather"
label = "in San Francisco?"
action = "What is the weather in San Francisco?"

[[tools]]
name = "get_weather"
description = "Get the weather for a location"

[tools.parameters]
type = "object"
required = ["location"]
"#
        )
        .unwrap();
        env::set_var("LIQUID_SERVER__HOST", "0.0.0.0");

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.model.name, "anthropic:claude-3-5-haiku-latest");
        assert!(settings.model.allow_requests);
        assert_eq!(
            settings.suggestions,
            vec![SuggestedAction {
                title: "What is the weather".to_string(),
                label: "in San Francisco?".to_string(),
                action: "What is the weather in San Francisco?".to_string(),
            }]
        );

        assert_eq!(settings.tools.len(), 1);
        assert_eq!(settings.tools[0].name, "get_weather");
        assert_eq!(settings.tools[0].parameters["required"][0], "location");

        clean_env();
    }

    #[test]
    fn test_socket_addr_conversion() {
        let server_settings = ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 3000,
        };
        let addr = server_settings.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");

        let bad = ServerSettings {
            host: "not a host".to_string(),
            port: 3000,
        };
        assert!(matches!(bad.socket_addr(), Err(ConfigError::InvalidAddress(_))));
    }
}
