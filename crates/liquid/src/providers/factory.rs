use std::collections::HashMap;
use std::str::FromStr;

use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use super::anthropic::AnthropicModel;
use super::base::Model;
use super::configs::{
    AnthropicProviderConfig, GeminiProviderConfig, OpenAiProviderConfig, ProviderContext, ANTHROPIC_HOST,
    GEMINI_HOST, GROQ_HOST, OLLAMA_HOST, OPENAI_HOST,
};
use super::gemini::GeminiModel;
use super::mock::MockModel;
use super::openai::OpenAiModel;
use crate::errors::{ModelError, ModelResult};

/// Provider tag, the part before the `:` of a model identifier
#[derive(EnumIter, EnumString, AsRefStr, Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderType {
    #[strum(serialize = "openai")]
    OpenAi,
    #[strum(serialize = "groq")]
    Groq,
    #[strum(serialize = "ollama")]
    Ollama,
    #[strum(serialize = "anthropic")]
    Anthropic,
    #[strum(serialize = "google-gla")]
    Gemini,
    #[strum(serialize = "test")]
    Test,
}

pub type ModelFactory = fn(&str, &ProviderContext) -> ModelResult<Box<dyn Model>>;

/// Bare model names accepted for backwards compatibility
const LEGACY_PREFIXES: &[(&str, ProviderType)] = &[
    ("gpt", ProviderType::OpenAi),
    ("o1", ProviderType::OpenAi),
    ("claude", ProviderType::Anthropic),
    ("gemini", ProviderType::Gemini),
];

/// Maps provider tags to the factories that build their models
pub struct ModelRegistry {
    factories: HashMap<ProviderType, ModelFactory>,
    context: ProviderContext,
}

impl ModelRegistry {
    /// Registry with every built-in provider
    pub fn new(context: ProviderContext) -> Self {
        let mut registry = Self::empty(context);
        for provider in ProviderType::iter() {
            registry.register(provider, builtin_factory(provider));
        }
        registry
    }

    pub fn empty(context: ProviderContext) -> Self {
        Self {
            factories: HashMap::new(),
            context,
        }
    }

    pub fn register(&mut self, provider: ProviderType, factory: ModelFactory) {
        self.factories.insert(provider, factory);
    }

    pub fn context(&self) -> &ProviderContext {
        &self.context
    }

    /// Split an identifier into its provider and model name
    pub fn resolve(identifier: &str) -> ModelResult<(ProviderType, String)> {
        let unknown = || ModelError::UnknownModel(identifier.to_string());

        if identifier == ProviderType::Test.as_ref() {
            return Ok((ProviderType::Test, identifier.to_string()));
        }

        if let Some((tag, model)) = identifier.split_once(':') {
            let provider = ProviderType::from_str(tag).map_err(|_| unknown())?;
            if model.is_empty() {
                return Err(unknown());
            }
            return Ok((provider, model.to_string()));
        }

        LEGACY_PREFIXES
            .iter()
            .find(|(prefix, _)| identifier.starts_with(prefix))
            .map(|(_, provider)| (*provider, identifier.to_string()))
            .ok_or_else(unknown)
    }

    /// Build the model named by `identifier`
    pub fn infer_model(&self, identifier: &str) -> ModelResult<Box<dyn Model>> {
        let (provider, model) = Self::resolve(identifier)?;
        let factory = self
            .factories
            .get(&provider)
            .ok_or_else(|| ModelError::UnknownModel(identifier.to_string()))?;
        tracing::debug!(%provider, %model, "building model");
        factory(&model, &self.context)
    }
}

fn builtin_factory(provider: ProviderType) -> ModelFactory {
    match provider {
        ProviderType::OpenAi => openai_model,
        ProviderType::Groq => groq_model,
        ProviderType::Ollama => ollama_model,
        ProviderType::Anthropic => anthropic_model,
        ProviderType::Gemini => gemini_model,
        ProviderType::Test => test_model,
    }
}

fn openai_model(model: &str, context: &ProviderContext) -> ModelResult<Box<dyn Model>> {
    let config = OpenAiProviderConfig {
        provider: ProviderType::OpenAi,
        host: context.host(ProviderType::OpenAi, OPENAI_HOST),
        api_key: context.api_key(ProviderType::OpenAi, "OPENAI_API_KEY"),
        model: model.to_string(),
        require_api_key: true,
        stream_usage: true,
        defaults: context.defaults.clone(),
    };
    Ok(Box::new(OpenAiModel::new(config, context.allow_model_requests.clone())))
}

fn groq_model(model: &str, context: &ProviderContext) -> ModelResult<Box<dyn Model>> {
    let config = OpenAiProviderConfig {
        provider: ProviderType::Groq,
        host: context.host(ProviderType::Groq, GROQ_HOST),
        api_key: context.api_key(ProviderType::Groq, "GROQ_API_KEY"),
        model: model.to_string(),
        require_api_key: true,
        stream_usage: false,
        defaults: context.defaults.clone(),
    };
    Ok(Box::new(OpenAiModel::new(config, context.allow_model_requests.clone())))
}

fn ollama_model(model: &str, context: &ProviderContext) -> ModelResult<Box<dyn Model>> {
    let config = OpenAiProviderConfig {
        provider: ProviderType::Ollama,
        host: context.host(ProviderType::Ollama, OLLAMA_HOST),
        api_key: context.api_key(ProviderType::Ollama, "OLLAMA_API_KEY"),
        model: model.to_string(),
        require_api_key: false,
        stream_usage: false,
        defaults: context.defaults.clone(),
    };
    Ok(Box::new(OpenAiModel::new(config, context.allow_model_requests.clone())))
}

fn anthropic_model(model: &str, context: &ProviderContext) -> ModelResult<Box<dyn Model>> {
    let config = AnthropicProviderConfig {
        host: context.host(ProviderType::Anthropic, ANTHROPIC_HOST),
        api_key: context.api_key(ProviderType::Anthropic, "ANTHROPIC_API_KEY"),
        model: model.to_string(),
        defaults: context.defaults.clone(),
    };
    Ok(Box::new(AnthropicModel::new(config, context.allow_model_requests.clone())))
}

fn gemini_model(model: &str, context: &ProviderContext) -> ModelResult<Box<dyn Model>> {
    let config = GeminiProviderConfig {
        host: context.host(ProviderType::Gemini, GEMINI_HOST),
        api_key: context.api_key(ProviderType::Gemini, "GEMINI_API_KEY"),
        model: model.to_string(),
        defaults: context.defaults.clone(),
    };
    Ok(Box::new(GeminiModel::new(config, context.allow_model_requests.clone())))
}

fn test_model(_model: &str, _context: &ProviderContext) -> ModelResult<Box<dyn Model>> {
    Ok(Box::new(MockModel::default()))
}
