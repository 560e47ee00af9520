use std::ops::AddAssign;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use super::parts_manager::{PartsManager, StreamDelta};
use crate::errors::{ModelError, ModelResult};
use crate::models::message::{ModelMessage, ModelResponse};
use crate::models::tool::ToolDefinition;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Add another usage fragment. Counts only ever grow.
    pub fn incr(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens = self.prompt_tokens + self.completion_tokens;
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, other: Usage) {
        self.incr(&other);
    }
}

/// Per-call generation settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelSettings {
    /// Values set in `overrides` win over `self`
    pub fn merge(&self, overrides: Option<&ModelSettings>) -> ModelSettings {
        match overrides {
            None => self.clone(),
            Some(overrides) => ModelSettings {
                temperature: overrides.temperature.or(self.temperature),
                max_tokens: overrides.max_tokens.or(self.max_tokens),
            },
        }
    }
}

/// A model from some provider (OpenAI, Anthropic, etc)
#[async_trait]
pub trait Model: Send + Sync {
    /// Create the per-run configuration for this model.
    ///
    /// This is async so adapters can validate credentials before any
    /// request is sent; failures surface as [`ModelError::Configuration`].
    async fn agent_model(
        &self,
        function_tools: &[ToolDefinition],
        allow_text_result: bool,
        result_tools: &[ToolDefinition],
    ) -> ModelResult<Box<dyn AgentModel>>;

    /// Identifier of the model, `<provider>:<model-name>`
    fn name(&self) -> String;
}

/// A model configured for one run
#[async_trait]
pub trait AgentModel: Send + Sync {
    /// Single round trip to the model
    async fn request(
        &self,
        messages: &[ModelMessage],
        settings: Option<&ModelSettings>,
    ) -> ModelResult<(ModelResponse, Usage)>;

    /// Streamed round trip to the model. Adapters that cannot stream fail
    /// fast here instead of buffering a full response.
    async fn request_stream(
        &self,
        _messages: &[ModelMessage],
        _settings: Option<&ModelSettings>,
    ) -> ModelResult<StreamedResponse> {
        Err(ModelError::NotSupported(format!(
            "streamed requests are not supported by {}",
            self.model_name()
        )))
    }

    fn model_name(&self) -> &str;
}

pub type DeltaStream = BoxStream<'static, ModelResult<StreamDelta>>;

/// One in-flight streamed model call.
///
/// Each delta pulled with [`StreamedResponse::next`] is folded into the
/// parts manager before being handed to the caller, so [`StreamedResponse::get`]
/// always reflects everything received so far. Dropping it early abandons
/// the stream.
pub struct StreamedResponse {
    model_name: String,
    timestamp: DateTime<Utc>,
    parts_manager: PartsManager,
    deltas: DeltaStream,
}

impl StreamedResponse {
    pub fn new<S: Into<String>>(model_name: S, deltas: DeltaStream) -> Self {
        Self {
            model_name: model_name.into(),
            timestamp: Utc::now(),
            parts_manager: PartsManager::new(),
            deltas,
        }
    }

    /// Next delta from the vendor, or `None` once the stream is exhausted.
    ///
    /// Transport errors are yielded. A delta that cannot be folded (for
    /// example text addressed to a tool call slot) is logged and skipped, the
    /// rest of the response keeps assembling.
    pub async fn next(&mut self) -> Option<ModelResult<StreamDelta>> {
        loop {
            match self.deltas.next().await {
                Some(Ok(delta)) => match self.parts_manager.apply(delta.clone()) {
                    Ok(()) => return Some(Ok(delta)),
                    Err(e) => {
                        tracing::warn!(model = %self.model_name, error = %e, "dropping stream delta");
                        continue;
                    }
                },
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    self.parts_manager.finish();
                    return None;
                }
            }
        }
    }

    /// Build a response from the data received so far
    pub fn get(&self) -> ModelResponse {
        ModelResponse::from_parts(self.parts_manager.get_parts())
            .with_model_name(self.model_name.clone())
            .with_timestamp(self.timestamp)
    }

    /// Usage so far. Provisional until the stream is exhausted.
    pub fn usage(&self) -> Usage {
        self.parts_manager.usage()
    }

    pub fn is_finished(&self) -> bool {
        self.parts_manager.is_finished()
    }

    /// Per tool call argument errors found when the stream completed
    pub fn tool_argument_errors(&self) -> &[ModelError] {
        self.parts_manager.tool_argument_errors()
    }

    /// Tool calls whose argument JSON was cut off
    pub fn unterminated_tool_calls(&self) -> Vec<String> {
        self.parts_manager.unterminated_tool_calls()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Drain the stream and return the final response and usage
    pub async fn collect(mut self) -> ModelResult<(ModelResponse, Usage)> {
        while let Some(delta) = self.next().await {
            delta?;
        }
        Ok((self.get(), self.usage()))
    }
}
