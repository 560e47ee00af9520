use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

use super::base::{AgentModel, Model, ModelSettings, Usage};
use super::configs::{require_api_key, AnthropicProviderConfig};
use super::factory::ProviderType;
use super::gate::AllowModelRequests;
use super::utils::{cached_http_client, check_response};
use crate::errors::{ModelError, ModelResult};
use crate::models::args::Args;
use crate::models::message::{ModelMessage, ModelResponse};
use crate::models::part::Part;
use crate::models::tool::ToolDefinition;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct AnthropicModel {
    client: Client,
    config: Arc<AnthropicProviderConfig>,
    gate: AllowModelRequests,
}

impl AnthropicModel {
    pub fn new(config: AnthropicProviderConfig, gate: AllowModelRequests) -> Self {
        Self {
            client: cached_http_client(),
            config: Arc::new(config),
            gate,
        }
    }
}

#[async_trait]
impl Model for AnthropicModel {
    async fn agent_model(
        &self,
        function_tools: &[ToolDefinition],
        allow_text_result: bool,
        result_tools: &[ToolDefinition],
    ) -> ModelResult<Box<dyn AgentModel>> {
        let api_key = require_api_key(&self.config.api_key, ProviderType::Anthropic)?.to_string();

        let tools = function_tools
            .iter()
            .chain(result_tools.iter())
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.parameters,
                })
            })
            .collect();

        Ok(Box::new(AnthropicAgentModel {
            client: self.client.clone(),
            config: Arc::clone(&self.config),
            gate: self.gate.clone(),
            api_key,
            name: self.name(),
            tools,
            allow_text_result,
        }))
    }

    fn name(&self) -> String {
        format!("{}:{}", ProviderType::Anthropic, self.config.model)
    }
}

pub struct AnthropicAgentModel {
    client: Client,
    config: Arc<AnthropicProviderConfig>,
    gate: AllowModelRequests,
    api_key: String,
    name: String,
    tools: Vec<Value>,
    allow_text_result: bool,
}

/// Convert canonical messages to the Messages API format.
///
/// Consecutive turns with the same role are merged, the API requires
/// alternating user and assistant messages.
pub fn messages_to_anthropic_spec(messages: &[ModelMessage]) -> ModelResult<Vec<Value>> {
    let mut anthropic_messages: Vec<Value> = Vec::new();

    for message in messages {
        let (role, blocks) = match message {
            ModelMessage::Request(request) => {
                let mut blocks = Vec::new();
                for part in &request.parts {
                    match part {
                        Part::UserPrompt(prompt) => {
                            blocks.push(json!({"type": "text", "text": prompt.content}))
                        }
                        Part::Text(text) => blocks.push(json!({"type": "text", "text": text.content})),
                        Part::ToolReturn(tool_return) => blocks.push(json!({
                            "type": "tool_result",
                            "tool_use_id": tool_return.tool_call_id,
                            "content": tool_return.content,
                        })),
                        Part::ToolCall(_) => {}
                    }
                }
                ("user", blocks)
            }
            ModelMessage::Response(response) => {
                let mut blocks = Vec::new();
                for part in &response.parts {
                    match part {
                        Part::Text(text) => blocks.push(json!({"type": "text", "text": text.content})),
                        Part::ToolCall(call) => blocks.push(json!({
                            "type": "tool_use",
                            "id": call.tool_call_id,
                            "name": call.tool_name,
                            "input": Value::Object(call.parsed_args()?),
                        })),
                        _ => {}
                    }
                }
                ("assistant", blocks)
            }
        };

        if blocks.is_empty() {
            continue;
        }

        match anthropic_messages.last_mut() {
            Some(last) if last["role"] == role => {
                if let Some(content) = last["content"].as_array_mut() {
                    content.extend(blocks);
                }
            }
            _ => anthropic_messages.push(json!({"role": role, "content": blocks})),
        }
    }

    Ok(anthropic_messages)
}

/// Convert a Messages API response to a canonical response
pub fn anthropic_response_to_model_response(response: &Value) -> ModelResult<ModelResponse> {
    let content = response
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ModelError::UnexpectedModelBehavior(format!("no content in response: {}", response))
        })?;

    let mut parts = Vec::new();
    for block in content {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                let text = block["text"].as_str().unwrap_or_default();
                parts.push(Part::text(text));
            }
            Some("tool_use") => {
                let (Some(id), Some(name)) = (block["id"].as_str(), block["name"].as_str()) else {
                    return Err(ModelError::UnexpectedModelBehavior(format!(
                        "tool_use block without id or name: {}",
                        block
                    )));
                };
                let args = match &block["input"] {
                    Value::Object(input) => Args::Structured(input.clone()),
                    Value::Null => Args::default(),
                    other => {
                        return Err(ModelError::UnexpectedModelBehavior(format!(
                            "tool_use input is not an object: {}",
                            other
                        )))
                    }
                };
                parts.push(Part::tool_call(name, id, args));
            }
            other => {
                tracing::debug!(block_type = ?other, "skipping unsupported content block");
            }
        }
    }

    let mut model_response = ModelResponse::from_parts(parts);
    if let Some(model) = response.get("model").and_then(Value::as_str) {
        model_response = model_response.with_model_name(model);
    }
    Ok(model_response)
}

fn get_usage(data: &Value) -> Usage {
    let usage = &data["usage"];
    Usage::new(
        usage["input_tokens"].as_u64().unwrap_or(0),
        usage["output_tokens"].as_u64().unwrap_or(0),
    )
}

impl AnthropicAgentModel {
    async fn post(&self, payload: &Value) -> ModelResult<Value> {
        self.gate.check()?;

        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(payload)
            .send()
            .await?;

        Ok(check_response(response).await?.json().await?)
    }
}

#[async_trait]
impl AgentModel for AnthropicAgentModel {
    async fn request(
        &self,
        messages: &[ModelMessage],
        settings: Option<&ModelSettings>,
    ) -> ModelResult<(ModelResponse, Usage)> {
        let settings = self.config.defaults.merge(settings);

        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(self.config.model));
        payload.insert(
            "messages".to_string(),
            json!(messages_to_anthropic_spec(messages)?),
        );
        payload.insert(
            "max_tokens".to_string(),
            json!(settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );
        if let Some(temp) = settings.temperature {
            payload.insert("temperature".to_string(), json!(temp));
        }
        if !self.tools.is_empty() {
            payload.insert("tools".to_string(), json!(self.tools));
            if !self.allow_text_result {
                payload.insert("tool_choice".to_string(), json!({"type": "any"}));
            }
        }

        let response = self.post(&Value::Object(payload)).await?;
        let message = anthropic_response_to_model_response(&response)?;
        Ok((message, get_usage(&response)))
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
