use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

use super::base::{AgentModel, Model, ModelSettings, Usage};
use super::configs::{require_api_key, GeminiProviderConfig};
use super::factory::ProviderType;
use super::gate::AllowModelRequests;
use super::utils::{cached_http_client, check_response};
use crate::errors::{ModelError, ModelResult};
use crate::models::args::Args;
use crate::models::message::{ModelMessage, ModelResponse};
use crate::models::part::Part;
use crate::models::tool::ToolDefinition;

pub struct GeminiModel {
    client: Client,
    config: Arc<GeminiProviderConfig>,
    gate: AllowModelRequests,
}

impl GeminiModel {
    pub fn new(config: GeminiProviderConfig, gate: AllowModelRequests) -> Self {
        Self {
            client: cached_http_client(),
            config: Arc::new(config),
            gate,
        }
    }
}

#[async_trait]
impl Model for GeminiModel {
    async fn agent_model(
        &self,
        function_tools: &[ToolDefinition],
        allow_text_result: bool,
        result_tools: &[ToolDefinition],
    ) -> ModelResult<Box<dyn AgentModel>> {
        let api_key = require_api_key(&self.config.api_key, ProviderType::Gemini)?.to_string();

        let declarations: Vec<Value> = function_tools
            .iter()
            .chain(result_tools.iter())
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                })
            })
            .collect();

        Ok(Box::new(GeminiAgentModel {
            client: self.client.clone(),
            config: Arc::clone(&self.config),
            gate: self.gate.clone(),
            api_key,
            name: self.name(),
            declarations,
            allow_text_result,
        }))
    }

    fn name(&self) -> String {
        format!("{}:{}", ProviderType::Gemini, self.config.model)
    }
}

pub struct GeminiAgentModel {
    client: Client,
    config: Arc<GeminiProviderConfig>,
    gate: AllowModelRequests,
    api_key: String,
    name: String,
    declarations: Vec<Value>,
    allow_text_result: bool,
}

/// Convert canonical messages to `generateContent` contents, merging
/// consecutive turns that share a role
pub fn messages_to_gemini_spec(messages: &[ModelMessage]) -> ModelResult<Vec<Value>> {
    let mut contents: Vec<Value> = Vec::new();

    for message in messages {
        let mut parts = Vec::new();
        let role = match message {
            ModelMessage::Request(request) => {
                for part in &request.parts {
                    match part {
                        Part::UserPrompt(prompt) => parts.push(json!({"text": prompt.content})),
                        Part::Text(text) => parts.push(json!({"text": text.content})),
                        Part::ToolReturn(tool_return) => parts.push(json!({
                            "functionResponse": {
                                "name": tool_return.tool_name,
                                "response": {"content": tool_return.content},
                            }
                        })),
                        Part::ToolCall(_) => {}
                    }
                }
                "user"
            }
            ModelMessage::Response(response) => {
                for part in &response.parts {
                    match part {
                        Part::Text(text) => parts.push(json!({"text": text.content})),
                        Part::ToolCall(call) => parts.push(json!({
                            "functionCall": {
                                "name": call.tool_name,
                                "args": Value::Object(call.parsed_args()?),
                            }
                        })),
                        _ => {}
                    }
                }
                "model"
            }
        };

        if parts.is_empty() {
            continue;
        }

        match contents.last_mut() {
            Some(last) if last["role"] == role => {
                if let Some(existing) = last["parts"].as_array_mut() {
                    existing.extend(parts);
                }
            }
            _ => contents.push(json!({"role": role, "parts": parts})),
        }
    }

    Ok(contents)
}

/// Convert the first candidate of a `generateContent` response.
///
/// Gemini does not assign ids to function calls, one is generated per call.
pub fn gemini_response_to_model_response(response: &Value) -> ModelResult<ModelResponse> {
    let parts = response["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| {
            ModelError::UnexpectedModelBehavior(format!("no candidate content in response: {}", response))
        })?;

    let mut model_parts = Vec::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            model_parts.push(Part::text(text));
        } else if let Some(call) = part.get("functionCall") {
            let name = call["name"].as_str().ok_or_else(|| {
                ModelError::UnexpectedModelBehavior(format!("functionCall without a name: {}", call))
            })?;
            let args = match &call["args"] {
                Value::Object(args) => Args::Structured(args.clone()),
                Value::Null => Args::default(),
                other => {
                    return Err(ModelError::UnexpectedModelBehavior(format!(
                        "functionCall args are not an object: {}",
                        other
                    )))
                }
            };
            let id = format!("call_{}", uuid::Uuid::new_v4().simple());
            model_parts.push(Part::tool_call(name, id, args));
        }
    }

    let mut model_response = ModelResponse::from_parts(model_parts);
    if let Some(version) = response.get("modelVersion").and_then(Value::as_str) {
        model_response = model_response.with_model_name(version);
    }
    Ok(model_response)
}

fn get_usage(data: &Value) -> Usage {
    let usage = &data["usageMetadata"];
    Usage::new(
        usage["promptTokenCount"].as_u64().unwrap_or(0),
        usage["candidatesTokenCount"].as_u64().unwrap_or(0),
    )
}

impl GeminiAgentModel {
    async fn post(&self, payload: &Value) -> ModelResult<Value> {
        self.gate.check()?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.host.trim_end_matches('/'),
            self.config.model
        );
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(payload)
            .send()
            .await?;

        Ok(check_response(response).await?.json().await?)
    }
}

#[async_trait]
impl AgentModel for GeminiAgentModel {
    async fn request(
        &self,
        messages: &[ModelMessage],
        settings: Option<&ModelSettings>,
    ) -> ModelResult<(ModelResponse, Usage)> {
        let settings = self.config.defaults.merge(settings);

        let mut payload = Map::new();
        payload.insert("contents".to_string(), json!(messages_to_gemini_spec(messages)?));

        let mut generation_config = Map::new();
        if let Some(temp) = settings.temperature {
            generation_config.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = settings.max_tokens {
            generation_config.insert("maxOutputTokens".to_string(), json!(tokens));
        }
        if !generation_config.is_empty() {
            payload.insert("generationConfig".to_string(), Value::Object(generation_config));
        }

        if !self.declarations.is_empty() {
            payload.insert(
                "tools".to_string(),
                json!([{"functionDeclarations": self.declarations}]),
            );
            let mode = if self.allow_text_result { "AUTO" } else { "ANY" };
            payload.insert(
                "tool_config".to_string(),
                json!({"function_calling_config": {"mode": mode}}),
            );
        }

        let response = self.post(&Value::Object(payload)).await?;
        let message = gemini_response_to_model_response(&response)?;
        Ok((message, get_usage(&response)))
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
