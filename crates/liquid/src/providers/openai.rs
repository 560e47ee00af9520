use std::sync::Arc;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::StreamExt;
use reqwest::Client;
use serde_json::{json, Map, Value};

use super::base::{AgentModel, Model, ModelSettings, StreamedResponse, Usage};
use super::configs::{require_api_key, OpenAiProviderConfig};
use super::gate::AllowModelRequests;
use super::parts_manager::StreamDelta;
use super::utils::{
    cached_http_client, check_response, messages_to_openai_spec, openai_chunk_to_deltas,
    openai_response_to_model_response, openai_usage, tools_to_openai_spec,
};
use crate::errors::{ModelError, ModelResult};
use crate::models::message::{ModelMessage, ModelResponse};
use crate::models::tool::ToolDefinition;

/// Chat completions API, also used for OpenAI compatible servers (groq, ollama)
pub struct OpenAiModel {
    client: Client,
    config: Arc<OpenAiProviderConfig>,
    gate: AllowModelRequests,
}

impl OpenAiModel {
    pub fn new(config: OpenAiProviderConfig, gate: AllowModelRequests) -> Self {
        Self {
            client: cached_http_client(),
            config: Arc::new(config),
            gate,
        }
    }
}

#[async_trait]
impl Model for OpenAiModel {
    async fn agent_model(
        &self,
        function_tools: &[ToolDefinition],
        allow_text_result: bool,
        result_tools: &[ToolDefinition],
    ) -> ModelResult<Box<dyn AgentModel>> {
        if self.config.require_api_key {
            require_api_key(&self.config.api_key, self.config.provider)?;
        }

        let all_tools: Vec<ToolDefinition> = function_tools
            .iter()
            .chain(result_tools.iter())
            .cloned()
            .collect();
        let tools = tools_to_openai_spec(&all_tools)?;

        Ok(Box::new(OpenAiAgentModel {
            client: self.client.clone(),
            config: Arc::clone(&self.config),
            gate: self.gate.clone(),
            name: self.name(),
            tools,
            allow_text_result,
        }))
    }

    fn name(&self) -> String {
        format!("{}:{}", self.config.provider, self.config.model)
    }
}

pub struct OpenAiAgentModel {
    client: Client,
    config: Arc<OpenAiProviderConfig>,
    gate: AllowModelRequests,
    name: String,
    tools: Vec<Value>,
    allow_text_result: bool,
}

impl OpenAiAgentModel {
    fn payload(&self, messages: &[ModelMessage], settings: Option<&ModelSettings>, stream: bool) -> Value {
        let settings = self.config.defaults.merge(settings);

        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(self.config.model));
        payload.insert("messages".to_string(), json!(messages_to_openai_spec(messages)));

        if !self.tools.is_empty() {
            payload.insert("tools".to_string(), json!(self.tools));
            let choice = if self.allow_text_result { "auto" } else { "required" };
            payload.insert("tool_choice".to_string(), json!(choice));
        }
        if let Some(temp) = settings.temperature {
            payload.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = settings.max_tokens {
            payload.insert("max_tokens".to_string(), json!(tokens));
        }
        if stream {
            payload.insert("stream".to_string(), json!(true));
            if self.config.stream_usage {
                payload.insert("stream_options".to_string(), json!({"include_usage": true}));
            }
        }

        Value::Object(payload)
    }

    async fn post(&self, payload: &Value) -> ModelResult<reqwest::Response> {
        self.gate.check()?;

        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let mut request = self.client.post(&url).json(payload);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(model = %self.name, error = %e, "upstream request failed");
            ModelError::from(e)
        })?;
        check_response(response).await
    }
}

#[async_trait]
impl AgentModel for OpenAiAgentModel {
    async fn request(
        &self,
        messages: &[ModelMessage],
        settings: Option<&ModelSettings>,
    ) -> ModelResult<(ModelResponse, Usage)> {
        let payload = self.payload(messages, settings, false);
        let response: Value = self.post(&payload).await?.json().await?;

        if let Some(error) = response.get("error") {
            return Err(ModelError::Request(format!("OpenAI API error: {}", error)));
        }

        let message = openai_response_to_model_response(&response)?;
        let usage = openai_usage(&response).unwrap_or_default();
        Ok((message, usage))
    }

    async fn request_stream(
        &self,
        messages: &[ModelMessage],
        settings: Option<&ModelSettings>,
    ) -> ModelResult<StreamedResponse> {
        let payload = self.payload(messages, settings, true);
        let response = self.post(&payload).await?;
        let name = self.name.clone();

        let deltas = async_stream::stream! {
            let mut events = Box::pin(response.bytes_stream().eventsource());
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(ModelError::Request(format!("stream interrupted: {}", e)));
                        return;
                    }
                };

                let data = event.data.trim();
                if data == "[DONE]" {
                    yield Ok(StreamDelta::Finished);
                    return;
                }

                let chunk = match serde_json::from_str::<Value>(data) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::debug!(model = %name, error = %e, %data, "skipping unparseable SSE chunk");
                        continue;
                    }
                };

                match openai_chunk_to_deltas(&chunk) {
                    Ok(deltas) => {
                        for delta in deltas {
                            yield Ok(delta);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        };

        Ok(StreamedResponse::new(self.name.clone(), Box::pin(deltas)))
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
