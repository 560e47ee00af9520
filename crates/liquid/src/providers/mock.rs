use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream;

use super::base::{AgentModel, Model, ModelSettings, StreamedResponse, Usage};
use super::parts_manager::{SlotKey, StreamDelta};
use crate::errors::ModelResult;
use crate::models::message::{ModelMessage, ModelResponse};
use crate::models::part::Part;
use crate::models::tool::ToolDefinition;

/// A model that answers from pre-configured responses, for tests and
/// offline runs. With nothing queued it echoes the latest user prompt.
///
/// It never talks to the network, so it ignores the request gate.
#[derive(Clone)]
pub struct MockModel {
    name: String,
    responses: Arc<Mutex<Vec<ModelResponse>>>,
    streams: Arc<Mutex<Vec<Vec<StreamDelta>>>>,
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MockModel {
    /// Create a mock model with a sequence of responses
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            name: "test".to_string(),
            responses: Arc::new(Mutex::new(responses)),
            streams: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue raw delta sequences, replayed in order by streamed requests
    pub fn with_streams(self, streams: Vec<Vec<StreamDelta>>) -> Self {
        *lock(&self.streams) = streams;
        self
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Model for MockModel {
    async fn agent_model(
        &self,
        _function_tools: &[ToolDefinition],
        _allow_text_result: bool,
        _result_tools: &[ToolDefinition],
    ) -> ModelResult<Box<dyn AgentModel>> {
        Ok(Box::new(self.clone()))
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

fn last_user_prompt(messages: &[ModelMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .filter_map(ModelMessage::as_request)
        .flat_map(|request| request.parts.iter().rev())
        .find_map(|part| match part {
            Part::UserPrompt(prompt) => Some(prompt.content.as_str()),
            _ => None,
        })
}

fn prompt_usage(messages: &[ModelMessage], response: &ModelResponse) -> Usage {
    let prompt_tokens: u64 = messages
        .iter()
        .flat_map(ModelMessage::parts)
        .filter_map(Part::as_text)
        .map(word_count)
        .sum();
    Usage::new(prompt_tokens, word_count(&response.text()))
}

/// Replay a finished response as the deltas a vendor would have sent
fn response_to_deltas(response: &ModelResponse, usage: Usage) -> Vec<StreamDelta> {
    let mut deltas = Vec::new();
    for (index, part) in response.parts.iter().enumerate() {
        let slot = SlotKey::Index(index as u32);
        match part {
            Part::Text(text) if text.content.is_empty() => continue,
            Part::Text(text) => {
                for word in text.content.split_inclusive(' ') {
                    deltas.push(StreamDelta::text(slot.clone(), word));
                }
            }
            Part::ToolCall(call) => {
                deltas.push(StreamDelta::tool_name(
                    slot.clone(),
                    call.tool_name.clone(),
                    Some(call.tool_call_id.clone()),
                ));
                deltas.push(StreamDelta::tool_args(slot.clone(), call.args.to_json_text()));
            }
            _ => continue,
        }
        deltas.push(StreamDelta::part_finished(slot));
    }
    deltas.push(StreamDelta::Usage(usage));
    deltas.push(StreamDelta::Finished);
    deltas
}

impl MockModel {
    fn next_response(&self, messages: &[ModelMessage]) -> ModelResponse {
        let mut responses = lock(&self.responses);
        let response = if responses.is_empty() {
            let echo = last_user_prompt(messages).unwrap_or_default();
            ModelResponse::new().with_text(echo)
        } else {
            responses.remove(0)
        };
        response.with_model_name(self.name.clone())
    }
}

#[async_trait]
impl AgentModel for MockModel {
    async fn request(
        &self,
        messages: &[ModelMessage],
        _settings: Option<&ModelSettings>,
    ) -> ModelResult<(ModelResponse, Usage)> {
        let response = self.next_response(messages);
        let usage = prompt_usage(messages, &response);
        Ok((response, usage))
    }

    async fn request_stream(
        &self,
        messages: &[ModelMessage],
        _settings: Option<&ModelSettings>,
    ) -> ModelResult<StreamedResponse> {
        let scripted = {
            let mut streams = lock(&self.streams);
            (!streams.is_empty()).then(|| streams.remove(0))
        };
        let deltas = match scripted {
            Some(deltas) => deltas,
            None => {
                let response = self.next_response(messages);
                let usage = prompt_usage(messages, &response);
                response_to_deltas(&response, usage)
            }
        };
        let deltas = stream::iter(deltas.into_iter().map(Ok));
        Ok(StreamedResponse::new(self.name.clone(), Box::pin(deltas)))
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
