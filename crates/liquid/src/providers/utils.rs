use std::collections::HashSet;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};

use super::base::Usage;
use super::parts_manager::{SlotKey, StreamDelta};
use crate::errors::{ModelError, ModelResult};
use crate::models::args::Args;
use crate::models::message::{ModelMessage, ModelResponse};
use crate::models::part::Part;
use crate::models::tool::ToolDefinition;

pub const USER_AGENT: &str = concat!("liquid/", env!("CARGO_PKG_VERSION"));

/// Slot used for the text of an OpenAI style stream, tool calls use their index
pub const CONTENT_SLOT: &str = "content";

lazy_static! {
    static ref HTTP_CLIENT: Client = Client::builder()
        .timeout(Duration::from_secs(600)) // 10 minutes timeout
        .connect_timeout(Duration::from_secs(5))
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_default();
    static ref VALID_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Client shared by every adapter so connections are pooled across requests
pub fn cached_http_client() -> Client {
    HTTP_CLIENT.clone()
}

/// Map a non-success vendor response to a request error
pub async fn check_response(response: Response) -> ModelResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(ModelError::Request(format!("Rate limited: {}", body))),
        status if status.is_server_error() => {
            Err(ModelError::Request(format!("Server error: {} {}", status, body)))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ModelError::Configuration(format!(
            "Authentication failed: {} {}",
            status, body
        ))),
        _ => {
            if let Some(err) = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| check_openai_context_length_error(&v["error"]))
            {
                return Err(ModelError::Request(err.to_string()));
            }
            Err(ModelError::Request(format!("Request failed: {} {}", status, body)))
        }
    }
}

/// Convert canonical messages to OpenAI's chat completion message specification.
///
/// Tool call ids, names and arguments are sent exactly as they were
/// received; arguments keep their original JSON text.
pub fn messages_to_openai_spec(messages: &[ModelMessage]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        match message {
            ModelMessage::Request(request) => {
                for part in &request.parts {
                    match part {
                        Part::UserPrompt(prompt) => messages_spec.push(json!({
                            "role": "user",
                            "content": prompt.content,
                        })),
                        Part::ToolReturn(tool_return) => messages_spec.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_return.tool_call_id,
                            "content": tool_return.content,
                        })),
                        Part::Text(text) => messages_spec.push(json!({
                            "role": "user",
                            "content": text.content,
                        })),
                        Part::ToolCall(call) => {
                            tracing::warn!(tool_call_id = %call.tool_call_id, "tool call in a request turn, skipped");
                        }
                    }
                }
            }
            ModelMessage::Response(response) => {
                let mut converted = json!({"role": "assistant"});
                let mut texts = Vec::new();
                let mut tool_calls = Vec::new();

                for part in &response.parts {
                    match part {
                        Part::Text(text) => texts.push(text.content.as_str()),
                        Part::ToolCall(call) => tool_calls.push(json!({
                            "id": call.tool_call_id,
                            "type": "function",
                            "function": {
                                "name": call.tool_name,
                                "arguments": call.args.to_json_text(),
                            }
                        })),
                        _ => {
                            tracing::warn!("user content in a response turn, skipped");
                        }
                    }
                }

                if !texts.is_empty() {
                    converted["content"] = json!(texts.concat());
                }
                if !tool_calls.is_empty() {
                    converted["tool_calls"] = json!(tool_calls);
                }
                if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
                    messages_spec.push(converted);
                }
            }
        }
    }

    messages_spec
}

/// Convert tool definitions to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[ToolDefinition]) -> ModelResult<Vec<Value>> {
    let mut tool_names = HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(ModelError::Configuration(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            }
        }));
    }

    Ok(result)
}

/// Convert OpenAI's API response to a canonical response
pub fn openai_response_to_model_response(response: &Value) -> ModelResult<ModelResponse> {
    let original = response
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| {
            ModelError::UnexpectedModelBehavior(format!("no choices in response: {}", response))
        })?;

    let mut parts = Vec::new();

    if let Some(text) = original.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            parts.push(Part::text(text));
        }
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(Value::as_array) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().ok_or_else(|| {
                ModelError::UnexpectedModelBehavior(format!("tool call without id: {}", tool_call))
            })?;
            let function_name = tool_call["function"]["name"].as_str().ok_or_else(|| {
                ModelError::UnexpectedModelBehavior(format!("tool call without name: {}", tool_call))
            })?;
            if !is_valid_function_name(function_name) {
                return Err(ModelError::UnexpectedModelBehavior(format!(
                    "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
                    function_name
                )));
            }
            let arguments = match &tool_call["function"]["arguments"] {
                Value::String(text) => Args::raw(text.as_str()),
                Value::Null => Args::default(),
                other => Args::from_value(other.clone()),
            };
            parts.push(Part::tool_call(function_name, id, arguments));
        }
    }

    let mut model_response = ModelResponse::from_parts(parts);
    if let Some(model) = response.get("model").and_then(Value::as_str) {
        model_response = model_response.with_model_name(model);
    }
    if let Some(created) = response.get("created").and_then(Value::as_i64) {
        if let Some(timestamp) = chrono::DateTime::from_timestamp(created, 0) {
            model_response = model_response.with_timestamp(timestamp);
        }
    }
    Ok(model_response)
}

/// Usage block of an OpenAI style response or stream chunk
pub fn openai_usage(data: &Value) -> Option<Usage> {
    let usage = data.get("usage").filter(|u| u.is_object())?;
    let prompt_tokens = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
    let completion_tokens = usage
        .get("completion_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    Some(Usage::new(prompt_tokens, completion_tokens))
}

/// Translate one OpenAI stream chunk into stream deltas
pub fn openai_chunk_to_deltas(chunk: &Value) -> ModelResult<Vec<StreamDelta>> {
    let mut deltas = Vec::new();

    if let Some(error) = chunk.get("error") {
        return Err(ModelError::Request(format!("error in stream: {}", error)));
    }

    let choices = chunk.get("choices").and_then(Value::as_array);
    if let Some(delta) = choices
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("delta"))
    {
        if let Some(content) = delta.get("content").and_then(Value::as_str) {
            deltas.push(StreamDelta::text(SlotKey::id(CONTENT_SLOT), content));
        }

        if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for tool_call in tool_calls {
                let index = tool_call
                    .get("index")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| {
                        ModelError::UnexpectedModelBehavior(format!(
                            "streamed tool call without index: {}",
                            tool_call
                        ))
                    })?;
                let index = u32::try_from(index).map_err(|_| {
                    ModelError::UnexpectedModelBehavior(format!(
                        "streamed tool call index out of range: {}",
                        index
                    ))
                })?;
                let slot = SlotKey::Index(index);
                let id = tool_call.get("id").and_then(Value::as_str).map(String::from);
                let function = &tool_call["function"];

                if let Some(name) = function.get("name").and_then(Value::as_str) {
                    deltas.push(StreamDelta::tool_name(slot.clone(), name, id));
                }
                if let Some(arguments) = function.get("arguments").and_then(Value::as_str) {
                    deltas.push(StreamDelta::tool_args(slot, arguments));
                }
            }
        }
    }

    if let Some(usage) = openai_usage(chunk) {
        deltas.push(StreamDelta::Usage(usage));
    }

    Ok(deltas)
}

pub fn is_valid_function_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(String);

pub fn check_openai_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::ModelRequest;

    const OPENAI_TOOL_USE_RESPONSE: &str = r#"{
        "choices": [{
            "role": "assistant",
            "message": {
                "tool_calls": [{
                    "id": "1",
                    "function": {
                        "name": "example_fn",
                        "arguments": "{\"param\": \"value\"}"
                    }
                }]
            }
        }],
        "usage": {
            "prompt_tokens": 10,
            "completion_tokens": 25,
            "total_tokens": 35
        }
    }"#;

    #[test]
    fn test_messages_to_openai_spec() {
        let message: ModelMessage = ModelRequest::new().with_user_prompt("Hello").into();
        let spec = messages_to_openai_spec(&[message]);

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["role"], "user");
        assert_eq!(spec[0]["content"], "Hello");
    }

    #[test]
    fn test_messages_to_openai_spec_complex() {
        let raw = "{\"param1\":  \"value1\", \"n\": 1.50}";
        let messages: Vec<ModelMessage> = vec![
            ModelResponse::new().with_text("Hello!").into(),
            ModelRequest::new().with_user_prompt("How are you?").into(),
            ModelResponse::new()
                .with_tool_call("example", "tool1", Args::raw(raw))
                .into(),
            ModelRequest::new().with_tool_return("example", "tool1", "Result").into(),
        ];

        let spec = messages_to_openai_spec(&messages);

        assert_eq!(spec.len(), 4);
        assert_eq!(spec[0]["role"], "assistant");
        assert_eq!(spec[0]["content"], "Hello!");
        assert_eq!(spec[1]["role"], "user");
        assert_eq!(spec[1]["content"], "How are you?");
        assert_eq!(spec[2]["role"], "assistant");
        assert_eq!(spec[2]["tool_calls"][0]["function"]["arguments"], raw);
        assert_eq!(spec[3]["role"], "tool");
        assert_eq!(spec[3]["content"], "Result");
        assert_eq!(spec[3]["tool_call_id"], spec[2]["tool_calls"][0]["id"]);
    }

    #[test]
    fn test_request_with_several_returns_expands() {
        let request: ModelMessage = ModelRequest::new()
            .with_tool_return("a", "1", "one")
            .with_tool_return("b", "2", "two")
            .with_user_prompt("next")
            .into();
        let spec = messages_to_openai_spec(&[request]);
        let roles: Vec<_> = spec.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["tool", "tool", "user"]);
    }

    #[test]
    fn test_tools_to_openai_spec() -> anyhow::Result<()> {
        let tool = ToolDefinition::new(
            "test_tool",
            "A test tool",
            json!({
                "type": "object",
                "properties": {
                    "input": {
                        "type": "string",
                        "description": "Test parameter"
                    }
                },
                "required": ["input"]
            }),
        );

        let spec = tools_to_openai_spec(&[tool])?;

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["type"], "function");
        assert_eq!(spec[0]["function"]["name"], "test_tool");
        Ok(())
    }

    #[test]
    fn test_tools_to_openai_spec_duplicate() {
        let tool = ToolDefinition::new("test_tool", "Test tool", json!({"type": "object"}));
        let result = tools_to_openai_spec(&[tool.clone(), tool]);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Duplicate tool name"));
    }

    #[test]
    fn test_openai_response_to_model_response_text() -> anyhow::Result<()> {
        let response = json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Hello from John Cena!"
                }
            }]
        });

        let message = openai_response_to_model_response(&response)?;
        assert_eq!(message.parts, vec![Part::text("Hello from John Cena!")]);
        assert_eq!(message.model_name.as_deref(), Some("gpt-4o-2024-08-06"));
        Ok(())
    }

    #[test]
    fn test_openai_response_to_model_response_keeps_raw_arguments() -> anyhow::Result<()> {
        let response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE)?;
        let message = openai_response_to_model_response(&response)?;

        let call = message.parts[0].as_tool_call().unwrap();
        assert_eq!(call.tool_name, "example_fn");
        assert_eq!(call.tool_call_id, "1");
        assert_eq!(call.args, Args::raw("{\"param\": \"value\"}"));
        assert_eq!(openai_usage(&response), Some(Usage::new(10, 25)));
        Ok(())
    }

    #[test]
    fn test_openai_response_invalid_function_name() -> anyhow::Result<()> {
        let mut response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE)?;
        response["choices"][0]["message"]["tool_calls"][0]["function"]["name"] = json!("invalid fn");

        match openai_response_to_model_response(&response) {
            Err(ModelError::UnexpectedModelBehavior(msg)) => {
                assert!(msg.starts_with("The provided function name"))
            }
            other => panic!("Expected UnexpectedModelBehavior, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_openai_response_without_choices() {
        assert!(matches!(
            openai_response_to_model_response(&json!({"choices": []})),
            Err(ModelError::UnexpectedModelBehavior(_))
        ));
    }

    #[test]
    fn test_openai_chunk_to_deltas() -> anyhow::Result<()> {
        let chunk = json!({
            "choices": [{
                "index": 0,
                "delta": {
                    "tool_calls": [{
                        "index": 1,
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "search", "arguments": ""}
                    }]
                }
            }]
        });
        assert_eq!(
            openai_chunk_to_deltas(&chunk)?,
            vec![
                StreamDelta::tool_name(SlotKey::Index(1), "search", Some("call_abc".into())),
                StreamDelta::tool_args(SlotKey::Index(1), ""),
            ]
        );

        let chunk = json!({"choices": [{"index": 0, "delta": {"content": "Hi"}}]});
        assert_eq!(
            openai_chunk_to_deltas(&chunk)?,
            vec![StreamDelta::text(SlotKey::id(CONTENT_SLOT), "Hi")]
        );

        let chunk = json!({"choices": [], "usage": {"prompt_tokens": 7, "completion_tokens": 3}});
        assert_eq!(
            openai_chunk_to_deltas(&chunk)?,
            vec![StreamDelta::Usage(Usage::new(7, 3))]
        );
        Ok(())
    }

    #[test]
    fn test_chunk_with_oversized_tool_index() {
        let chunk = json!({
            "choices": [{
                "index": 0,
                "delta": {
                    "tool_calls": [{
                        "index": 4294967296u64,
                        "function": {"name": "search"}
                    }]
                }
            }]
        });
        assert!(matches!(
            openai_chunk_to_deltas(&chunk),
            Err(ModelError::UnexpectedModelBehavior(_))
        ));
    }

    #[test]
    fn test_tool_names_are_sent_unchanged() {
        let messages: Vec<ModelMessage> = vec![ModelResponse::new()
            .with_tool_call("get.weather", "call_1", Args::raw("{}"))
            .into()];
        let spec = messages_to_openai_spec(&messages);
        assert_eq!(spec[0]["tool_calls"][0]["function"]["name"], "get.weather");
    }

    #[test]
    fn test_is_valid_function_name() {
        assert!(is_valid_function_name("hello-world"));
        assert!(is_valid_function_name("hello_world"));
        assert!(!is_valid_function_name("hello world"));
        assert!(!is_valid_function_name("hello@world"));
    }

    #[test]
    fn test_check_openai_context_length_error() {
        let error = json!({
            "code": "context_length_exceeded",
            "message": "This message is too long"
        });

        let result = check_openai_context_length_error(&error);
        assert_eq!(
            result.unwrap().to_string(),
            "Context length exceeded. Message: This message is too long"
        );

        let error = json!({
            "code": "other_error",
            "message": "Some other error"
        });
        assert!(check_openai_context_length_error(&error).is_none());
    }
}
