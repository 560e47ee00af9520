//! Conversion from the UI chat protocol to canonical messages.
//!
//! The chat UI sends the whole visible history on every turn: user messages
//! carry free text, assistant messages carry text and the tool invocations
//! the UI rendered. Only invocations that reached the `result` state become
//! part of the canonical history.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::args::Args;
use crate::models::message::{ModelMessage, ModelRequest, ModelResponse};
use crate::models::part::Part;
use crate::providers::utils::messages_to_openai_spec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    User,
    Assistant,
    System,
    Data,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolInvocationState {
    Call,
    PartialCall,
    Result,
}

/// A tool invocation as rendered by the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ToolInvocationState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ToolInvocation {
    /// The recorded result as tool return content. Strings are used as is,
    /// any other JSON value is serialized.
    pub fn result_text(&self) -> String {
        match &self.result {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientAttachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub url: String,
}

/// One message of the UI chat protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: ClientRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,
    #[serde(
        rename = "experimental_attachments",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub experimental_attachments: Option<Vec<ClientAttachment>>,
}

impl ClientMessage {
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::new(ClientRole::User, content)
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::new(ClientRole::Assistant, content)
    }

    fn new<S: Into<String>>(role: ClientRole, content: S) -> Self {
        Self {
            id: None,
            role,
            content: content.into(),
            tool_invocations: Vec::new(),
            experimental_attachments: None,
        }
    }

    pub fn with_tool_invocation(mut self, invocation: ToolInvocation) -> Self {
        self.tool_invocations.push(invocation);
        self
    }
}

/// Convert the UI history to canonical messages.
///
/// Returns the live prompt, the content of the last message when it comes
/// from the user, together with the full history. The live prompt is also
/// part of the history.
pub fn convert_to_model_messages(messages: &[ClientMessage]) -> (Option<String>, Vec<ModelMessage>) {
    let mut model_messages = Vec::new();
    let mut user_prompt = None;
    let last = messages.len().saturating_sub(1);

    for (index, message) in messages.iter().enumerate() {
        if message.experimental_attachments.is_some() {
            tracing::debug!(index, "attachments are not forwarded to the model");
        }

        match message.role {
            ClientRole::User => {
                model_messages.push(ModelRequest::new().with_user_prompt(message.content.clone()).into());
                if index == last {
                    user_prompt = Some(message.content.clone());
                }
            }
            ClientRole::Assistant => convert_assistant_message(message, &mut model_messages),
            role => {
                tracing::debug!(?role, index, "message role has no canonical form, skipped");
            }
        }
    }

    (user_prompt, model_messages)
}

fn convert_assistant_message(message: &ClientMessage, model_messages: &mut Vec<ModelMessage>) {
    let mut parts = Vec::new();
    let mut tool_returns = Vec::new();

    for invocation in &message.tool_invocations {
        if invocation.state != Some(ToolInvocationState::Result) {
            // TODO: keep unresolved invocations as pending calls once the UI
            // protocol says how they should be answered
            tracing::warn!(
                tool_call_id = %invocation.tool_call_id,
                tool_name = %invocation.tool_name,
                state = ?invocation.state,
                "dropping tool invocation without a result"
            );
            continue;
        }

        parts.push(Part::tool_call(
            invocation.tool_name.clone(),
            invocation.tool_call_id.clone(),
            Args::from_value(invocation.args.clone()),
        ));
        tool_returns.push(ModelRequest::new().with_tool_return(
            invocation.tool_name.clone(),
            invocation.tool_call_id.clone(),
            invocation.result_text(),
        ));
    }

    if parts.is_empty() && !message.content.is_empty() {
        parts.push(Part::text(message.content.clone()));
    }

    if !parts.is_empty() {
        model_messages.push(ModelResponse::from_parts(parts).into());
        model_messages.extend(tool_returns.into_iter().map(ModelMessage::from));
    }
}

/// Convert the UI history straight to OpenAI chat completion messages
pub fn convert_to_openai_messages(messages: &[ClientMessage]) -> Vec<Value> {
    let (_, model_messages) = convert_to_model_messages(messages);
    messages_to_openai_spec(&model_messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::conversation::Conversation;
    use serde_json::json;

    fn search_result(args: Value) -> ToolInvocation {
        ToolInvocation {
            tool_call_id: "a".to_string(),
            tool_name: "search".to_string(),
            args,
            state: Some(ToolInvocationState::Result),
            result: Some(json!("3 hits")),
        }
    }

    #[test]
    fn test_assistant_tool_result_becomes_call_and_return() {
        let messages = vec![
            ClientMessage::user("hi"),
            ClientMessage::assistant("").with_tool_invocation(search_result(json!({"q": "x"}))),
        ];

        let (live_prompt, history) = convert_to_model_messages(&messages);
        assert_eq!(live_prompt, None);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0], ModelMessage::from(ModelRequest::new().with_user_prompt("hi")));

        let response = history[1].as_response().unwrap();
        assert_eq!(
            response.parts,
            vec![Part::tool_call("search", "a", Args::from_value(json!({"q": "x"})))]
        );
        assert_eq!(
            history[2],
            ModelMessage::from(ModelRequest::new().with_tool_return("search", "a", "3 hits"))
        );
        assert!(Conversation::from(history).validate().is_ok());
    }

    #[test]
    fn test_trailing_user_message_is_live_prompt() {
        let messages = vec![
            ClientMessage::user("hi"),
            ClientMessage::assistant("").with_tool_invocation(search_result(json!({"q": "x"}))),
            ClientMessage::user("bye"),
        ];

        let (live_prompt, history) = convert_to_model_messages(&messages);
        assert_eq!(live_prompt.as_deref(), Some("bye"));
        assert_eq!(history.len(), 4);
        assert_eq!(history[3].parts(), &[Part::user_prompt("bye")]);
    }

    #[test]
    fn test_unresolved_invocations_are_dropped() {
        let mut pending = search_result(json!({}));
        pending.state = Some(ToolInvocationState::Call);
        pending.result = None;
        let mut partial = search_result(json!({}));
        partial.tool_call_id = "b".to_string();
        partial.state = Some(ToolInvocationState::PartialCall);

        let messages = vec![
            ClientMessage::user("hi"),
            ClientMessage::assistant("Let me check")
                .with_tool_invocation(pending)
                .with_tool_invocation(partial),
        ];

        let (_, history) = convert_to_model_messages(&messages);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].parts(), &[Part::text("Let me check")]);
    }

    #[test]
    fn test_empty_assistant_and_other_roles_contribute_nothing() -> anyhow::Result<()> {
        let messages: Vec<ClientMessage> = serde_json::from_value(json!([
            {"role": "system", "content": "be nice"},
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": ""},
            {"role": "tool", "content": "ignored"}
        ]))?;

        let (live_prompt, history) = convert_to_model_messages(&messages);
        assert_eq!(live_prompt, None);
        assert_eq!(history, vec![ModelMessage::from(ModelRequest::new().with_user_prompt("hi"))]);
        Ok(())
    }

    #[test]
    fn test_raw_args_survive_round_trip_byte_for_byte() -> anyhow::Result<()> {
        let raw = r#"{"q":  "x",   "limit":10}"#;
        let messages: Vec<ClientMessage> = serde_json::from_value(json!([
            {"role": "user", "content": "hi"},
            {
                "role": "assistant",
                "content": "",
                "toolInvocations": [{
                    "toolCallId": "call_9",
                    "toolName": "search",
                    "args": raw,
                    "state": "result",
                    "result": {"hits": 3}
                }]
            }
        ]))?;

        let openai = convert_to_openai_messages(&messages);
        assert_eq!(openai.len(), 3);
        let call = &openai[1]["tool_calls"][0];
        assert_eq!(call["id"], "call_9");
        assert_eq!(call["function"]["name"], "search");
        assert_eq!(call["function"]["arguments"].as_str(), Some(raw));
        assert_eq!(
            openai[2],
            json!({"role": "tool", "tool_call_id": "call_9", "content": r#"{"hits":3}"#})
        );
        Ok(())
    }

    #[test]
    fn test_tool_identity_survives_round_trip() -> anyhow::Result<()> {
        let messages: Vec<ClientMessage> = serde_json::from_value(json!([
            {"role": "user", "content": "weather?"},
            {
                "role": "assistant",
                "content": "",
                "toolInvocations": [{
                    "toolCallId": "call.7",
                    "toolName": "get.weather",
                    "args": {"city": "Oslo"},
                    "state": "result",
                    "result": "rain"
                }]
            }
        ]))?;

        let openai = convert_to_openai_messages(&messages);
        let call = &openai[1]["tool_calls"][0];
        assert_eq!(call["id"], "call.7");
        assert_eq!(call["function"]["name"], "get.weather");
        assert_eq!(call["function"]["arguments"], r#"{"city":"Oslo"}"#);
        assert_eq!(openai[2]["tool_call_id"], "call.7");
        Ok(())
    }

    #[test]
    fn test_client_message_wire_format() -> anyhow::Result<()> {
        let message: ClientMessage = serde_json::from_value(json!({
            "id": "m1",
            "role": "assistant",
            "content": "done",
            "toolInvocations": [{"toolCallId": "a", "toolName": "t", "args": {}, "state": "partial-call"}],
            "experimental_attachments": [{"name": "a.png", "contentType": "image/png", "url": "data:,"}]
        }))?;

        assert_eq!(message.tool_invocations[0].state, Some(ToolInvocationState::PartialCall));
        assert_eq!(
            message.experimental_attachments.as_ref().map(|a| a[0].content_type.clone()),
            Some(Some("image/png".to_string()))
        );

        let value = serde_json::to_value(&message)?;
        assert_eq!(value["toolInvocations"][0]["toolCallId"], "a");
        assert!(value["toolInvocations"][0].get("result").is_none());
        Ok(())
    }
}
