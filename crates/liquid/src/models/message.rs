use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::args::Args;
use super::part::{Part, ToolCallPart};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Content supplied to the model: user prompts and tool returns
pub struct ModelRequest {
    pub parts: Vec<Part>,
}

impl ModelRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add any Part to the request
    pub fn with_part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    pub fn with_user_prompt<S: Into<String>>(self, content: S) -> Self {
        self.with_part(Part::user_prompt(content))
    }

    pub fn with_tool_return<N, I, C>(self, tool_name: N, tool_call_id: I, content: C) -> Self
    where
        N: Into<String>,
        I: Into<String>,
        C: Into<String>,
    {
        self.with_part(Part::tool_return(tool_name, tool_call_id, content))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Content produced by the model: text and tool calls
pub struct ModelResponse {
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Default for ModelResponse {
    fn default() -> Self {
        Self {
            parts: Vec::new(),
            model_name: None,
            timestamp: Utc::now(),
        }
    }
}

impl ModelResponse {
    /// Create an empty response stamped with the current time
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(parts: Vec<Part>) -> Self {
        Self {
            parts,
            ..Self::default()
        }
    }

    pub fn with_part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    pub fn with_text<S: Into<String>>(self, content: S) -> Self {
        self.with_part(Part::text(content))
    }

    pub fn with_tool_call<N: Into<String>, I: Into<String>>(
        self,
        tool_name: N,
        tool_call_id: I,
        args: Args,
    ) -> Self {
        self.with_part(Part::tool_call(tool_name, tool_call_id, args))
    }

    pub fn with_model_name<S: Into<String>>(mut self, model_name: S) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.parts.iter().filter_map(Part::as_tool_call)
    }

    /// All text parts joined together
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.content.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
/// One conversational turn
pub enum ModelMessage {
    Request(ModelRequest),
    Response(ModelResponse),
}

impl ModelMessage {
    pub fn parts(&self) -> &[Part] {
        match self {
            ModelMessage::Request(request) => &request.parts,
            ModelMessage::Response(response) => &response.parts,
        }
    }

    pub fn as_request(&self) -> Option<&ModelRequest> {
        if let ModelMessage::Request(ref request) = self {
            Some(request)
        } else {
            None
        }
    }

    pub fn as_response(&self) -> Option<&ModelResponse> {
        if let ModelMessage::Response(ref response) = self {
            Some(response)
        } else {
            None
        }
    }
}

impl From<ModelRequest> for ModelMessage {
    fn from(request: ModelRequest) -> Self {
        ModelMessage::Request(request)
    }
}

impl From<ModelResponse> for ModelMessage {
    fn from(response: ModelResponse) -> Self {
        ModelMessage::Response(response)
    }
}
