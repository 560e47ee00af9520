use serde::{Deserialize, Serialize};

use super::args::{Args, ArgsMap};
use crate::errors::{ModelError, ModelResult};

/// A user utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPromptPart {
    pub content: String,
}

/// Model generated prose
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    pub content: String,
}

/// A request from the model to invoke a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub tool_name: String,
    pub tool_call_id: String,
    pub args: Args,
}

impl ToolCallPart {
    pub fn new<N: Into<String>, I: Into<String>>(tool_name: N, tool_call_id: I, args: Args) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            args,
        }
    }

    /// The structured arguments, parsing raw text if needed. Must succeed
    /// before the call is dispatched.
    pub fn parsed_args(&self) -> ModelResult<ArgsMap> {
        self.args
            .parse()
            .map_err(|e| ModelError::InvalidToolArguments {
                tool_call_id: self.tool_call_id.clone(),
                message: e.to_string(),
            })
    }
}

/// The textual result of a tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolReturnPart {
    pub tool_name: String,
    pub tool_call_id: String,
    pub content: String,
}

impl ToolReturnPart {
    pub fn new<N, I, C>(tool_name: N, tool_call_id: I, content: C) -> Self
    where
        N: Into<String>,
        I: Into<String>,
        C: Into<String>,
    {
        Self {
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part_kind", rename_all = "kebab-case")]
/// One semantic unit of a conversational turn
pub enum Part {
    UserPrompt(UserPromptPart),
    Text(TextPart),
    ToolCall(ToolCallPart),
    ToolReturn(ToolReturnPart),
}

impl Part {
    pub fn user_prompt<S: Into<String>>(content: S) -> Self {
        Part::UserPrompt(UserPromptPart {
            content: content.into(),
        })
    }

    pub fn text<S: Into<String>>(content: S) -> Self {
        Part::Text(TextPart {
            content: content.into(),
        })
    }

    pub fn tool_call<N: Into<String>, I: Into<String>>(tool_name: N, tool_call_id: I, args: Args) -> Self {
        Part::ToolCall(ToolCallPart::new(tool_name, tool_call_id, args))
    }

    pub fn tool_return<N, I, C>(tool_name: N, tool_call_id: I, content: C) -> Self
    where
        N: Into<String>,
        I: Into<String>,
        C: Into<String>,
    {
        Part::ToolReturn(ToolReturnPart::new(tool_name, tool_call_id, content))
    }

    /// Get the text if this is a user prompt or model text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::UserPrompt(part) => Some(&part.content),
            Part::Text(part) => Some(&part.content),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallPart> {
        if let Part::ToolCall(ref call) = self {
            Some(call)
        } else {
            None
        }
    }

    pub fn as_tool_return(&self) -> Option<&ToolReturnPart> {
        if let Part::ToolReturn(ref tool_return) = self {
            Some(tool_return)
        } else {
            None
        }
    }
}
