use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::message::ModelMessage;
use super::part::Part;
use crate::errors::{ModelError, ModelResult};

/// An append-only history of turns, owned by a single request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<ModelMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn. Existing turns are never modified.
    pub fn append<M: Into<ModelMessage>>(&mut self, message: M) {
        self.messages.push(message.into());
    }

    pub fn with_message<M: Into<ModelMessage>>(mut self, message: M) -> Self {
        self.append(message);
        self
    }

    pub fn messages(&self) -> &[ModelMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<ModelMessage> {
        self.messages
    }

    /// Check that every tool call is answered exactly once by a later
    /// request, and that no tool return is orphaned.
    pub fn validate(&self) -> ModelResult<()> {
        // call id -> turn index of the response that issued it
        let mut pending: HashMap<&str, usize> = HashMap::new();
        let mut answered: HashSet<&str> = HashSet::new();

        for (turn, message) in self.messages.iter().enumerate() {
            match message {
                ModelMessage::Response(response) => {
                    let mut in_turn = HashSet::new();
                    for call in response.tool_calls() {
                        let id = call.tool_call_id.as_str();
                        if !in_turn.insert(id) {
                            return Err(ModelError::MalformedConversation(format!(
                                "tool call id '{}' is duplicated in turn {}",
                                id, turn
                            )));
                        }
                        if pending.contains_key(id) || answered.contains(id) {
                            return Err(ModelError::MalformedConversation(format!(
                                "tool call id '{}' in turn {} reuses an earlier call id",
                                id, turn
                            )));
                        }
                        pending.insert(id, turn);
                    }
                    if let Some(part) = response.parts.iter().find(|p| p.as_tool_return().is_some())
                    {
                        return Err(ModelError::MalformedConversation(format!(
                            "turn {} is a response but carries a tool return: {:?}",
                            turn, part
                        )));
                    }
                }
                ModelMessage::Request(request) => {
                    for part in &request.parts {
                        match part {
                            Part::ToolReturn(tool_return) => {
                                let id = tool_return.tool_call_id.as_str();
                                if pending.remove(id).is_none() {
                                    let reason = if answered.contains(id) {
                                        "answers a call that already has a return"
                                    } else {
                                        "does not match any earlier tool call"
                                    };
                                    return Err(ModelError::MalformedConversation(format!(
                                        "tool return '{}' in turn {} {}",
                                        id, turn, reason
                                    )));
                                }
                                answered.insert(id);
                            }
                            Part::ToolCall(call) => {
                                return Err(ModelError::MalformedConversation(format!(
                                    "turn {} is a request but carries tool call '{}'",
                                    turn, call.tool_call_id
                                )));
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        if let Some((id, turn)) = pending.into_iter().min_by_key(|(_, turn)| *turn) {
            return Err(ModelError::MalformedConversation(format!(
                "tool call '{}' in turn {} has no matching tool return",
                id, turn
            )));
        }

        Ok(())
    }
}

impl From<Vec<ModelMessage>> for Conversation {
    fn from(messages: Vec<ModelMessage>) -> Self {
        Self { messages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::args::Args;
    use crate::models::message::{ModelRequest, ModelResponse};

    fn call_and_return(id: &str) -> Conversation {
        Conversation::new()
            .with_message(ModelRequest::new().with_user_prompt("hi"))
            .with_message(ModelResponse::new().with_tool_call("search", id, Args::raw("{}")))
            .with_message(ModelRequest::new().with_tool_return("search", id, "3 hits"))
    }

    fn assert_malformed(conversation: &Conversation, needle: &str) {
        match conversation.validate() {
            Err(ModelError::MalformedConversation(msg)) => {
                assert!(msg.contains(needle), "unexpected message: {}", msg)
            }
            other => panic!("Expected MalformedConversation, got {:?}", other),
        }
    }

    #[test]
    fn test_well_formed_conversation_validates() {
        assert!(Conversation::new().validate().is_ok());
        assert!(call_and_return("a").validate().is_ok());

        let text_only = Conversation::new()
            .with_message(ModelRequest::new().with_user_prompt("hi"))
            .with_message(ModelResponse::new().with_text("hello"));
        assert!(text_only.validate().is_ok());
    }

    #[test]
    fn test_return_need_not_be_immediate() {
        let conversation = Conversation::new()
            .with_message(
                ModelResponse::new()
                    .with_tool_call("search", "a", Args::raw("{}"))
                    .with_tool_call("fetch", "b", Args::raw("{}")),
            )
            .with_message(ModelRequest::new().with_tool_return("fetch", "b", "page"))
            .with_message(ModelRequest::new().with_user_prompt("and?"))
            .with_message(ModelRequest::new().with_tool_return("search", "a", "hits"));
        assert!(conversation.validate().is_ok());
    }

    #[test]
    fn test_unanswered_call_is_rejected() {
        let conversation = Conversation::new()
            .with_message(ModelResponse::new().with_tool_call("search", "a", Args::raw("{}")));
        assert_malformed(&conversation, "has no matching tool return");
    }

    #[test]
    fn test_orphan_return_is_rejected() {
        let conversation =
            Conversation::new().with_message(ModelRequest::new().with_tool_return("search", "x", "?"));
        assert_malformed(&conversation, "does not match any earlier tool call");
    }

    #[test]
    fn test_return_before_call_is_rejected() {
        let conversation = Conversation::new()
            .with_message(ModelRequest::new().with_tool_return("search", "a", "early"))
            .with_message(ModelResponse::new().with_tool_call("search", "a", Args::raw("{}")));
        assert_malformed(&conversation, "does not match any earlier tool call");
    }

    #[test]
    fn test_duplicate_id_in_turn_is_rejected() {
        let conversation = Conversation::new().with_message(
            ModelResponse::new()
                .with_tool_call("search", "a", Args::raw("{}"))
                .with_tool_call("search", "a", Args::raw("{}")),
        );
        assert_malformed(&conversation, "duplicated in turn 0");
    }

    #[test]
    fn test_second_return_is_rejected() {
        let conversation = call_and_return("a")
            .with_message(ModelRequest::new().with_tool_return("search", "a", "again"));
        assert_malformed(&conversation, "already has a return");
    }

    #[test]
    fn test_append_keeps_history() {
        let mut conversation = call_and_return("a");
        let before = conversation.messages().to_vec();
        conversation.append(ModelResponse::new().with_text("3 hits found"));
        assert_eq!(conversation.len(), 4);
        assert_eq!(&conversation.messages()[..3], before.as_slice());
    }
}
