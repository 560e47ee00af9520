//! Assembly of streamed model output into finished response parts.
//!
//! Vendors stream a response as small deltas: text fragments, tool names and
//! fragments of tool argument JSON, each keyed by a slot the vendor assigns
//! (an index, or an id). [`PartsManager`] folds those deltas into one part per
//! slot. It performs no I/O and never suspends, so it can be driven from a
//! plain `Vec` of deltas in tests just as well as from a network stream.

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;

use super::base::Usage;
use crate::errors::{ModelError, ModelResult};
use crate::models::args::{Args, ArgsMap};
use crate::models::part::Part;

/// Identifies the in-progress part a delta belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotKey {
    Index(u32),
    Id(String),
}

impl SlotKey {
    pub fn id<S: Into<String>>(id: S) -> Self {
        SlotKey::Id(id.into())
    }
}

impl SlotKey {
    /// Call id for a tool call slot whose vendor sent none. Index slots get a
    /// prefix so they cannot be confused with an id slot spelling the number.
    fn fallback_call_id(&self) -> String {
        match self {
            SlotKey::Index(index) => format!("call_{}", index),
            SlotKey::Id(id) => id.clone(),
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKey::Index(index) => write!(f, "{}", index),
            SlotKey::Id(id) => write!(f, "{}", id),
        }
    }
}

impl From<u32> for SlotKey {
    fn from(index: u32) -> Self {
        SlotKey::Index(index)
    }
}

impl From<&str> for SlotKey {
    fn from(id: &str) -> Self {
        SlotKey::Id(id.to_string())
    }
}

/// One incremental event of a streamed response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    Text {
        slot: SlotKey,
        content: String,
    },
    /// Sets the tool name. Vendors that send the call id alongside the name
    /// provide it here; otherwise the call id is derived from the slot key.
    ToolName {
        slot: SlotKey,
        tool_name: String,
        tool_call_id: Option<String>,
    },
    ToolArgs {
        slot: SlotKey,
        args: String,
    },
    PartFinished {
        slot: SlotKey,
    },
    Usage(Usage),
    /// The vendor signalled the end of the response
    Finished,
}

impl StreamDelta {
    pub fn text<S: Into<String>>(slot: SlotKey, content: S) -> Self {
        StreamDelta::Text {
            slot,
            content: content.into(),
        }
    }

    pub fn tool_name<S: Into<String>>(slot: SlotKey, tool_name: S, tool_call_id: Option<String>) -> Self {
        StreamDelta::ToolName {
            slot,
            tool_name: tool_name.into(),
            tool_call_id,
        }
    }

    pub fn tool_args<S: Into<String>>(slot: SlotKey, args: S) -> Self {
        StreamDelta::ToolArgs {
            slot,
            args: args.into(),
        }
    }

    pub fn part_finished(slot: SlotKey) -> Self {
        StreamDelta::PartFinished { slot }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Empty,
    Accumulating,
    Finished,
}

#[derive(Debug)]
struct ToolCallSlot {
    tool_name: String,
    tool_call_id: Option<String>,
    args: String,
    parsed: Option<ArgsMap>,
    finished: bool,
}

impl ToolCallSlot {
    fn new(tool_name: String, tool_call_id: Option<String>) -> Self {
        Self {
            tool_name,
            tool_call_id,
            args: String::new(),
            parsed: None,
            finished: false,
        }
    }

    fn call_id(&self, slot: &SlotKey) -> String {
        self.tool_call_id
            .clone()
            .unwrap_or_else(|| slot.fallback_call_id())
    }
}

#[derive(Debug)]
enum Slot {
    Text(String),
    ToolCall(ToolCallSlot),
}

/// Folds [`StreamDelta`]s into response parts, ordered by the first
/// appearance of each slot key.
#[derive(Debug)]
pub struct PartsManager {
    slots: IndexMap<SlotKey, Slot>,
    state: StreamState,
    usage: Usage,
    errors: Vec<ModelError>,
}

impl Default for PartsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PartsManager {
    pub fn new() -> Self {
        Self {
            slots: IndexMap::new(),
            state: StreamState::Empty,
            usage: Usage::default(),
            errors: Vec::new(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == StreamState::Finished
    }

    /// Fold one delta into the state.
    ///
    /// An error only concerns the delta itself, the manager is left as it was
    /// and keeps accepting deltas for other slots.
    pub fn apply(&mut self, delta: StreamDelta) -> ModelResult<()> {
        if self.state == StreamState::Finished {
            return Err(ModelError::UnexpectedModelBehavior(format!(
                "delta received after the stream finished: {:?}",
                delta
            )));
        }

        match delta {
            StreamDelta::Text { slot, content } => self.handle_text(slot, content)?,
            StreamDelta::ToolName {
                slot,
                tool_name,
                tool_call_id,
            } => self.handle_tool_name(slot, tool_name, tool_call_id)?,
            StreamDelta::ToolArgs { slot, args } => self.handle_tool_args(slot, args)?,
            StreamDelta::PartFinished { slot } => self.handle_part_finished(slot)?,
            StreamDelta::Usage(usage) => self.usage.incr(&usage),
            StreamDelta::Finished => {
                self.finish();
                return Ok(());
            }
        }

        self.state = StreamState::Accumulating;
        Ok(())
    }

    fn handle_text(&mut self, slot: SlotKey, content: String) -> ModelResult<()> {
        match self.slots.get_mut(&slot) {
            Some(Slot::Text(text)) => {
                text.push_str(&content);
                Ok(())
            }
            Some(Slot::ToolCall(_)) => Err(ModelError::UnexpectedModelBehavior(format!(
                "text delta for tool call slot {}",
                slot
            ))),
            None => {
                self.slots.insert(slot, Slot::Text(content));
                Ok(())
            }
        }
    }

    fn handle_tool_name(
        &mut self,
        slot: SlotKey,
        tool_name: String,
        tool_call_id: Option<String>,
    ) -> ModelResult<()> {
        match self.slots.get_mut(&slot) {
            Some(Slot::ToolCall(call)) => {
                if call.finished {
                    return Err(ModelError::UnexpectedModelBehavior(format!(
                        "tool name delta for finished tool call slot {}",
                        slot
                    )));
                }
                call.tool_name = tool_name;
                if tool_call_id.is_some() {
                    call.tool_call_id = tool_call_id;
                }
                Ok(())
            }
            Some(Slot::Text(_)) => Err(ModelError::UnexpectedModelBehavior(format!(
                "tool name delta for text slot {}",
                slot
            ))),
            None => {
                self.slots
                    .insert(slot, Slot::ToolCall(ToolCallSlot::new(tool_name, tool_call_id)));
                Ok(())
            }
        }
    }

    fn handle_tool_args(&mut self, slot: SlotKey, args: String) -> ModelResult<()> {
        match self.slots.get_mut(&slot) {
            Some(Slot::ToolCall(call)) => {
                if call.finished {
                    return Err(ModelError::UnexpectedModelBehavior(format!(
                        "tool arguments delta for finished tool call slot {}",
                        slot
                    )));
                }
                call.args.push_str(&args);
                Ok(())
            }
            Some(Slot::Text(_)) => Err(ModelError::UnexpectedModelBehavior(format!(
                "tool arguments delta for text slot {}",
                slot
            ))),
            None => {
                let mut call = ToolCallSlot::new(String::new(), None);
                call.args = args;
                self.slots.insert(slot, Slot::ToolCall(call));
                Ok(())
            }
        }
    }

    fn handle_part_finished(&mut self, slot: SlotKey) -> ModelResult<()> {
        match self.slots.get_mut(&slot) {
            Some(Slot::ToolCall(call)) => {
                call.finished = true;
                Ok(())
            }
            Some(Slot::Text(_)) => Ok(()),
            None => Err(ModelError::UnexpectedModelBehavior(format!(
                "finish marker for unknown slot {}",
                slot
            ))),
        }
    }

    /// Complete the stream: parse the arguments of every tool call.
    ///
    /// Returns the tool call errors: one per call whose arguments fail to
    /// parse, and one per repeated call id. Failing calls are still part of
    /// [`PartsManager::get_parts`], with their raw text. Calling it again
    /// returns the same errors.
    pub fn finish(&mut self) -> &[ModelError] {
        if self.state != StreamState::Finished {
            let mut seen_ids = HashSet::new();
            for (slot, entry) in self.slots.iter_mut() {
                if let Slot::ToolCall(call) = entry {
                    let tool_call_id = call.call_id(slot);
                    if !seen_ids.insert(tool_call_id.clone()) {
                        tracing::warn!(%tool_call_id, "tool call id used by more than one slot");
                        self.errors.push(ModelError::UnexpectedModelBehavior(format!(
                            "duplicate tool call id {}",
                            tool_call_id
                        )));
                    }
                    match Args::raw(call.args.as_str()).parse() {
                        Ok(map) => call.parsed = Some(map),
                        Err(e) => {
                            tracing::warn!(%tool_call_id, error = %e, "invalid tool call arguments");
                            self.errors.push(ModelError::InvalidToolArguments {
                                tool_call_id,
                                message: e.to_string(),
                            });
                        }
                    }
                    call.finished = true;
                }
            }
            self.state = StreamState::Finished;
        }
        &self.errors
    }

    /// Parts accumulated so far, in first-appearance order.
    ///
    /// Never fails. Text slots that are still empty are left out. Before
    /// completion tool calls carry their raw argument text, which may be
    /// incomplete JSON.
    pub fn get_parts(&self) -> Vec<Part> {
        self.slots
            .iter()
            .filter_map(|(slot, entry)| match entry {
                Slot::Text(text) if text.is_empty() => None,
                Slot::Text(text) => Some(Part::text(text.clone())),
                Slot::ToolCall(call) => {
                    let args = match &call.parsed {
                        Some(map) => Args::Structured(map.clone()),
                        None => Args::Raw(call.args.clone()),
                    };
                    Some(Part::tool_call(call.tool_name.clone(), call.call_id(slot), args))
                }
            })
            .collect()
    }

    /// Tool call ids whose argument JSON is incomplete and that were never
    /// finished, as left behind by an abandoned stream.
    pub fn unterminated_tool_calls(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter_map(|(slot, entry)| match entry {
                Slot::ToolCall(call)
                    if !call.finished && Args::raw(call.args.as_str()).parse().is_err() =>
                {
                    Some(call.call_id(slot))
                }
                _ => None,
            })
            .collect()
    }

    /// Usage summed over all fragments so far. Provisional until finished.
    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn tool_argument_errors(&self) -> &[ModelError] {
        &self.errors
    }
}
