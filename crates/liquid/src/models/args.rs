use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Structured tool call arguments, argument name to value
pub type ArgsMap = Map<String, Value>;

#[derive(Error, Debug)]
pub enum ArgsParseError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Arguments of a tool call.
///
/// Exactly one representation is authoritative. `Raw` keeps the JSON text
/// exactly as a vendor or client produced it, so that it can be sent back
/// byte-for-byte; [`Args::parse`] turns it into a map on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Args {
    Structured(ArgsMap),
    Raw(String),
}

impl Default for Args {
    fn default() -> Self {
        Args::Structured(ArgsMap::new())
    }
}

impl Args {
    pub fn raw<S: Into<String>>(text: S) -> Self {
        Args::Raw(text.into())
    }

    pub fn structured(map: ArgsMap) -> Self {
        Args::Structured(map)
    }

    /// Interpret an arbitrary JSON value received over the wire.
    ///
    /// Strings are taken to be JSON text and kept raw, objects are structured,
    /// null means no arguments.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Args::Structured(map),
            Value::String(text) => Args::Raw(text),
            Value::Null => Args::default(),
            other => Args::Raw(other.to_string()),
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Args::Raw(_))
    }

    /// Parse into the structured form without changing `self`.
    ///
    /// Blank raw text is treated as an empty argument object, some vendors
    /// stream nothing at all for tools without parameters.
    pub fn parse(&self) -> Result<ArgsMap, ArgsParseError> {
        match self {
            Args::Structured(map) => Ok(map.clone()),
            Args::Raw(text) if text.trim().is_empty() => Ok(ArgsMap::new()),
            Args::Raw(text) => match serde_json::from_str::<Value>(text)? {
                Value::Object(map) => Ok(map),
                other => Err(ArgsParseError::NotAnObject(json_kind(&other))),
            },
        }
    }

    /// JSON text for the wire. Raw text is returned verbatim.
    pub fn to_json_text(&self) -> String {
        match self {
            Args::Raw(text) => text.clone(),
            Args::Structured(map) => Value::Object(map.clone()).to_string(),
        }
    }

    /// JSON value for vendors that take arguments as an object rather than text.
    pub fn to_value(&self) -> Result<Value, ArgsParseError> {
        self.parse().map(Value::Object)
    }
}

impl From<ArgsMap> for Args {
    fn from(map: ArgsMap) -> Self {
        Args::Structured(map)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
