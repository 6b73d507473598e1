use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PathwatchError, Result};

const MAX_ID_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TraceId(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpanId(String);

impl TraceId {
    pub fn parse(input: &str) -> Result<Self> {
        validate("trace id", input).map(|s| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl SpanId {
    pub fn parse(input: &str) -> Result<Self> {
        validate("span id", input).map(|s| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate<'a>(kind: &str, input: &'a str) -> Result<&'a str> {
    if input.trim().is_empty() {
        return Err(PathwatchError::Validation(format!("{kind} must not be empty")));
    }
    if input.len() > MAX_ID_LEN {
        return Err(PathwatchError::Validation(format!(
            "{kind} longer than {MAX_ID_LEN} bytes"
        )));
    }
    if input.chars().any(char::is_control) {
        return Err(PathwatchError::Validation(format!(
            "{kind} contains control characters: {input:?}"
        )));
    }
    Ok(input)
}

impl TryFrom<String> for TraceId {
    type Error = PathwatchError;

    fn try_from(value: String) -> Result<Self> {
        validate("trace id", &value)?;
        Ok(Self(value))
    }
}

impl TryFrom<String> for SpanId {
    type Error = PathwatchError;

    fn try_from(value: String) -> Result<Self> {
        validate("span id", &value)?;
        Ok(Self(value))
    }
}

impl From<TraceId> for String {
    fn from(value: TraceId) -> Self {
        value.0
    }
}

impl From<SpanId> for String {
    fn from(value: SpanId) -> Self {
        value.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
