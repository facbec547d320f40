use std::marker::PhantomData;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::ParseError;
use crate::schema::StructuredOutput;

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("fenced json pattern is valid")
});

/// Converts raw model text into a validated `T`.
#[derive(Clone, Debug)]
pub struct OutputParser<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: StructuredOutput> OutputParser<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// Describes the exact JSON shape the model must reply with.
    pub fn format_instructions(&self) -> String {
        let schema = T::shape().json_schema();
        let rendered = serde_json::to_string(&schema).unwrap_or_default();

        format!(
            "The output should be formatted as a JSON instance that conforms to the JSON schema below.\n\n\
             As an example, for the schema {{\"properties\": {{\"foo\": {{\"type\": \"array\", \"items\": {{\"type\": \"string\"}}}}}}, \"required\": [\"foo\"]}}\n\
             the object {{\"foo\": [\"bar\", \"baz\"]}} is a well-formatted instance of the schema. \
             The object {{\"properties\": {{\"foo\": [\"bar\", \"baz\"]}}}} is not well-formatted.\n\n\
             Here is the output schema:\n```\n{rendered}\n```"
        )
    }

    pub fn parse(&self, raw: &str) -> Result<T, ParseError> {
        let candidate = extract_json_object(raw)
            .ok_or_else(|| ParseError::new(raw, "no JSON object found in model output"))?;

        let value = serde_json::from_str::<Value>(candidate)
            .map_err(|err| ParseError::new(raw, format!("malformed JSON: {err}")))?;

        T::shape()
            .validate(&value)
            .map_err(|reason| ParseError::new(raw, reason))?;

        serde_json::from_value::<T>(value)
            .map_err(|err| ParseError::new(raw, format!("payload rejected: {err}")))
    }
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    if let Some(captures) = FENCED_JSON.captures(raw) {
        if let Some(body) = captures.get(1) {
            return Some(body.as_str());
        }
    }

    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&raw[start..=end])
}
