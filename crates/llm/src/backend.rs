//! The backend capability interface: one concrete endpoint integration
//! supplies request preparation, transmission, and response parsing; the
//! resilient client owns everything around those three hooks.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use pipeline::provider::{LlmError, StructuredRequest};

/// Hooks a concrete endpoint integration implements.
///
/// `transmit` performs exactly one attempt under the timeout it is handed;
/// admission control, retries and backoff are the client's concern and must
/// not be duplicated inside a backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for log events (e.g. `"openai-compat"`).
    fn name(&self) -> &str;

    /// Builds the wire body for one logical request.
    fn prepare(&self, request: &StructuredRequest) -> Value;

    /// Sends the body and returns the raw completion envelope.
    async fn transmit(&self, body: &Value, timeout: Duration) -> Result<Value, LlmError>;

    /// Extracts the generated JSON object from the raw envelope.
    fn parse(&self, raw: &Value) -> Result<Value, LlmError>;
}

/// Interprets generated text as one JSON object.
///
/// Generators occasionally wrap the object in prose or fences despite
/// instructions; before declaring failure, the substring from the first `{`
/// to the last `}` is re-parsed.
pub fn salvage_json_object(text: &str) -> Result<Value, LlmError> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        return Ok(Value::Object(map));
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&text[start..=end]) {
                return Ok(Value::Object(map));
            }
        }
    }
    Err(LlmError::Malformed(preview(text)))
}

// Error-message preview; raw completions can be arbitrarily long.
fn preview(text: &str) -> String {
    const LIMIT: usize = 200;
    if text.len() <= LIMIT {
        text.to_owned()
    } else {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < LIMIT)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}…", &text[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direct_object_parses() {
        let value = salvage_json_object(r#"{"a": 1}"#).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn object_is_salvaged_from_surrounding_prose() {
        let text = "Here is the result:\n```json\n{\"a\": [1, 2]}\n```\nHope that helps!";
        let value = salvage_json_object(text).unwrap();
        assert_eq!(value, json!({"a": [1, 2]}));
    }

    #[test]
    fn nested_braces_survive_salvage() {
        let text = "result {\"outer\": {\"inner\": \"x\"}} trailing";
        let value = salvage_json_object(text).unwrap();
        assert_eq!(value, json!({"outer": {"inner": "x"}}));
    }

    #[test]
    fn top_level_array_is_malformed() {
        assert!(matches!(
            salvage_json_object("[1, 2, 3]"),
            Err(LlmError::Malformed(_))
        ));
    }

    #[test]
    fn plain_prose_is_malformed() {
        assert!(matches!(
            salvage_json_object("no json here"),
            Err(LlmError::Malformed(_))
        ));
    }

    #[test]
    fn long_input_is_previewed_in_error() {
        let text = "x".repeat(5000);
        match salvage_json_object(&text) {
            Err(LlmError::Malformed(msg)) => assert!(msg.len() < 300),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
