//! Built-in tools: echo, timestamp, random_number.

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde_json::{Value, json};

use super::BuiltinTool;
use crate::error::{ToolError, ToolResult};

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Echoes its input back, stamped with the current time.
pub struct EchoTool;

#[async_trait::async_trait]
impl BuiltinTool for EchoTool {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn description(&self) -> &'static str {
        "Echo a message back, with a server timestamp."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Text to echo back"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolResult<Value> {
        let message = arguments
            .get("message")
            .cloned()
            .ok_or_else(|| ToolError::validation("message", "is required"))?;

        Ok(json!({
            "echo": message,
            "timestamp": now_iso8601(),
        }))
    }
}

/// Reports the current time in ISO 8601.
pub struct TimestampTool;

#[async_trait::async_trait]
impl BuiltinTool for TimestampTool {
    fn name(&self) -> &'static str {
        "timestamp"
    }

    fn description(&self) -> &'static str {
        "Current server time in ISO 8601."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _arguments: Value) -> ToolResult<Value> {
        Ok(json!({ "timestamp": now_iso8601() }))
    }
}

/// Uniform random integer in a caller-supplied inclusive range.
pub struct RandomNumberTool;

#[async_trait::async_trait]
impl BuiltinTool for RandomNumberTool {
    fn name(&self) -> &'static str {
        "random_number"
    }

    fn description(&self) -> &'static str {
        "Random integer between min and max, inclusive."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "min": {
                    "type": "integer",
                    "description": "Lower bound, inclusive"
                },
                "max": {
                    "type": "integer",
                    "description": "Upper bound, inclusive"
                }
            },
            "required": ["min", "max"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolResult<Value> {
        let min = arguments
            .get("min")
            .and_then(Value::as_i64)
            .ok_or_else(|| ToolError::validation("min", "must be an integer"))?;
        let max = arguments
            .get("max")
            .and_then(Value::as_i64)
            .ok_or_else(|| ToolError::validation("max", "must be an integer"))?;
        if min > max {
            return Err(ToolError::validation("min", "must not exceed max"));
        }

        let number = rand::rng().random_range(min..=max);
        Ok(json!({ "number": number, "min": min, "max": max }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_requires_message() {
        let err = EchoTool.execute(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("message"));

        let out = EchoTool.execute(json!({"message": "hi"})).await.unwrap();
        assert_eq!(out["echo"], "hi");
        assert!(out["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_timestamp_is_iso8601() {
        let out = TimestampTool.execute(json!({})).await.unwrap();
        let stamp = out["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    #[tokio::test]
    async fn test_random_number_bounds() {
        let out = RandomNumberTool
            .execute(json!({"min": 3, "max": 7}))
            .await
            .unwrap();
        let n = out["number"].as_i64().unwrap();
        assert!((3..=7).contains(&n));
        assert_eq!(out["min"], 3);
        assert_eq!(out["max"], 7);
    }

    #[tokio::test]
    async fn test_random_number_rejects_inverted_range() {
        assert!(RandomNumberTool.execute(json!({"min": 7, "max": 3})).await.is_err());
        assert!(RandomNumberTool.execute(json!({"min": 1})).await.is_err());
    }

    #[tokio::test]
    async fn test_degenerate_range() {
        let out = RandomNumberTool
            .execute(json!({"min": 5, "max": 5}))
            .await
            .unwrap();
        assert_eq!(out["number"], 5);
    }
}
