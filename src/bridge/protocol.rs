//! Wire protocol types for parent-worker communication.
//!
//! One duplex stream, strictly one outstanding request/response pair at a
//! time. Because ordering is one-at-a-time there is no correlation id; the
//! next response on the stream always belongs to the last request written.

use serde::{Deserialize, Serialize};

/// Frames from parent to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireRequest {
    /// Execute one engine method with positional arguments.
    Call {
        method: String,
        #[serde(default)]
        args: Vec<serde_json::Value>,
    },

    /// Graceful shutdown; the worker finishes up and exits.
    Shutdown,
}

/// Frames from worker to parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireResponse {
    /// The command succeeded.
    Result {
        #[serde(default)]
        value: serde_json::Value,
    },

    /// The engine rejected the command. `code` is the engine's error code
    /// name; the connection itself remains usable.
    Error { code: String, message: String },
}

impl WireResponse {
    pub fn result(value: serde_json::Value) -> Self {
        WireResponse::Result { value }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        WireResponse::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_serializes_with_type_tag() {
        let req = WireRequest::Call {
            method: "query".to_string(),
            args: vec![json!("SELECT 1")],
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"type": "call", "method": "query", "args": ["SELECT 1"]})
        );
    }

    #[test]
    fn shutdown_serializes_as_bare_tag() {
        assert_eq!(
            serde_json::to_value(WireRequest::Shutdown).unwrap(),
            json!({"type": "shutdown"})
        );
    }

    #[test]
    fn call_args_default_to_empty() {
        let req: WireRequest = serde_json::from_value(json!({
            "type": "call",
            "method": "pid"
        }))
        .unwrap();
        assert_eq!(
            req,
            WireRequest::Call {
                method: "pid".to_string(),
                args: vec![],
            }
        );
    }

    #[test]
    fn result_roundtrips() {
        let resp = WireResponse::result(json!({"columns": ["x"], "rows": [[1]]}));
        let encoded = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            encoded,
            json!({"type": "result", "value": {"columns": ["x"], "rows": [[1]]}})
        );
        let decoded: WireResponse = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn error_carries_code_and_message() {
        let resp = WireResponse::error("SQLITE_ERROR", "no such table: t");
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"type": "error", "code": "SQLITE_ERROR", "message": "no such table: t"})
        );
    }
}
