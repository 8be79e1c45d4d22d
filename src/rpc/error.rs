use serde_json::{Value, json};
use thiserror::Error;

/// Structured JSON-RPC-facing errors. The dispatcher is the single place
/// that translates these into wire-format `{code, message, data}` objects.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Invalid Request")]
    InvalidRequest,
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("{0}")]
    Bundler { message: String, reason: &'static str },
}

impl RpcError {
    pub fn unsupported_entry_point(got: &str, expected: &str) -> Self {
        Self::Bundler {
            message: format!("Unsupported EntryPoint: got {got}, expected {expected}"),
            reason: "unsupported-entrypoint",
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidRequest => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::Internal(_) => -32603,
            Self::Bundler { .. } => -32500,
        }
    }

    pub fn to_json(&self, id: Value) -> Value {
        let mut error = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Self::Bundler { reason, .. } = self {
            if let Value::Object(map) = &mut error {
                map.insert("data".to_string(), json!({ "reason": reason }));
            }
        }
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": error,
        })
    }
}
