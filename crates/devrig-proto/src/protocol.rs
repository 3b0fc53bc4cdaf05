// Messages spoken between the harness and an instrumentation agent running
// inside a pod. Transported as JSON over HTTP through a port tunnel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const RPC_PATH: &str = "/rpc";
pub const HEALTH_PATH: &str = "/healthz";

/// Every agent answers this method by shutting itself down.
pub const SHUTDOWN_METHOD: &str = "TestAgent.Shutdown";
pub const LIST_DIR_METHOD: &str = "ApplicationAgent.ListDir";
pub const EXEC_METHOD: &str = "ApplicationAgent.Exec";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl AgentRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(message.into()),
        }
    }

    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShutdownRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShutdownResponse {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListDirRequest {
    pub dir: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListDirResponse {
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecRequest {
    #[serde(default)]
    pub dir: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}
