use std::path::{Path, PathBuf};
use std::sync::Arc;

use devrig_proto::{
    AgentRequest, AgentResponse, ExecRequest, ListDirRequest, ListDirResponse, ShutdownResponse,
    EXEC_METHOD, LIST_DIR_METHOD, SHUTDOWN_METHOD,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::features::agent_rpc::repo::{WorkspaceRepo, WorkspaceRepoError};

#[derive(Debug, thiserror::Error)]
pub enum AgentRpcServiceError {
    #[error("unknown method {0}")]
    UnknownMethod(String),
    #[error("invalid params for {method}: {message}")]
    InvalidParams { method: String, message: String },
    #[error(transparent)]
    Workspace(#[from] WorkspaceRepoError),
}

/// Answers agent RPC calls. Shutdown only signals; the server owns the exit.
#[derive(Clone)]
pub struct AgentRpcService {
    repo: Arc<dyn WorkspaceRepo>,
    shutdown: CancellationToken,
}

impl AgentRpcService {
    pub fn new(repo: Arc<dyn WorkspaceRepo>, shutdown: CancellationToken) -> Self {
        Self { repo, shutdown }
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub async fn handle(&self, request: AgentRequest) -> AgentResponse {
        debug!(method = %request.method, "Agent call");
        match self.dispatch(request).await {
            Ok(result) => AgentResponse::ok(result),
            Err(error) => {
                warn!(error = %error, "Agent call failed");
                AgentResponse::err(error.to_string())
            }
        }
    }

    async fn dispatch(
        &self,
        request: AgentRequest,
    ) -> Result<serde_json::Value, AgentRpcServiceError> {
        let AgentRequest { method, params } = request;
        match method.as_str() {
            SHUTDOWN_METHOD => {
                info!("Shutdown requested");
                self.shutdown.cancel();
                encode(&method, &ShutdownResponse::default())
            }
            LIST_DIR_METHOD => {
                let request: ListDirRequest = decode(&method, params)?;
                let files = self.repo.list_dir(Path::new(&request.dir)).await?;
                encode(&method, &ListDirResponse { files })
            }
            EXEC_METHOD => {
                let request: ExecRequest = decode(&method, params)?;
                let dir = (!request.dir.is_empty()).then(|| PathBuf::from(&request.dir));
                let output = self.repo.run(dir, request.command, request.args).await?;
                encode(&method, &output)
            }
            _ => Err(AgentRpcServiceError::UnknownMethod(method)),
        }
    }
}

fn decode<T: DeserializeOwned>(
    method: &str,
    params: serde_json::Value,
) -> Result<T, AgentRpcServiceError> {
    serde_json::from_value(params).map_err(|e| AgentRpcServiceError::InvalidParams {
        method: method.to_string(),
        message: e.to_string(),
    })
}

fn encode<T: Serialize>(method: &str, value: &T) -> Result<serde_json::Value, AgentRpcServiceError> {
    serde_json::to_value(value).map_err(|e| AgentRpcServiceError::InvalidParams {
        method: method.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::agent_rpc::repo::MockWorkspaceRepo;
    use devrig_proto::ExecResponse;
    use serde_json::json;

    fn service(repo: MockWorkspaceRepo) -> AgentRpcService {
        AgentRpcService::new(Arc::new(repo), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_shutdown_cancels_token() {
        let service = service(MockWorkspaceRepo::new());
        let response = service
            .handle(AgentRequest::new(SHUTDOWN_METHOD, json!({})))
            .await;

        assert_eq!(response.into_result(), Ok(json!({})));
        assert!(service.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_list_dir_goes_through_repo() {
        let mut repo = MockWorkspaceRepo::new();
        repo.expect_list_dir()
            .withf(|dir| dir == Path::new("/workspace"))
            .times(1)
            .returning(|_| Ok(vec!["README.md".to_string()]));

        let result = service(repo)
            .handle(AgentRequest::new(LIST_DIR_METHOD, json!({ "dir": "/workspace" })))
            .await
            .into_result()
            .unwrap();

        let listed: ListDirResponse = serde_json::from_value(result).unwrap();
        assert_eq!(listed.files, vec!["README.md".to_string()]);
    }

    #[tokio::test]
    async fn test_exec_without_dir_uses_agent_cwd() {
        let mut repo = MockWorkspaceRepo::new();
        repo.expect_run()
            .withf(|dir, command, args| dir.is_none() && command == "git" && args == &["status".to_string()])
            .times(1)
            .returning(|_, _, _| {
                Ok(ExecResponse {
                    stdout: "clean".to_string(),
                    stderr: String::new(),
                    exit_code: 0,
                })
            });

        let result = service(repo)
            .handle(AgentRequest::new(
                EXEC_METHOD,
                json!({ "command": "git", "args": ["status"] }),
            ))
            .await
            .into_result()
            .unwrap();

        let output: ExecResponse = serde_json::from_value(result).unwrap();
        assert_eq!(output.stdout, "clean");
    }

    #[tokio::test]
    async fn test_unknown_method_is_an_error_response() {
        let response = service(MockWorkspaceRepo::new())
            .handle(AgentRequest::new("ApplicationAgent.Reboot", json!({})))
            .await;
        assert_eq!(
            response.into_result(),
            Err("unknown method ApplicationAgent.Reboot".to_string())
        );
    }

    #[tokio::test]
    async fn test_bad_params_are_reported() {
        let response = service(MockWorkspaceRepo::new())
            .handle(AgentRequest::new(LIST_DIR_METHOD, json!({ "directory": 1 })))
            .await;
        let error = response.into_result().unwrap_err();
        assert!(error.starts_with("invalid params for ApplicationAgent.ListDir"));
    }
}
