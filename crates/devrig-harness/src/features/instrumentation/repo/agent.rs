use crate::shared::error::{HarnessError, HarnessResult};
use devrig_proto::{
    AgentRequest, AgentResponse, ExecRequest, ExecResponse, ListDirRequest, ListDirResponse,
    ShutdownRequest, EXEC_METHOD, HEALTH_PATH, LIST_DIR_METHOD, RPC_PATH,
    SHUTDOWN_METHOD,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// RPC client for an agent reachable on a local port.
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
}

impl AgentClient {
    pub fn new(addr: SocketAddr) -> HarnessResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| HarnessError::Agent(format!("cannot build agent client: {e}")))?;
        Ok(Self {
            http,
            base_url: format!("http://{addr}"),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Succeeds once the agent answers its health check.
    pub async fn dial(&self) -> HarnessResult<()> {
        self.http
            .get(format!("{}{HEALTH_PATH}", self.base_url))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| HarnessError::Agent(format!("cannot reach agent: {e}")))?;
        Ok(())
    }

    async fn send(&self, method: &str, params: serde_json::Value) -> Result<AgentResponse, reqwest::Error> {
        self.http
            .post(format!("{}{RPC_PATH}", self.base_url))
            .json(&AgentRequest::new(method, params))
            .send()
            .await?
            .error_for_status()?
            .json::<AgentResponse>()
            .await
    }

    pub async fn call<Req, Resp>(&self, method: &str, params: &Req) -> HarnessResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let params = serde_json::to_value(params)
            .map_err(|e| HarnessError::Agent(format!("cannot encode {method} request: {e}")))?;
        let response = self
            .send(method, params)
            .await
            .map_err(|e| HarnessError::Agent(format!("{method} failed: {e}")))?;
        let result = response
            .into_result()
            .map_err(|e| HarnessError::Agent(format!("{method} failed: {e}")))?;
        serde_json::from_value(result)
            .map_err(|e| HarnessError::Agent(format!("cannot decode {method} response: {e}")))
    }

    /// Asks the agent to exit. An agent that already went away counts as shut down.
    pub async fn shutdown(&self) -> HarnessResult<()> {
        let params = serde_json::to_value(ShutdownRequest::default())
            .map_err(|e| HarnessError::Agent(format!("cannot encode shutdown request: {e}")))?;
        match self.send(SHUTDOWN_METHOD, params).await {
            Ok(response) => {
                response
                    .into_result()
                    .map_err(|e| HarnessError::Agent(format!("cannot shutdown agent: {e}")))?;
                Ok(())
            }
            Err(e) if e.is_connect() || e.is_request() => {
                debug!(error = %e, "Agent connection already shut down");
                Ok(())
            }
            Err(e) => Err(HarnessError::Agent(format!("cannot shutdown agent: {e}"))),
        }
    }

    pub async fn list_dir(&self, dir: &str) -> HarnessResult<Vec<String>> {
        let response: ListDirResponse = self
            .call(
                LIST_DIR_METHOD,
                &ListDirRequest {
                    dir: dir.to_string(),
                },
            )
            .await?;
        Ok(response.files)
    }

    pub async fn exec(&self, request: &ExecRequest) -> HarnessResult<ExecResponse> {
        self.call(EXEC_METHOD, request).await
    }
}
