use crate::features::agent_rpc::controller::AgentRpcController;
use crate::features::agent_rpc::repo::{LocalWorkspaceRepo, WorkspaceRepo};
use crate::features::agent_rpc::service::AgentRpcService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum AgentServerError {
    #[error("cannot bind agent port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },
    #[error("agent server failed: {0}")]
    Serve(#[from] std::io::Error),
}

/// HTTP front of an instrumentation agent.
pub struct AgentServer {
    service: AgentRpcService,
}

impl AgentServer {
    pub fn new(repo: Arc<dyn WorkspaceRepo>, shutdown: CancellationToken) -> Self {
        Self {
            service: AgentRpcService::new(repo, shutdown),
        }
    }

    /// An agent working on the local filesystem.
    pub fn local(shutdown: CancellationToken) -> Self {
        Self::new(Arc::new(LocalWorkspaceRepo::new()), shutdown)
    }

    pub async fn bind(port: u16) -> Result<TcpListener, AgentServerError> {
        TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
            .await
            .map_err(|source| AgentServerError::Bind { port, source })
    }

    /// Serves until a shutdown call arrives or the token is cancelled
    /// from outside.
    pub async fn serve(self, listener: TcpListener) -> Result<(), AgentServerError> {
        let shutdown = self.service.shutdown_token().clone();
        let router = AgentRpcController::new(self.service).router();

        info!(addr = ?listener.local_addr().ok(), "Agent listening");
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        info!("Agent stopped");
        Ok(())
    }
}
