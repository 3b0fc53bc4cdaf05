pub mod agent;
pub mod cluster;

use crate::shared::error::HarnessResult;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
use mockall::automock;

/// Platform components an agent can be placed next to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    ApplicationDaemon,
    ApplicationManager,
    ContentService,
    Application,
    ImageBuilder,
    ImageBuilderMk3,
    Server,
}

impl ComponentType {
    /// Value of the pod's `component` label.
    pub fn label(&self) -> &'static str {
        match self {
            ComponentType::ApplicationDaemon => "app-daemon",
            ComponentType::ApplicationManager => "app-manager",
            ComponentType::ContentService => "content-service",
            ComponentType::Application => "application",
            ComponentType::ImageBuilder => "image-builder",
            ComponentType::ImageBuilderMk3 => "image-builder-mk3",
            ComponentType::Server => "server",
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The parts of a pod that agent placement looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodSummary {
    pub name: String,
    pub node_name: String,
    pub containers: Vec<String>,
    /// Phase is Running and the Ready condition is true.
    pub ready: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodRepository: Send + Sync {
    async fn list_pods(
        &self,
        label_selector: &str,
        field_selector: Option<String>,
    ) -> HarnessResult<Vec<PodSummary>>;

    /// Copy a local file into `remote_dir` inside the pod, keeping its name.
    async fn copy_file(
        &self,
        pod: &str,
        container: Option<String>,
        local: PathBuf,
        remote_dir: String,
    ) -> HarnessResult<()>;

    /// Run a command in the pod until it exits.
    async fn exec(
        &self,
        pod: &str,
        container: Option<String>,
        command: Vec<String>,
    ) -> HarnessResult<ExecOutput>;

    /// Forward every connection accepted on `listener` to `remote_port` in
    /// the pod until `cancel` fires.
    async fn forward_port(
        &self,
        pod: &str,
        listener: TcpListener,
        remote_port: u16,
        cancel: CancellationToken,
    ) -> HarnessResult<()>;
}
