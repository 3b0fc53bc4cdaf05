use super::{ExecOutput, PodRepository, PodSummary};
use crate::shared::error::{HarnessError, HarnessResult};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, ListParams};
use kube::Client;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Pod access through the Kubernetes API.
#[derive(Clone)]
pub struct KubePodRepository {
    pods: Api<Pod>,
}

impl KubePodRepository {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            pods: Api::namespaced(client, namespace),
        }
    }

    fn attach_params(container: Option<String>) -> AttachParams {
        let params = AttachParams::default();
        match container {
            Some(container) => params.container(container),
            None => params,
        }
    }
}

fn cluster_error(context: &str, err: impl std::fmt::Display) -> HarnessError {
    HarnessError::Cluster(format!("{context}: {err}"))
}

fn summarize(pod: Pod) -> PodSummary {
    let spec = pod.spec.unwrap_or_default();
    let ready = pod
        .status
        .map(|status| {
            let running = status.phase.as_deref() == Some("Running");
            let ready = status
                .conditions
                .unwrap_or_default()
                .iter()
                .find(|c| c.type_ == "Ready")
                .map(|c| c.status == "True")
                .unwrap_or(false);
            running && ready
        })
        .unwrap_or(false);

    PodSummary {
        name: pod.metadata.name.unwrap_or_default(),
        node_name: spec.node_name.unwrap_or_default(),
        containers: spec.containers.into_iter().map(|c| c.name).collect(),
        ready,
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!(error = %e, "Exec output stream closed early");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn forward_connection(
    pods: Api<Pod>,
    pod: String,
    remote_port: u16,
    mut socket: TcpStream,
    cancel: CancellationToken,
) -> HarnessResult<()> {
    let mut forwarder = pods
        .portforward(&pod, &[remote_port])
        .await
        .map_err(|e| cluster_error("cannot open port forward", e))?;
    let mut upstream = forwarder
        .take_stream(remote_port)
        .ok_or_else(|| HarnessError::Cluster(format!("no stream for port {remote_port}")))?;

    tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        copied = tokio::io::copy_bidirectional(&mut socket, &mut upstream) => {
            copied.map_err(|e| cluster_error("port forward failed", e))?;
        }
    }

    drop(upstream);
    forwarder
        .join()
        .await
        .map_err(|e| cluster_error("port forward failed", e))
}

#[async_trait]
impl PodRepository for KubePodRepository {
    async fn list_pods(
        &self,
        label_selector: &str,
        field_selector: Option<String>,
    ) -> HarnessResult<Vec<PodSummary>> {
        let mut params = ListParams::default().labels(label_selector);
        if let Some(fields) = field_selector.as_deref() {
            params = params.fields(fields);
        }

        let pods = self
            .pods
            .list(&params)
            .await
            .map_err(|e| cluster_error("cannot list pods", e))?;
        Ok(pods.items.into_iter().map(summarize).collect())
    }

    async fn copy_file(
        &self,
        pod: &str,
        container: Option<String>,
        local: PathBuf,
        remote_dir: String,
    ) -> HarnessResult<()> {
        let file_name = local
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| HarnessError::Agent(format!("{} is not a file", local.display())))?;

        let archive = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            let mut builder = tar::Builder::new(Vec::new());
            builder.append_path_with_name(&local, &file_name)?;
            builder.into_inner()
        })
        .await
        .map_err(|e| HarnessError::Agent(format!("cannot pack agent: {e}")))?
        .map_err(|e| HarnessError::Agent(format!("cannot pack agent: {e}")))?;

        let params = Self::attach_params(container).stdin(true).stdout(false);
        let command = vec!["tar", "xf", "-", "-C", remote_dir.as_str()];
        let mut attached = self
            .pods
            .exec(pod, command, &params)
            .await
            .map_err(|e| cluster_error("cannot copy into pod", e))?;

        if let Some(mut stdin) = attached.stdin() {
            stdin
                .write_all(&archive)
                .await
                .map_err(|e| cluster_error("cannot copy into pod", e))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| cluster_error("cannot copy into pod", e))?;
        }

        let stderr = read_all(attached.stderr()).await;
        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| cluster_error("cannot copy into pod", e))?;

        match status {
            Some(status) if status.status.as_deref() != Some("Success") => Err(HarnessError::Cluster(
                format!(
                    "cannot copy into pod {pod}: {} {stderr}",
                    status.message.unwrap_or_default()
                ),
            )),
            _ => Ok(()),
        }
    }

    async fn exec(
        &self,
        pod: &str,
        container: Option<String>,
        command: Vec<String>,
    ) -> HarnessResult<ExecOutput> {
        let params = Self::attach_params(container);
        let mut attached = self
            .pods
            .exec(pod, command.clone(), &params)
            .await
            .map_err(|e| cluster_error("cannot exec in pod", e))?;

        let (stdout, stderr) = tokio::join!(read_all(attached.stdout()), read_all(attached.stderr()));
        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| cluster_error("cannot exec in pod", e))?;

        if let Some(status) = status {
            if status.status.as_deref() != Some("Success") {
                return Err(HarnessError::Cluster(format!(
                    "command {} failed: {}\n{stderr}",
                    command.join(" "),
                    status.message.unwrap_or_default()
                )));
            }
        }
        Ok(ExecOutput { stdout, stderr })
    }

    async fn forward_port(
        &self,
        pod: &str,
        listener: TcpListener,
        remote_port: u16,
        cancel: CancellationToken,
    ) -> HarnessResult<()> {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted,
            };
            let (socket, peer) = accepted.map_err(|e| cluster_error("port forward listener failed", e))?;
            debug!(pod = %pod, peer = %peer, remote_port, "Forwarding connection");

            let pods = self.pods.clone();
            let pod = pod.to_string();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = forward_connection(pods, pod.clone(), remote_port, socket, cancel).await {
                    warn!(pod = %pod, error = %e, "Forwarded connection failed");
                }
            });
        }
    }
}
