use crate::features::instrumentation::repo::agent::AgentClient;
use crate::features::instrumentation::repo::{ComponentType, ExecOutput, PodRepository, PodSummary};
use crate::shared::context::{CallContext, Interrupt};
use crate::shared::error::{HarnessError, HarnessResult};
use crate::shared::retry::{poll_until, PollError};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const AGENT_INSTALL_DIR: &str = "/home/devrig";
pub const LIFT_COMMAND: [&str; 2] = ["/.supervisor/appkit", "lift"];
pub const LAUNCH_GRACE: Duration = Duration::from_secs(1);
pub const DIAL_INTERVAL: Duration = Duration::from_secs(5);
pub const DIAL_CEILING: Duration = Duration::from_secs(60);

/// Executable name an agent is looked up under.
pub fn agent_binary_name(agent_name: &str) -> String {
    format!("devrig-integration-test-{agent_name}-agent")
}

/// Finds the agent executable: the explicit path, then `extra_dir`, then `PATH`.
pub fn resolve_agent_binary(
    agent_name: &str,
    explicit: Option<&Path>,
    extra_dir: Option<&Path>,
) -> HarnessResult<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(HarnessError::Agent(format!(
            "agent executable {} does not exist",
            path.display()
        )));
    }

    let name = agent_binary_name(agent_name);
    let path_dirs = std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).collect::<Vec<_>>())
        .unwrap_or_default();

    extra_dir
        .map(Path::to_path_buf)
        .into_iter()
        .chain(path_dirs)
        .map(|dir| dir.join(&name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| HarnessError::Agent(format!("cannot find {name} in PATH")))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentOptions {
    /// Instance the agent should sit next to.
    pub instance_id: Option<String>,
    pub container: Option<String>,
    /// Launch through the supervisor's lift command.
    pub lift: bool,
    pub agent_path: Option<PathBuf>,
}

impl Default for InstrumentOptions {
    fn default() -> Self {
        Self {
            instance_id: None,
            container: None,
            lift: true,
            agent_path: None,
        }
    }
}

impl InstrumentOptions {
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn with_lift(mut self, lift: bool) -> Self {
        self.lift = lift;
        self
    }

    pub fn with_agent_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.agent_path = Some(path.into());
        self
    }
}

/// A running agent and the tasks that keep it reachable.
pub struct Instrumentation {
    client: AgentClient,
    pod: String,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    exec_task: Option<JoinHandle<HarnessResult<ExecOutput>>>,
    forward_task: Option<JoinHandle<HarnessResult<()>>>,
}

impl Instrumentation {
    pub fn client(&self) -> &AgentClient {
        &self.client
    }

    pub fn pod(&self) -> &str {
        &self.pod
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shuts the agent down, then tears down the tunnel and the exec session.
    pub async fn close(mut self) -> HarnessResult<()> {
        let result = self.client.shutdown().await;
        self.release().await;
        info!(pod = %self.pod, "Agent closed");
        result
    }

    async fn release(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.forward_task.take() {
            task.abort();
            let _ = task.await;
        }
        if let Some(task) = self.exec_task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for Instrumentation {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = &self.forward_task {
            task.abort();
        }
        if let Some(task) = &self.exec_task {
            task.abort();
        }
    }
}

/// Places agents into pods and connects to them.
pub struct Instrumenter {
    pods: Arc<dyn PodRepository>,
    agent_dir: Option<PathBuf>,
    launch_grace: Duration,
    dial_interval: Duration,
    dial_ceiling: Duration,
}

impl Instrumenter {
    pub fn new(pods: Arc<dyn PodRepository>) -> Self {
        Self {
            pods,
            agent_dir: None,
            launch_grace: LAUNCH_GRACE,
            dial_interval: DIAL_INTERVAL,
            dial_ceiling: DIAL_CEILING,
        }
    }

    pub fn with_agent_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.agent_dir = dir;
        self
    }

    pub fn with_dial_policy(mut self, interval: Duration, ceiling: Duration) -> Self {
        self.dial_interval = interval;
        self.dial_ceiling = ceiling;
        self
    }

    /// Picks the pod the agent runs in, and the container if one was asked for.
    pub async fn select_pod(
        &self,
        component: ComponentType,
        options: &InstrumentOptions,
    ) -> HarnessResult<(PodSummary, Option<String>)> {
        let instance_selector = options
            .instance_id
            .as_ref()
            .map(|id| format!("component=application,applicationID={id}"));

        let (label_selector, field_selector) = match (component, &instance_selector) {
            (ComponentType::Application, Some(selector)) => (selector.clone(), None),
            (ComponentType::ApplicationDaemon, Some(selector)) => {
                let application_pods = self.pods.list_pods(selector, None).await?;
                let node = application_pods
                    .first()
                    .map(|pod| pod.node_name.clone())
                    .ok_or_else(|| {
                        HarnessError::Agent(format!(
                            "no application pod for instance {}",
                            options.instance_id.as_deref().unwrap_or_default()
                        ))
                    })?;
                (
                    format!("component={component}"),
                    Some(format!("spec.nodeName={node}")),
                )
            }
            _ => (format!("component={component}"), None),
        };

        let pods = self.pods.list_pods(&label_selector, field_selector).await?;
        if pods.len() > 1 {
            debug!(component = %component, count = pods.len(), "Several pods match, using the first");
        }
        let pod = pods
            .into_iter()
            .next()
            .ok_or_else(|| HarnessError::Agent(format!("no pods for {component}")))?;

        if !pod.ready {
            return Err(HarnessError::Agent(format!(
                "pod {} for component {component} is not running",
                pod.name
            )));
        }

        let container = match &options.container {
            Some(name) if !pod.containers.contains(name) => {
                return Err(HarnessError::Agent(format!(
                    "no container named {name} in pod {}",
                    pod.name
                )))
            }
            other => other.clone(),
        };

        Ok((pod, container))
    }

    pub async fn instrument(
        &self,
        ctx: &CallContext,
        component: ComponentType,
        agent_name: &str,
        options: InstrumentOptions,
    ) -> HarnessResult<Instrumentation> {
        let interrupted = |interrupt: Interrupt| {
            let what = match interrupt {
                Interrupt::Cancelled => "cancelled",
                Interrupt::DeadlineExceeded => "timed out",
            };
            HarnessError::Agent(format!("instrumenting {component} with {agent_name} {what}"))
        };

        let binary = resolve_agent_binary(
            agent_name,
            options.agent_path.as_deref(),
            self.agent_dir.as_deref(),
        )?;
        let file_name = binary
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| HarnessError::Agent(format!("{} has no file name", binary.display())))?;

        let (pod, container) = self.select_pod(component, &options).await?;
        info!(component = %component, pod = %pod.name, agent = %agent_name, "Instrumenting pod");

        ctx.run(self.pods.copy_file(
            &pod.name,
            container.clone(),
            binary.clone(),
            AGENT_INSTALL_DIR.to_string(),
        ))
        .await
        .map_err(&interrupted)??;

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| HarnessError::Agent(format!("cannot reserve a local port: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| HarnessError::Agent(format!("cannot reserve a local port: {e}")))?;
        let port = local_addr.port();

        let mut command: Vec<String> = Vec::new();
        if options.lift {
            command.extend(LIFT_COMMAND.iter().map(|part| part.to_string()));
        }
        command.extend([
            format!("{AGENT_INSTALL_DIR}/{file_name}"),
            "--rpc-port".to_string(),
            port.to_string(),
        ]);

        let exec_pods = self.pods.clone();
        let exec_pod = pod.name.clone();
        let exec_container = container.clone();
        let mut exec_task =
            tokio::spawn(async move { exec_pods.exec(&exec_pod, exec_container, command).await });

        tokio::select! {
            finished = &mut exec_task => {
                return Err(match finished {
                    Ok(Ok(output)) => HarnessError::Agent(format!(
                        "agent stopped unexpectedly: {}",
                        output.stderr.trim()
                    )),
                    Ok(Err(e)) => e,
                    Err(e) => HarnessError::Agent(format!("agent launch failed: {e}")),
                });
            }
            slept = ctx.sleep(self.launch_grace) => {
                if let Err(interrupt) = slept {
                    exec_task.abort();
                    return Err(interrupted(interrupt));
                }
            }
        }

        let cancel = CancellationToken::new();
        let forward_pods = self.pods.clone();
        let forward_pod = pod.name.clone();
        let forward_cancel = cancel.clone();
        let forward_task = tokio::spawn(async move {
            forward_pods
                .forward_port(&forward_pod, listener, port, forward_cancel)
                .await
        });

        // From here on dropping `instrumentation` tears everything down.
        let instrumentation = Instrumentation {
            client: AgentClient::new(local_addr)?,
            pod: pod.name.clone(),
            local_addr,
            cancel,
            exec_task: Some(exec_task),
            forward_task: Some(forward_task),
        };

        let client = instrumentation.client.clone();
        let dialed = poll_until(ctx, self.dial_interval, self.dial_ceiling, || {
            let client = client.clone();
            async move { client.dial().await }
        })
        .await;

        match dialed {
            Ok(()) => {
                info!(pod = %pod.name, addr = %local_addr, "Agent connected");
                Ok(instrumentation)
            }
            Err(PollError::TimedOut { last_error }) => {
                let last_error = last_error.map(|e| e.to_string()).unwrap_or_default();
                warn!(pod = %pod.name, error = %last_error, "Agent never became reachable");
                Err(HarnessError::Agent(format!(
                    "timed out attempting to connect agent: {last_error}"
                )))
            }
            Err(PollError::Interrupted(interrupt)) => Err(interrupted(interrupt)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::instrumentation::repo::MockPodRepository;

    fn pod(name: &str, node: &str, ready: bool) -> PodSummary {
        PodSummary {
            name: name.to_string(),
            node_name: node.to_string(),
            containers: vec!["app".to_string(), "sidecar".to_string()],
            ready,
        }
    }

    #[test]
    fn test_agent_binary_name() {
        assert_eq!(
            agent_binary_name("application"),
            "devrig-integration-test-application-agent"
        );
    }

    #[test]
    fn test_resolve_explicit_path_must_exist() {
        let err = resolve_agent_binary("application", Some(Path::new("/nonexistent/agent")), None)
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/agent"));
    }

    #[test]
    fn test_resolve_from_extra_dir() {
        let dir = std::env::temp_dir().join(format!("devrig-agent-dir-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let binary = dir.join(agent_binary_name("probe"));
        std::fs::write(&binary, b"#!/bin/sh\n").unwrap();

        let resolved = resolve_agent_binary("probe", None, Some(&dir)).unwrap();
        assert_eq!(resolved, binary);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_resolve_missing_agent() {
        let err = resolve_agent_binary("does-not-exist-anywhere", None, None).unwrap_err();
        assert!(err
            .to_string()
            .contains("devrig-integration-test-does-not-exist-anywhere-agent"));
    }

    #[tokio::test]
    async fn test_select_by_component_label() {
        let mut pods = MockPodRepository::new();
        pods.expect_list_pods()
            .withf(|labels, fields| labels == "component=app-manager" && fields.is_none())
            .times(1)
            .returning(|_, _| Ok(vec![pod("manager-0", "node-a", true), pod("manager-1", "node-b", true)]));

        let (selected, container) = Instrumenter::new(Arc::new(pods))
            .select_pod(ComponentType::ApplicationManager, &InstrumentOptions::default())
            .await
            .unwrap();
        assert_eq!(selected.name, "manager-0");
        assert_eq!(container, None);
    }

    #[tokio::test]
    async fn test_select_application_pod_by_instance() {
        let mut pods = MockPodRepository::new();
        pods.expect_list_pods()
            .withf(|labels, _| labels == "component=application,applicationID=abc")
            .returning(|_, _| Ok(vec![pod("ws-abc", "node-a", true)]));

        let options = InstrumentOptions::default()
            .with_instance_id("abc")
            .with_container("app");
        let (selected, container) = Instrumenter::new(Arc::new(pods))
            .select_pod(ComponentType::Application, &options)
            .await
            .unwrap();
        assert_eq!(selected.name, "ws-abc");
        assert_eq!(container.as_deref(), Some("app"));
    }

    #[tokio::test]
    async fn test_daemon_is_colocated_with_instance() {
        let mut pods = MockPodRepository::new();
        pods.expect_list_pods()
            .withf(|labels, _| labels == "component=application,applicationID=abc")
            .returning(|_, _| Ok(vec![pod("ws-abc", "node-b", true)]));
        pods.expect_list_pods()
            .withf(|labels, fields| {
                labels == "component=app-daemon" && fields.as_deref() == Some("spec.nodeName=node-b")
            })
            .returning(|_, _| Ok(vec![pod("daemon-b", "node-b", true)]));

        let options = InstrumentOptions::default().with_instance_id("abc");
        let (selected, _) = Instrumenter::new(Arc::new(pods))
            .select_pod(ComponentType::ApplicationDaemon, &options)
            .await
            .unwrap();
        assert_eq!(selected.name, "daemon-b");
    }

    #[tokio::test]
    async fn test_daemon_without_application_pod() {
        let mut pods = MockPodRepository::new();
        pods.expect_list_pods().returning(|_, _| Ok(vec![]));

        let options = InstrumentOptions::default().with_instance_id("abc");
        let err = Instrumenter::new(Arc::new(pods))
            .select_pod(ComponentType::ApplicationDaemon, &options)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no application pod for instance abc"));
    }

    #[tokio::test]
    async fn test_first_pod_must_be_ready() {
        let mut pods = MockPodRepository::new();
        pods.expect_list_pods()
            .returning(|_, _| Ok(vec![pod("server-0", "node-a", false), pod("server-1", "node-a", true)]));

        let err = Instrumenter::new(Arc::new(pods))
            .select_pod(ComponentType::Server, &InstrumentOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not running"));
    }

    #[tokio::test]
    async fn test_unknown_container_is_rejected() {
        let mut pods = MockPodRepository::new();
        pods.expect_list_pods()
            .returning(|_, _| Ok(vec![pod("server-0", "node-a", true)]));

        let options = InstrumentOptions::default().with_container("missing");
        let err = Instrumenter::new(Arc::new(pods))
            .select_pod(ComponentType::Server, &options)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no container named missing"));
    }

    #[tokio::test]
    async fn test_no_pods() {
        let mut pods = MockPodRepository::new();
        pods.expect_list_pods().returning(|_, _| Ok(vec![]));

        let err = Instrumenter::new(Arc::new(pods))
            .select_pod(ComponentType::ImageBuilderMk3, &InstrumentOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no pods for image-builder-mk3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_launch_failure_is_reported() {
        let dir = std::env::temp_dir().join(format!("devrig-launch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let binary = dir.join(agent_binary_name("broken"));
        std::fs::write(&binary, b"#!/bin/sh\n").unwrap();

        let mut pods = MockPodRepository::new();
        pods.expect_list_pods()
            .returning(|_, _| Ok(vec![pod("ws-abc", "node-a", true)]));
        pods.expect_copy_file()
            .withf(|pod, _, _, remote| pod == "ws-abc" && remote == AGENT_INSTALL_DIR)
            .returning(|_, _, _, _| Ok(()));
        pods.expect_exec()
            .withf(|_, _, command| {
                command[..2] == ["/.supervisor/appkit", "lift"]
                    && command[2] == "/home/devrig/devrig-integration-test-broken-agent"
                    && command[3] == "--rpc-port"
            })
            .returning(|_, _, _| Err(HarnessError::Cluster("exec format error".to_string())));
        pods.expect_forward_port().never();

        let err = Instrumenter::new(Arc::new(pods))
            .instrument(
                &CallContext::new(),
                ComponentType::Application,
                "broken",
                InstrumentOptions::default().with_agent_path(&binary),
            )
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("exec format error"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    /// Pod whose agent never answers: exec keeps running and the tunnel
    /// accepts connections that go nowhere.
    struct SilentPod;

    #[async_trait::async_trait]
    impl PodRepository for SilentPod {
        async fn list_pods(
            &self,
            _label_selector: &str,
            _field_selector: Option<String>,
        ) -> HarnessResult<Vec<PodSummary>> {
            Ok(vec![pod("ws-abc", "node-a", true)])
        }

        async fn copy_file(
            &self,
            _pod: &str,
            _container: Option<String>,
            _local: PathBuf,
            _remote_dir: String,
        ) -> HarnessResult<()> {
            Ok(())
        }

        async fn exec(
            &self,
            _pod: &str,
            _container: Option<String>,
            _command: Vec<String>,
        ) -> HarnessResult<ExecOutput> {
            std::future::pending().await
        }

        async fn forward_port(
            &self,
            _pod: &str,
            listener: TcpListener,
            _remote_port: u16,
            cancel: CancellationToken,
        ) -> HarnessResult<()> {
            cancel.cancelled().await;
            drop(listener);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_agent_times_out() {
        let dir = std::env::temp_dir().join(format!("devrig-silent-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let binary = dir.join(agent_binary_name("silent"));
        std::fs::write(&binary, b"#!/bin/sh\n").unwrap();

        let started = tokio::time::Instant::now();
        let err = Instrumenter::new(Arc::new(SilentPod))
            .instrument(
                &CallContext::new(),
                ComponentType::Application,
                "silent",
                InstrumentOptions::default().with_agent_path(&binary),
            )
            .await
            .err()
            .unwrap();

        assert!(
            err.to_string()
                .starts_with("Agent error: timed out attempting to connect agent"),
            "unexpected error: {err}"
        );
        assert!(started.elapsed() <= LAUNCH_GRACE + DIAL_CEILING);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
