//! Test harness for driving application instances on a devrig installation:
//! start and stop them through the manager, wait for status convergence,
//! verify teardown, and instrument running pods with an agent.

pub mod config;
pub mod features;
pub mod shared;

use config::HarnessConfig;
use devrig_rpc::ServerApi;
use features::convergence::ConvergenceEngine;
use features::instrumentation::{Instrumenter, KubePodRepository};
use features::launch::{KubeIdeImageSource, LaunchService};
use features::lifecycle::{ApplicationLifecycle, ApplicationManagerRepository, GrpcApplicationManager};
use features::teardown::{KubeSideResourceRepository, TeardownService};
use shared::error::HarnessResult;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a test needs, wired from one [`HarnessConfig`].
///
/// Cluster-backed parts are only present when a kube client could be built.
pub struct Harness {
    pub config: HarnessConfig,
    pub lifecycle: ApplicationLifecycle,
    pub engine: ConvergenceEngine,
    pub launcher: LaunchService,
    pub teardown: Option<TeardownService>,
    pub instrumenter: Option<Instrumenter>,
}

impl Harness {
    /// Wires the harness around an already built manager repository.
    pub fn with_manager(
        config: HarnessConfig,
        manager: Arc<dyn ApplicationManagerRepository>,
        cluster: Option<kube::Client>,
    ) -> Self {
        let engine = ConvergenceEngine::new(manager.clone()).with_policy(config.subscription);
        let lifecycle = ApplicationLifecycle::new(manager);
        let mut launcher =
            LaunchService::new(engine.clone()).with_per_call_timeout(config.per_call_timeout);

        let (teardown, instrumenter) = match cluster {
            Some(client) => {
                let teardown = TeardownService::new(
                    engine.clone(),
                    Arc::new(KubeSideResourceRepository::new(client.clone(), &config.namespace)),
                );
                let instrumenter = Instrumenter::new(Arc::new(KubePodRepository::new(
                    client.clone(),
                    &config.namespace,
                )))
                .with_agent_dir(config.agent_dir.clone());
                launcher = launcher
                    .with_teardown(teardown.clone())
                    .with_ide_images(Arc::new(KubeIdeImageSource::new(client, &config.namespace)));
                (Some(teardown), Some(instrumenter))
            }
            None => (None, None),
        };

        Self {
            config,
            lifecycle,
            engine,
            launcher,
            teardown,
            instrumenter,
        }
    }

    /// Connects to the manager lazily and to the cluster if a kube config is
    /// available.
    pub async fn connect(config: HarnessConfig) -> HarnessResult<Self> {
        let manager = GrpcApplicationManager::connect_lazy(&config.manager_addr)?
            .with_per_call_timeout(config.per_call_timeout);

        let cluster = match kube::Client::try_default().await {
            Ok(client) => Some(client),
            Err(error) => {
                warn!(error = %error, "No cluster access, teardown and instrumentation disabled");
                None
            }
        };

        info!(
            manager_addr = %config.manager_addr,
            namespace = %config.namespace,
            cluster = cluster.is_some(),
            "Harness connected"
        );
        Ok(Self::with_manager(config, Arc::new(manager), cluster))
    }

    /// Opens a session to the platform server named in the config, if any.
    pub async fn server(&self) -> HarnessResult<Option<ServerApi>> {
        let Some(endpoint) = self.config.server_endpoint.as_deref() else {
            return Ok(None);
        };
        let api = ServerApi::connect(endpoint, self.config.server_token.as_deref()).await?;
        Ok(Some(api))
    }
}
