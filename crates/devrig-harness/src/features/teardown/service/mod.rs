use crate::features::convergence::ConvergenceEngine;
use crate::features::teardown::repo::{SideResourceKind, SideResourceRepository};
use crate::shared::context::CallContext;
use crate::shared::error::{HarnessError, HarnessResult};
use crate::shared::retry::{poll_until, PollError};
use crate::shared::types::ApplicationStatus;
use devrig_core::ide_service_name;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

pub const SIDE_RESOURCE_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const SIDE_RESOURCE_CEILING: Duration = Duration::from_secs(60);

/// Waits until an instance is stopped and its IDE service is gone.
#[derive(Clone)]
pub struct TeardownService {
    engine: ConvergenceEngine,
    resources: Arc<dyn SideResourceRepository>,
    poll_interval: Duration,
    ceiling: Duration,
}

impl TeardownService {
    pub fn new(engine: ConvergenceEngine, resources: Arc<dyn SideResourceRepository>) -> Self {
        Self {
            engine,
            resources,
            poll_interval: SIDE_RESOURCE_POLL_INTERVAL,
            ceiling: SIDE_RESOURCE_CEILING,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub async fn wait_for_stop(
        &self,
        ctx: &CallContext,
        instance_id: &str,
    ) -> HarnessResult<ApplicationStatus> {
        let status = self.engine.wait_for_stopped(ctx, instance_id).await?;

        let meta_id = status.metadata.meta_id.trim();
        if meta_id.is_empty() {
            warn!(instance_id = %instance_id, "Stopped instance carries no meta id, skipping side resource check");
            return Ok(status);
        }

        let name = ide_service_name(meta_id);
        let started = Instant::now();
        for kind in [SideResourceKind::Service, SideResourceKind::Endpoints] {
            let remaining = self.ceiling.saturating_sub(started.elapsed());
            self.wait_until_absent(ctx, instance_id, kind, &name, remaining)
                .await?;
        }

        info!(instance_id = %instance_id, service = %name, "Application instance torn down");
        Ok(status)
    }

    async fn wait_until_absent(
        &self,
        ctx: &CallContext,
        instance_id: &str,
        kind: SideResourceKind,
        name: &str,
        ceiling: Duration,
    ) -> HarnessResult<()> {
        let resources = self.resources.clone();
        let polled = poll_until(ctx, self.poll_interval, ceiling, || {
            let resources = resources.clone();
            let name = name.to_string();
            async move {
                match resources.exists(kind, &name).await {
                    Ok(false) => Ok(()),
                    Ok(true) => Err(()),
                    Err(e) => {
                        warn!(kind = %kind, name = %name, error = %e, "Existence check failed, assuming still present");
                        Err(())
                    }
                }
            }
        })
        .await;

        polled.map_err(|e| match e {
            PollError::TimedOut { .. } => HarnessError::SideResourcePersisted {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            PollError::Interrupted(interrupt) => {
                HarnessError::interrupted(interrupt, instance_id, format!("free of {kind} {name}"))
            }
        })
    }
}
