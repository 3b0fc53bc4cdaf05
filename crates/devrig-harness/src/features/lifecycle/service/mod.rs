use crate::features::lifecycle::repo::ApplicationManagerRepository;
use crate::shared::error::{HarnessError, HarnessResult};
use crate::shared::types::{ApplicationStatus, StartApplicationRequest, StartedApplication};
use std::sync::Arc;
use tracing::{debug, info};

/// Start, stop, delete and describe instances through the manager
pub struct ApplicationLifecycle {
    repo: Arc<dyn ApplicationManagerRepository>,
}

impl ApplicationLifecycle {
    pub fn new(repo: Arc<dyn ApplicationManagerRepository>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> Arc<dyn ApplicationManagerRepository> {
        self.repo.clone()
    }

    pub async fn start(&self, request: StartApplicationRequest) -> HarnessResult<StartedApplication> {
        request
            .validate()
            .map_err(|e| HarnessError::InvalidRequest(e.to_string()))?;

        let instance_id = request.id.clone();
        let url = self.repo.start_application(request).await?;

        info!(instance_id = %instance_id, url = %url, "Application instance started");

        Ok(StartedApplication { instance_id, url })
    }

    /// Stop an instance. An instance the manager no longer knows counts as stopped.
    pub async fn stop(&self, instance_id: &str) -> HarnessResult<()> {
        match self.repo.stop_application(instance_id).await {
            Ok(()) => {
                info!(instance_id = %instance_id, "Application instance stop requested");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(instance_id = %instance_id, "Instance already gone, nothing to stop");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, instance_id: &str) -> HarnessResult<()> {
        match self.repo.delete_application(instance_id).await {
            Ok(()) => {
                info!(instance_id = %instance_id, "Application instance deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn describe(&self, instance_id: &str) -> HarnessResult<ApplicationStatus> {
        self.repo
            .describe_application(instance_id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    HarnessError::InstanceNotFound(instance_id.to_string())
                } else {
                    e.into()
                }
            })
    }

    pub async fn list(&self) -> HarnessResult<Vec<ApplicationStatus>> {
        Ok(self.repo.list_applications().await?)
    }
}
