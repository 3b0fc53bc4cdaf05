pub mod cluster;

use crate::shared::error::HarnessResult;
use async_trait::async_trait;
use devrig_rpc::{
    ApplicationCreationResult, ApplicationInfo, CreateApplicationOptions, ServerApi,
};

#[cfg(test)]
use mockall::automock;

/// The parts of the platform server API the launch flow needs.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApplicationServerRepository: Send + Sync {
    async fn create_application(
        &self,
        options: CreateApplicationOptions,
    ) -> HarnessResult<ApplicationCreationResult>;

    async fn get_application(&self, application_id: &str) -> HarnessResult<ApplicationInfo>;

    async fn stop_application(&self, application_id: &str) -> HarnessResult<()>;
}

#[async_trait]
impl ApplicationServerRepository for ServerApi {
    async fn create_application(
        &self,
        options: CreateApplicationOptions,
    ) -> HarnessResult<ApplicationCreationResult> {
        Ok(ServerApi::create_application(self, &options).await?)
    }

    async fn get_application(&self, application_id: &str) -> HarnessResult<ApplicationInfo> {
        Ok(ServerApi::get_application(self, application_id).await?)
    }

    async fn stop_application(&self, application_id: &str) -> HarnessResult<()> {
        Ok(ServerApi::stop_application(self, application_id).await?)
    }
}

/// Where the default IDE image comes from when the caller names none.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdeImageSource: Send + Sync {
    async fn default_ide_image(&self) -> HarnessResult<String>;
}
