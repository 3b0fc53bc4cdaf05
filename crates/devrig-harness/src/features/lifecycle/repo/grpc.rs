use super::{ApplicationManagerRepository, StatusStream};
use crate::shared::error::{ManagerError, ManagerErrorCode};
use crate::shared::types::{ApplicationStatus, StartApplicationRequest};
use async_trait::async_trait;
use devrig_proto::v1;
use devrig_proto::v1::application_manager_client::ApplicationManagerClient;
use futures::StreamExt;
use std::future::Future;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing::warn;

pub const DEFAULT_PER_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Lifecycle manager reached over gRPC.
#[derive(Clone)]
pub struct GrpcApplicationManager {
    client: ApplicationManagerClient<Channel>,
    per_call_timeout: Duration,
}

impl GrpcApplicationManager {
    /// Creates a manager client that connects lazily on first use.
    pub fn connect_lazy(addr: &str) -> Result<Self, ManagerError> {
        let endpoint = Endpoint::from_shared(addr.to_string()).map_err(|e| {
            ManagerError::new(
                ManagerErrorCode::InvalidArgument,
                format!("invalid manager address {addr}: {e}"),
            )
        })?;
        Ok(Self::new(ApplicationManagerClient::new(
            endpoint.connect_lazy(),
        )))
    }

    pub fn new(client: ApplicationManagerClient<Channel>) -> Self {
        Self {
            client,
            per_call_timeout: DEFAULT_PER_CALL_TIMEOUT,
        }
    }

    pub fn with_per_call_timeout(mut self, timeout: Duration) -> Self {
        self.per_call_timeout = timeout;
        self
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, ManagerError>
    where
        F: Future<Output = Result<tonic::Response<T>, tonic::Status>>,
    {
        match tokio::time::timeout(self.per_call_timeout, call).await {
            Ok(Ok(response)) => Ok(response.into_inner()),
            Ok(Err(status)) => Err(status.into()),
            Err(_) => Err(ManagerError::new(
                ManagerErrorCode::DeadlineExceeded,
                format!("call did not complete within {:?}", self.per_call_timeout),
            )),
        }
    }
}

fn decode_status(status: Option<v1::ApplicationStatus>) -> Result<ApplicationStatus, ManagerError> {
    let status = status.ok_or_else(|| {
        ManagerError::new(ManagerErrorCode::Internal, "response carried no status")
    })?;
    ApplicationStatus::try_from(status)
        .map_err(|e| ManagerError::new(ManagerErrorCode::Internal, e))
}

#[async_trait]
impl ApplicationManagerRepository for GrpcApplicationManager {
    async fn start_application(
        &self,
        request: StartApplicationRequest,
    ) -> Result<String, ManagerError> {
        let mut client = self.client.clone();
        let response = self
            .bounded(client.start_application(v1::StartApplicationRequest::from(request)))
            .await?;
        Ok(response.url)
    }

    async fn stop_application(&self, instance_id: &str) -> Result<(), ManagerError> {
        let mut client = self.client.clone();
        self.bounded(client.stop_application(v1::StopApplicationRequest {
            id: instance_id.to_string(),
        }))
        .await?;
        Ok(())
    }

    async fn delete_application(&self, instance_id: &str) -> Result<(), ManagerError> {
        let mut client = self.client.clone();
        self.bounded(client.delete_application(v1::DeleteApplicationRequest {
            id: instance_id.to_string(),
        }))
        .await?;
        Ok(())
    }

    async fn describe_application(
        &self,
        instance_id: &str,
    ) -> Result<ApplicationStatus, ManagerError> {
        let mut client = self.client.clone();
        let response = self
            .bounded(client.describe_application(v1::DescribeApplicationRequest {
                id: instance_id.to_string(),
            }))
            .await?;
        decode_status(response.status)
    }

    async fn list_applications(&self) -> Result<Vec<ApplicationStatus>, ManagerError> {
        let mut client = self.client.clone();
        let response = self
            .bounded(client.get_applications(v1::GetApplicationsRequest {}))
            .await?;
        response
            .status
            .into_iter()
            .map(|status| decode_status(Some(status)))
            .collect()
    }

    async fn subscribe(&self) -> Result<StatusStream, ManagerError> {
        let mut client = self.client.clone();
        let streaming = self
            .bounded(client.subscribe(v1::SubscribeRequest {}))
            .await?;

        let stream = streaming.filter_map(|message| async move {
            match message {
                Ok(response) => match decode_status(response.status) {
                    Ok(status) => Some(Ok(status)),
                    Err(e) => {
                        warn!(error = %e, "Skipping undecodable status update");
                        None
                    }
                },
                Err(status) => Some(Err(ManagerError::from(status))),
            }
        });

        Ok(stream.boxed())
    }
}
