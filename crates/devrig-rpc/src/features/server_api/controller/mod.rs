use crate::error::RpcResult;
use crate::features::connection::repo::{Duplex, WebSocketTransport};
use crate::features::connection::service::{JsonRpcConnection, NotificationHandler};
use crate::features::instance_updates::{InstanceUpdates, SubscriberRegistry};
use crate::types::{
    ApplicationCreationResult, ApplicationInfo, CreateApplicationOptions, GetApplicationsOptions,
    StartApplicationOptions, StartApplicationResult, User,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Typed client of the platform server API.
pub struct ServerApi {
    connection: JsonRpcConnection,
    registry: Arc<SubscriberRegistry>,
    cancel: CancellationToken,
}

impl ServerApi {
    /// Connects over a websocket to `endpoint`, authenticating with `token`.
    pub async fn connect(endpoint: &str, token: Option<&str>) -> RpcResult<Self> {
        let mut transport = WebSocketTransport::new(endpoint)?;
        if let Some(token) = token {
            transport = transport.with_token(token);
        }

        let cancel = CancellationToken::new();
        let duplex = transport.connect(cancel.clone()).await?;
        info!(%endpoint, "Server API ready");

        Ok(Self::with_cancel(duplex, DEFAULT_CALL_TIMEOUT, cancel))
    }

    pub fn from_duplex(duplex: Duplex, call_timeout: Duration) -> Self {
        Self::with_cancel(duplex, call_timeout, CancellationToken::new())
    }

    fn with_cancel(duplex: Duplex, call_timeout: Duration, cancel: CancellationToken) -> Self {
        let registry = Arc::new(SubscriberRegistry::default());
        let handler: Arc<dyn NotificationHandler> = registry.clone();
        Self {
            connection: JsonRpcConnection::new(duplex, handler, call_timeout),
            registry,
            cancel,
        }
    }

    /// Updates pushed for `instance_id`; an empty id receives every instance.
    pub fn instance_updates(&self, instance_id: &str) -> InstanceUpdates {
        self.registry.subscribe(instance_id)
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub async fn get_logged_in_user(&self) -> RpcResult<User> {
        self.connection.call_typed("getLoggedInUser", vec![]).await
    }

    pub async fn get_applications(
        &self,
        options: &GetApplicationsOptions,
    ) -> RpcResult<Vec<ApplicationInfo>> {
        self.connection
            .call_typed("getApplications", vec![serde_json::to_value(options)?])
            .await
    }

    pub async fn get_application(&self, application_id: &str) -> RpcResult<ApplicationInfo> {
        self.connection
            .call_typed("getApplication", vec![json!(application_id)])
            .await
    }

    pub async fn create_application(
        &self,
        options: &CreateApplicationOptions,
    ) -> RpcResult<ApplicationCreationResult> {
        self.connection
            .call_typed("createApplication", vec![serde_json::to_value(options)?])
            .await
    }

    pub async fn start_application(
        &self,
        application_id: &str,
        options: &StartApplicationOptions,
    ) -> RpcResult<StartApplicationResult> {
        self.connection
            .call_typed(
                "startApplication",
                vec![json!(application_id), serde_json::to_value(options)?],
            )
            .await
    }

    pub async fn stop_application(&self, application_id: &str) -> RpcResult<()> {
        self.connection
            .call("stopApplication", vec![json!(application_id)])
            .await
            .map(|_: Value| ())
    }

    /// Deletes an application. Deleting one that does not exist succeeds.
    pub async fn delete_application(&self, application_id: &str) -> RpcResult<()> {
        match self
            .connection
            .call("deleteApplication", vec![json!(application_id)])
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl Drop for ServerApi {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
