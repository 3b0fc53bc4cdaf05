use crate::features::convergence::ConvergenceEngine;
use crate::features::launch::repo::{ApplicationServerRepository, IdeImageSource};
use crate::features::lifecycle::service::ApplicationLifecycle;
use crate::features::teardown::TeardownService;
use crate::shared::context::CallContext;
use crate::shared::error::{HarnessError, HarnessResult};
use crate::shared::types::{
    AdmissionLevel, ApplicationMetadata, ApplicationSpec, ApplicationStatus, ApplicationType,
    GitSpec, StartApplicationRequest, WaitOptions,
};
use devrig_core::generate_application_id;
use devrig_rpc::{ApplicationInfo, CreateApplicationMode, CreateApplicationOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Owner of instances launched without going through the server.
pub const BUILTIN_OWNER: &str = "builtin-user-application-probe-0000000";
pub const LAUNCH_TIMEOUT: &str = "30m";
pub const TESTER_GIT_USERNAME: &str = "integration-test";
pub const TESTER_GIT_EMAIL: &str = "integration-test@devrig.dev";

pub type RequestModifier =
    Box<dyn Fn(&mut StartApplicationRequest) -> HarnessResult<()> + Send + Sync>;

#[derive(Default)]
pub struct LaunchOptions {
    pub application_image: Option<String>,
    pub ide_image: Option<String>,
    pub modifiers: Vec<RequestModifier>,
    pub wait: WaitOptions,
}

impl LaunchOptions {
    pub fn with_application_image(mut self, image: impl Into<String>) -> Self {
        self.application_image = Some(image.into());
        self
    }

    pub fn with_ide_image(mut self, image: impl Into<String>) -> Self {
        self.ide_image = Some(image.into());
        self
    }

    pub fn with_modifier<F>(mut self, modifier: F) -> Self
    where
        F: Fn(&mut StartApplicationRequest) -> HarnessResult<()> + Send + Sync + 'static,
    {
        self.modifiers.push(Box::new(modifier));
        self
    }

    pub fn with_wait_options(mut self, wait: WaitOptions) -> Self {
        self.wait = wait;
        self
    }
}

#[derive(Debug, Clone)]
pub struct LaunchResult {
    pub request: StartApplicationRequest,
    pub ide_url: String,
    pub last_status: ApplicationStatus,
}

/// Stops an application launched through the server.
pub struct StopHandle {
    server: Arc<dyn ApplicationServerRepository>,
    application_id: String,
    instance_id: String,
    engine: ConvergenceEngine,
    teardown: Option<TeardownService>,
    per_call_timeout: Duration,
}

impl StopHandle {
    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Requests the stop; a failed request is only logged. With
    /// `wait_for_stop` set, blocks until the instance is gone.
    pub async fn stop(&self, ctx: &CallContext, wait_for_stop: bool) -> HarnessResult<()> {
        let call = ctx.with_timeout(self.per_call_timeout);
        match call.run(self.server.stop_application(&self.application_id)).await {
            Ok(Ok(())) => info!(application_id = %self.application_id, "Application stop requested"),
            Ok(Err(e)) => {
                warn!(application_id = %self.application_id, error = %e, "Cannot stop application")
            }
            Err(interrupt) => {
                warn!(application_id = %self.application_id, ?interrupt, "Stopping application interrupted")
            }
        }

        if !wait_for_stop {
            return Ok(());
        }
        match &self.teardown {
            Some(teardown) => teardown.wait_for_stop(ctx, &self.instance_id).await?,
            None => self.engine.wait_for_stopped(ctx, &self.instance_id).await?,
        };
        Ok(())
    }
}

pub struct LaunchService {
    lifecycle: ApplicationLifecycle,
    engine: ConvergenceEngine,
    teardown: Option<TeardownService>,
    ide_images: Option<Arc<dyn IdeImageSource>>,
    per_call_timeout: Duration,
}

impl LaunchService {
    pub fn new(engine: ConvergenceEngine) -> Self {
        Self {
            lifecycle: ApplicationLifecycle::new(engine.repository()),
            engine,
            teardown: None,
            ide_images: None,
            per_call_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_teardown(mut self, teardown: TeardownService) -> Self {
        self.teardown = Some(teardown);
        self
    }

    pub fn with_ide_images(mut self, source: Arc<dyn IdeImageSource>) -> Self {
        self.ide_images = Some(source);
        self
    }

    pub fn with_per_call_timeout(mut self, timeout: Duration) -> Self {
        self.per_call_timeout = timeout;
        self
    }

    /// Request every directly launched instance starts from.
    pub fn base_request(instance_id: &str, meta_id: &str) -> StartApplicationRequest {
        StartApplicationRequest {
            id: instance_id.to_string(),
            service_prefix: instance_id.to_string(),
            metadata: ApplicationMetadata {
                owner: BUILTIN_OWNER.to_string(),
                meta_id: meta_id.to_string(),
            },
            application_type: ApplicationType::Regular,
            spec: ApplicationSpec {
                checkout_location: "/".to_string(),
                application_location: "/".to_string(),
                timeout: LAUNCH_TIMEOUT.to_string(),
                git: GitSpec {
                    username: TESTER_GIT_USERNAME.to_string(),
                    email: TESTER_GIT_EMAIL.to_string(),
                },
                admission: AdmissionLevel::OwnerOnly,
                ..Default::default()
            },
        }
    }

    /// Starts an instance straight through the manager and waits for it to run.
    pub async fn launch_directly(
        &self,
        ctx: &CallContext,
        options: LaunchOptions,
    ) -> HarnessResult<LaunchResult> {
        let application_image = options
            .application_image
            .filter(|image| !image.trim().is_empty())
            .ok_or_else(|| {
                HarnessError::Launch(
                    "cannot start applications without an application image".to_string(),
                )
            })?;

        let ide_image = match (options.ide_image, &self.ide_images) {
            (Some(image), _) => image,
            (None, Some(source)) => source.default_ide_image().await?,
            (None, None) => String::new(),
        };
        if ide_image.trim().is_empty() {
            return Err(HarnessError::Launch(
                "cannot start applications without an IDE image".to_string(),
            ));
        }

        let instance_id = Uuid::new_v4().to_string();
        let mut request = Self::base_request(&instance_id, &generate_application_id());
        request.spec.application_image = application_image;
        request.spec.ide_image = ide_image;
        for modifier in &options.modifiers {
            modifier(&mut request)?;
        }
        let instance_id = request.id.clone();

        let call = ctx.with_timeout(self.per_call_timeout);
        let started = call
            .run(self.lifecycle.start(request.clone()))
            .await
            .map_err(|interrupt| HarnessError::interrupted(interrupt, &instance_id, "started"))??;

        let last_status = self
            .engine
            .wait_for_start(ctx, &instance_id, options.wait)
            .await?;

        info!(instance_id = %instance_id, url = %started.url, "Application launched");
        Ok(LaunchResult {
            request,
            ide_url: started.url,
            last_status,
        })
    }

    /// Creates a fresh application for `context_url` through the server and
    /// waits until its instance runs.
    pub async fn launch_from_context_url(
        &self,
        ctx: &CallContext,
        server: Arc<dyn ApplicationServerRepository>,
        context_url: &str,
    ) -> HarnessResult<(ApplicationInfo, StopHandle)> {
        let call = ctx.with_timeout(self.per_call_timeout);
        let created = call
            .run(server.create_application(CreateApplicationOptions {
                context_url: context_url.to_string(),
                mode: CreateApplicationMode::ForceNew,
            }))
            .await
            .map_err(|_| HarnessError::Launch(format!("creating application for {context_url} timed out")))??;

        let application_id = created.created_application_id.clone().ok_or_else(|| {
            HarnessError::Launch("createApplication returned no application id".to_string())
        })?;

        let mut handle = StopHandle {
            server: server.clone(),
            application_id: application_id.clone(),
            instance_id: String::new(),
            engine: self.engine.clone(),
            teardown: self.teardown.clone(),
            per_call_timeout: self.per_call_timeout,
        };

        let launched = self
            .await_instance(ctx, server.as_ref(), &application_id, created.application_url, &mut handle)
            .await;
        match launched {
            Ok(info) => {
                info!(application_id = %application_id, instance_id = %handle.instance_id, "Application launched from context URL");
                Ok((info, handle))
            }
            Err(e) => {
                let _ = handle.stop(ctx, false).await;
                Err(e)
            }
        }
    }

    async fn await_instance(
        &self,
        ctx: &CallContext,
        server: &dyn ApplicationServerRepository,
        application_id: &str,
        application_url: Option<String>,
        handle: &mut StopHandle,
    ) -> HarnessResult<ApplicationInfo> {
        let mut info = server.get_application(application_id).await?;
        let instance = info.latest_instance.as_mut().ok_or_else(|| {
            HarnessError::Launch("createApplication did not start the application".to_string())
        })?;

        // The server may report the instance before the manager has assigned its URL.
        if let Some(url) = application_url {
            instance.ide_url = url;
        }
        handle.instance_id = instance.id.clone();

        self.engine
            .wait_for_start(ctx, &handle.instance_id, WaitOptions::default())
            .await?;
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::launch::repo::{MockApplicationServerRepository, MockIdeImageSource};
    use crate::features::lifecycle::repo::{ApplicationManagerRepository, InMemoryApplicationManager};
    use crate::shared::types::ApplicationPhase;
    use devrig_core::is_application_id;
    use devrig_rpc::{Application, ApplicationCreationResult, ApplicationInstance};
    use futures::StreamExt;

    fn service() -> (LaunchService, InMemoryApplicationManager) {
        let manager = InMemoryApplicationManager::new();
        let engine = ConvergenceEngine::new(Arc::new(manager.clone()));
        (LaunchService::new(engine), manager)
    }

    /// Marks every instance the manager starts as running.
    async fn run_started_instances(manager: &InMemoryApplicationManager) -> tokio::task::JoinHandle<()> {
        let mut updates = manager.subscribe().await.unwrap();
        let manager = manager.clone();
        tokio::spawn(async move {
            while let Some(Ok(status)) = updates.next().await {
                if status.phase == ApplicationPhase::Pending {
                    manager.publish(status.with_phase(ApplicationPhase::Running));
                }
            }
        })
    }

    #[tokio::test]
    async fn test_base_request_defaults() {
        let request = LaunchService::base_request("abc", "red-fox-12345678");
        assert_eq!(request.service_prefix, "abc");
        assert_eq!(request.metadata.owner, BUILTIN_OWNER);
        assert_eq!(request.spec.timeout, "30m");
        assert_eq!(request.spec.admission, AdmissionLevel::OwnerOnly);
        assert_eq!(request.spec.git.username, "integration-test");
    }

    #[tokio::test]
    async fn test_launch_directly_requires_images() {
        let (service, manager) = service();

        let err = service
            .launch_directly(&CallContext::new(), LaunchOptions::default().with_ide_image("ide"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("application image"));

        let err = service
            .launch_directly(
                &CallContext::new(),
                LaunchOptions::default().with_application_image("app"),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("IDE image"));
        assert_eq!(manager.statuses().len(), 0);
    }

    #[tokio::test]
    async fn test_launch_directly_waits_for_running() {
        let (service, manager) = service();
        let runner = run_started_instances(&manager).await;

        let result = service
            .launch_directly(
                &CallContext::new(),
                LaunchOptions::default()
                    .with_application_image("registry.local/app:latest")
                    .with_ide_image("registry.local/ide:latest")
                    .with_modifier(|request| {
                        request.spec.envvars.push(devrig_core::EnvironmentVariable {
                            name: "DEVRIG_TEST".to_string(),
                            value: "1".to_string(),
                        });
                        Ok(())
                    }),
            )
            .await
            .unwrap();
        runner.abort();

        assert_eq!(result.last_status.phase, ApplicationPhase::Running);
        assert!(Uuid::parse_str(&result.request.id).is_ok());
        assert!(is_application_id(&result.request.metadata.meta_id));
        assert_eq!(result.request.spec.envvars.len(), 1);
        assert!(result.ide_url.contains(&result.request.metadata.meta_id));
    }

    #[tokio::test]
    async fn test_launch_directly_reads_default_ide_image() {
        let manager = InMemoryApplicationManager::new();
        let engine = ConvergenceEngine::new(Arc::new(manager.clone()));
        let mut source = MockIdeImageSource::new();
        source
            .expect_default_ide_image()
            .times(1)
            .returning(|| Ok("registry.local/ide/code:1.2.3".to_string()));
        let service = LaunchService::new(engine).with_ide_images(Arc::new(source));
        let runner = run_started_instances(&manager).await;

        let result = service
            .launch_directly(
                &CallContext::new(),
                LaunchOptions::default().with_application_image("registry.local/app:latest"),
            )
            .await
            .unwrap();
        runner.abort();

        assert_eq!(result.request.spec.ide_image, "registry.local/ide/code:1.2.3");
    }

    #[tokio::test]
    async fn test_modifier_errors_abort_launch() {
        let (service, manager) = service();
        let err = service
            .launch_directly(
                &CallContext::new(),
                LaunchOptions::default()
                    .with_application_image("app")
                    .with_ide_image("ide")
                    .with_modifier(|_| Err(HarnessError::InvalidRequest("bad".to_string()))),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::InvalidRequest(_)));
        assert!(manager.statuses().is_empty());
    }

    fn info_with_instance(instance_id: Option<&str>) -> ApplicationInfo {
        ApplicationInfo {
            application: Application {
                id: "red-fox-12345678".to_string(),
                context_url: "https://git.local/repo".to_string(),
                ..Default::default()
            },
            latest_instance: instance_id.map(|id| ApplicationInstance {
                id: id.to_string(),
                application_id: "red-fox-12345678".to_string(),
                ..Default::default()
            }),
        }
    }

    fn created() -> ApplicationCreationResult {
        ApplicationCreationResult {
            created_application_id: Some("red-fox-12345678".to_string()),
            application_url: Some("https://red-fox-12345678.devrig.local".to_string()),
        }
    }

    #[tokio::test]
    async fn test_launch_from_context_url() {
        let (service, manager) = service();
        manager.insert(ApplicationStatus::new("abc", ApplicationPhase::Running));

        let mut server = MockApplicationServerRepository::new();
        server
            .expect_create_application()
            .withf(|options| {
                options.mode == CreateApplicationMode::ForceNew
                    && options.context_url == "https://git.local/repo"
            })
            .times(1)
            .returning(|_| Ok(created()));
        server
            .expect_get_application()
            .returning(|_| Ok(info_with_instance(Some("abc"))));
        server
            .expect_stop_application()
            .withf(|id| id == "red-fox-12345678")
            .times(1)
            .returning(|_| Ok(()));

        let (info, handle) = service
            .launch_from_context_url(&CallContext::new(), Arc::new(server), "https://git.local/repo")
            .await
            .unwrap();

        let instance = info.latest_instance.unwrap();
        assert_eq!(instance.ide_url, "https://red-fox-12345678.devrig.local");
        assert_eq!(handle.instance_id(), "abc");

        handle.stop(&CallContext::new(), false).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_instance_stops_application() {
        let (service, _) = service();

        let mut server = MockApplicationServerRepository::new();
        server.expect_create_application().returning(|_| Ok(created()));
        server
            .expect_get_application()
            .returning(|_| Ok(info_with_instance(None)));
        server.expect_stop_application().times(1).returning(|_| Ok(()));

        let err = service
            .launch_from_context_url(&CallContext::new(), Arc::new(server), "https://git.local/repo")
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("did not start the application"));
    }

    #[tokio::test]
    async fn test_failed_start_stops_application() {
        let (service, manager) = service();
        manager.insert(
            ApplicationStatus::new("abc", ApplicationPhase::Stopped).with_failure("image pull failed"),
        );

        let mut server = MockApplicationServerRepository::new();
        server.expect_create_application().returning(|_| Ok(created()));
        server
            .expect_get_application()
            .returning(|_| Ok(info_with_instance(Some("abc"))));
        server
            .expect_stop_application()
            .times(1)
            .returning(|_| Err(HarnessError::Launch("already stopping".to_string())));

        let err = service
            .launch_from_context_url(&CallContext::new(), Arc::new(server), "https://git.local/repo")
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("image pull failed"));
    }

    #[tokio::test]
    async fn test_stop_handle_waits_for_stop() {
        let (service, manager) = service();
        manager.insert(ApplicationStatus::new("abc", ApplicationPhase::Running));

        let mut server = MockApplicationServerRepository::new();
        server.expect_create_application().returning(|_| Ok(created()));
        server
            .expect_get_application()
            .returning(|_| Ok(info_with_instance(Some("abc"))));
        let stopping = manager.clone();
        server.expect_stop_application().returning(move |_| {
            stopping.insert(ApplicationStatus::new("abc", ApplicationPhase::Stopped));
            Ok(())
        });

        let (_, handle) = service
            .launch_from_context_url(&CallContext::new(), Arc::new(server), "https://git.local/repo")
            .await
            .unwrap();
        handle.stop(&CallContext::new(), true).await.unwrap();
    }
}
