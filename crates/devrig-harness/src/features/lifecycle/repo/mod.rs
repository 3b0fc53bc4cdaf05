pub mod grpc;

use crate::shared::error::{ManagerError, ManagerErrorCode};
use crate::shared::types::{ApplicationPhase, ApplicationStatus, StartApplicationRequest};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

/// Status updates of every instance, in manager order.
pub type StatusStream = BoxStream<'static, Result<ApplicationStatus, ManagerError>>;

/// Access to the remote lifecycle manager.
#[async_trait]
pub trait ApplicationManagerRepository: Send + Sync {
    /// Start an instance and return its URL
    async fn start_application(
        &self,
        request: StartApplicationRequest,
    ) -> Result<String, ManagerError>;

    async fn stop_application(&self, instance_id: &str) -> Result<(), ManagerError>;

    async fn delete_application(&self, instance_id: &str) -> Result<(), ManagerError>;

    /// Point-in-time status of one instance
    async fn describe_application(
        &self,
        instance_id: &str,
    ) -> Result<ApplicationStatus, ManagerError>;

    async fn list_applications(&self) -> Result<Vec<ApplicationStatus>, ManagerError>;

    /// Open the status stream. Updates sent before this returns are lost.
    async fn subscribe(&self) -> Result<StatusStream, ManagerError>;
}

#[derive(Debug, Clone)]
enum StreamEvent {
    Status(ApplicationStatus),
    Error(ManagerError),
    End,
}

struct Inner {
    statuses: RwLock<HashMap<String, ApplicationStatus>>,
    events: broadcast::Sender<StreamEvent>,
    open_streams: Arc<AtomicUsize>,
    subscribe_attempts: AtomicUsize,
    subscribe_failures: Mutex<VecDeque<ManagerError>>,
    describe_failure: Mutex<Option<ManagerError>>,
    describe_delay: Mutex<Duration>,
    stream_opened: Notify,
    url_domain: String,
}

/// In-process manager. Tests drive it by publishing statuses and injecting
/// faults; it never advances instances on its own except on stop.
#[derive(Clone)]
pub struct InMemoryApplicationManager {
    inner: Arc<Inner>,
}

impl InMemoryApplicationManager {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                statuses: RwLock::new(HashMap::new()),
                events,
                open_streams: Arc::new(AtomicUsize::new(0)),
                subscribe_attempts: AtomicUsize::new(0),
                subscribe_failures: Mutex::new(VecDeque::new()),
                describe_failure: Mutex::new(None),
                describe_delay: Mutex::new(Duration::ZERO),
                stream_opened: Notify::new(),
                url_domain: "devrig.local".to_string(),
            }),
        }
    }

    /// Record a status without telling subscribers.
    pub fn insert(&self, status: ApplicationStatus) {
        self.inner
            .statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(status.id.clone(), status);
    }

    /// Record a status and push it to subscribers.
    pub fn publish(&self, status: ApplicationStatus) {
        self.insert(status.clone());
        self.emit(status);
    }

    /// Push a status to subscribers without changing what describe returns.
    pub fn emit(&self, status: ApplicationStatus) {
        let _ = self.inner.events.send(StreamEvent::Status(status));
    }

    /// Cleanly end every open stream.
    pub fn end_streams(&self) {
        let _ = self.inner.events.send(StreamEvent::End);
    }

    /// Break every open stream with `error`.
    pub fn fail_streams(&self, error: ManagerError) {
        let _ = self.inner.events.send(StreamEvent::Error(error));
    }

    /// The next `count` subscribe calls fail with `error`.
    pub fn fail_subscribes(&self, count: usize, error: ManagerError) {
        let mut failures = self
            .inner
            .subscribe_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        failures.extend(std::iter::repeat(error).take(count));
    }

    pub fn fail_describe(&self, error: Option<ManagerError>) {
        *self
            .inner
            .describe_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = error;
    }

    pub fn set_describe_delay(&self, delay: Duration) {
        *self
            .inner
            .describe_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn status(&self, instance_id: &str) -> Option<ApplicationStatus> {
        self.inner
            .statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instance_id)
            .cloned()
    }

    /// Every known status, ordered by instance id.
    pub fn statuses(&self) -> Vec<ApplicationStatus> {
        let mut statuses: Vec<ApplicationStatus> = self
            .inner
            .statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    pub fn open_streams(&self) -> usize {
        self.inner.open_streams.load(Ordering::SeqCst)
    }

    pub fn subscribe_attempts(&self) -> usize {
        self.inner.subscribe_attempts.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` streams are open.
    pub async fn wait_for_streams(&self, count: usize) {
        loop {
            let opened = self.inner.stream_opened.notified();
            if self.open_streams() >= count {
                return;
            }
            opened.await;
        }
    }

    fn not_found(instance_id: &str) -> ManagerError {
        ManagerError::not_found(format!("application instance {instance_id} does not exist"))
    }
}

impl Default for InMemoryApplicationManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the open stream counter when the stream is dropped.
struct OpenStream {
    receiver: broadcast::Receiver<StreamEvent>,
    open_streams: Arc<AtomicUsize>,
    finished: bool,
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        self.open_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ApplicationManagerRepository for InMemoryApplicationManager {
    async fn start_application(
        &self,
        request: StartApplicationRequest,
    ) -> Result<String, ManagerError> {
        if request.id.is_empty() {
            return Err(ManagerError::new(
                ManagerErrorCode::InvalidArgument,
                "instance ID cannot be empty",
            ));
        }
        if self.status(&request.id).is_some() {
            return Err(ManagerError::new(
                ManagerErrorCode::FailedPrecondition,
                format!("application instance {} already exists", request.id),
            ));
        }

        let url = format!("https://{}.{}", request.metadata.meta_id, self.inner.url_domain);
        let status = ApplicationStatus::new(&request.id, ApplicationPhase::Pending)
            .with_metadata(request.metadata.owner, request.metadata.meta_id)
            .with_url(url.clone());
        self.publish(status);

        Ok(url)
    }

    async fn stop_application(&self, instance_id: &str) -> Result<(), ManagerError> {
        let current = self
            .status(instance_id)
            .ok_or_else(|| Self::not_found(instance_id))?;

        self.publish(current.clone().with_phase(ApplicationPhase::Stopping));
        self.publish(current.with_phase(ApplicationPhase::Stopped));
        Ok(())
    }

    async fn delete_application(&self, instance_id: &str) -> Result<(), ManagerError> {
        let removed = self
            .inner
            .statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(instance_id);

        match removed {
            Some(status) => {
                self.emit(status.with_phase(ApplicationPhase::Stopped));
                Ok(())
            }
            None => Err(Self::not_found(instance_id)),
        }
    }

    async fn describe_application(
        &self,
        instance_id: &str,
    ) -> Result<ApplicationStatus, ManagerError> {
        let delay = *self
            .inner
            .describe_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .inner
            .describe_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(error) = failure {
            return Err(error);
        }

        self.status(instance_id)
            .ok_or_else(|| Self::not_found(instance_id))
    }

    async fn list_applications(&self) -> Result<Vec<ApplicationStatus>, ManagerError> {
        Ok(self.statuses())
    }

    async fn subscribe(&self) -> Result<StatusStream, ManagerError> {
        self.inner.subscribe_attempts.fetch_add(1, Ordering::SeqCst);

        let failure = self
            .inner
            .subscribe_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        self.inner.open_streams.fetch_add(1, Ordering::SeqCst);
        let state = OpenStream {
            receiver: self.inner.events.subscribe(),
            open_streams: self.inner.open_streams.clone(),
            finished: false,
        };
        self.inner.stream_opened.notify_waiters();

        let stream = stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }
            loop {
                match state.receiver.recv().await {
                    Ok(StreamEvent::Status(status)) => return Some((Ok(status), state)),
                    Ok(StreamEvent::Error(error)) => {
                        state.finished = true;
                        return Some((Err(error), state));
                    }
                    Ok(StreamEvent::End) | Err(broadcast::error::RecvError::Closed) => {
                        return None
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::types::ApplicationMetadata;

    fn request(id: &str) -> StartApplicationRequest {
        StartApplicationRequest {
            id: id.to_string(),
            metadata: ApplicationMetadata {
                owner: "owner-1".to_string(),
                meta_id: "red-fox-12345678".to_string(),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_and_describe() {
        let manager = InMemoryApplicationManager::new();
        let url = manager.start_application(request("abc")).await.unwrap();
        assert_eq!(url, "https://red-fox-12345678.devrig.local");

        let status = manager.describe_application("abc").await.unwrap();
        assert_eq!(status.phase, ApplicationPhase::Pending);
        assert_eq!(status.metadata.meta_id, "red-fox-12345678");
    }

    #[tokio::test]
    async fn test_start_rejects_duplicate() {
        let manager = InMemoryApplicationManager::new();
        manager.start_application(request("abc")).await.unwrap();
        let err = manager.start_application(request("abc")).await.unwrap_err();
        assert_eq!(err.code, ManagerErrorCode::FailedPrecondition);
    }

    #[tokio::test]
    async fn test_stream_sees_published_updates_and_end() {
        let manager = InMemoryApplicationManager::new();
        let mut stream = manager.subscribe().await.unwrap();
        assert_eq!(manager.open_streams(), 1);

        manager.publish(ApplicationStatus::new("abc", ApplicationPhase::Running));
        manager.end_streams();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.phase, ApplicationPhase::Running);
        assert!(stream.next().await.is_none());

        drop(stream);
        assert_eq!(manager.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_stream_error_terminates_stream() {
        let manager = InMemoryApplicationManager::new();
        let mut stream = manager.subscribe().await.unwrap();

        manager.fail_streams(ManagerError::new(ManagerErrorCode::Unavailable, "gone"));
        manager.publish(ApplicationStatus::new("abc", ApplicationPhase::Running));

        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_injected_subscribe_failures_are_consumed() {
        let manager = InMemoryApplicationManager::new();
        manager.fail_subscribes(2, ManagerError::not_found("not ready"));

        assert!(manager.subscribe().await.is_err());
        assert!(manager.subscribe().await.is_err());
        assert!(manager.subscribe().await.is_ok());
        assert_eq!(manager.subscribe_attempts(), 3);
    }

    #[tokio::test]
    async fn test_stop_moves_through_stopping() {
        let manager = InMemoryApplicationManager::new();
        manager.start_application(request("abc")).await.unwrap();
        let mut stream = manager.subscribe().await.unwrap();

        manager.stop_application("abc").await.unwrap();

        let phases: Vec<ApplicationPhase> = vec![
            stream.next().await.unwrap().unwrap().phase,
            stream.next().await.unwrap().unwrap().phase,
        ];
        assert_eq!(
            phases,
            vec![ApplicationPhase::Stopping, ApplicationPhase::Stopped]
        );
        assert!(manager
            .stop_application("missing")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let manager = InMemoryApplicationManager::new();
        manager.start_application(request("b")).await.unwrap();
        manager.start_application(request("a")).await.unwrap();

        let ids: Vec<String> = manager
            .list_applications()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        manager.delete_application("a").await.unwrap();
        assert!(manager.delete_application("a").await.unwrap_err().is_not_found());
        assert!(manager.describe_application("a").await.is_err());
    }
}
