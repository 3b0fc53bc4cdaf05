use crate::features::lifecycle::repo::{ApplicationManagerRepository, StatusStream};
use crate::shared::context::CallContext;
use crate::shared::error::ManagerError;
use crate::shared::retry::{retry_attempts, RetryError};
use crate::shared::types::ApplicationStatus;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_SUBSCRIBE_ATTEMPTS: u32 = 5;
pub const DEFAULT_SUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unopened,
    Opening,
    Open,
    Closed,
    Failed,
}

/// How hard to try when the manager is not ready to stream yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for SubscriptionPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_SUBSCRIBE_ATTEMPTS,
            backoff: DEFAULT_SUBSCRIBE_BACKOFF,
        }
    }
}

/// One status subscription to the manager.
pub struct EventChannel {
    state: ChannelState,
    stream: Option<StatusStream>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self {
            state: ChannelState::Unopened,
            stream: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Subscribes, retrying only while the manager answers "not found".
    pub async fn open(
        &mut self,
        ctx: &CallContext,
        repo: &dyn ApplicationManagerRepository,
        policy: SubscriptionPolicy,
    ) -> Result<(), RetryError<ManagerError>> {
        if self.state != ChannelState::Unopened {
            return Ok(());
        }
        self.state = ChannelState::Opening;

        let opened = retry_attempts(
            ctx,
            policy.attempts,
            policy.backoff,
            |err: &ManagerError| {
                if err.is_not_found() {
                    debug!(error = %err, "Status stream not ready yet");
                    true
                } else {
                    false
                }
            },
            |attempt| {
                debug!(attempt, "Subscribing to status updates");
                repo.subscribe()
            },
        )
        .await;

        match opened {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = ChannelState::Open;
                Ok(())
            }
            Err(e) => {
                self.state = ChannelState::Failed;
                Err(e)
            }
        }
    }

    /// Next status. `Ok(None)` once the stream has ended or the channel is
    /// closed.
    pub async fn recv(&mut self) -> Result<Option<ApplicationStatus>, ManagerError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };

        match stream.next().await {
            Some(Ok(status)) => Ok(Some(status)),
            Some(Err(e)) => {
                warn!(error = %e, "Status stream failed");
                self.stream = None;
                self.state = ChannelState::Failed;
                Err(e)
            }
            None => {
                self.stream = None;
                self.state = ChannelState::Closed;
                Ok(None)
            }
        }
    }

    pub fn close(&mut self) {
        self.stream = None;
        if self.state != ChannelState::Failed {
            self.state = ChannelState::Closed;
        }
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::lifecycle::repo::InMemoryApplicationManager;
    use crate::shared::error::ManagerErrorCode;
    use crate::shared::types::ApplicationPhase;
    use tokio::time::Instant;

    fn fast_policy() -> SubscriptionPolicy {
        SubscriptionPolicy {
            attempts: 5,
            backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_open_and_receive() {
        let manager = InMemoryApplicationManager::new();
        let mut channel = EventChannel::new();
        assert_eq!(channel.state(), ChannelState::Unopened);

        channel
            .open(&CallContext::new(), &manager, fast_policy())
            .await
            .unwrap();
        assert_eq!(channel.state(), ChannelState::Open);

        manager.publish(crate::shared::types::ApplicationStatus::new(
            "abc",
            ApplicationPhase::Creating,
        ));
        let status = channel.recv().await.unwrap().unwrap();
        assert_eq!(status.phase, ApplicationPhase::Creating);
    }

    #[tokio::test]
    async fn test_retries_while_not_ready() {
        let manager = InMemoryApplicationManager::new();
        manager.fail_subscribes(3, ManagerError::not_found("not ready"));

        let mut channel = EventChannel::new();
        channel
            .open(&CallContext::new(), &manager, fast_policy())
            .await
            .unwrap();

        assert_eq!(manager.subscribe_attempts(), 4);
        assert_eq!(channel.state(), ChannelState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_five_attempts() {
        let manager = InMemoryApplicationManager::new();
        manager.fail_subscribes(10, ManagerError::not_found("not ready"));

        let started = Instant::now();
        let mut channel = EventChannel::new();
        let result = channel
            .open(&CallContext::new(), &manager, SubscriptionPolicy::default())
            .await;

        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 5, .. })
        ));
        assert_eq!(manager.subscribe_attempts(), 5);
        assert!(started.elapsed() <= Duration::from_secs(5));
        assert_eq!(channel.state(), ChannelState::Failed);
    }

    #[tokio::test]
    async fn test_other_open_errors_surface_immediately() {
        let manager = InMemoryApplicationManager::new();
        manager.fail_subscribes(
            1,
            ManagerError::new(ManagerErrorCode::Unavailable, "connection refused"),
        );

        let mut channel = EventChannel::new();
        let result = channel
            .open(&CallContext::new(), &manager, fast_policy())
            .await;

        assert!(matches!(result, Err(RetryError::Fatal(_))));
        assert_eq!(manager.subscribe_attempts(), 1);
    }

    #[tokio::test]
    async fn test_clean_end_closes_channel() {
        let manager = InMemoryApplicationManager::new();
        let mut channel = EventChannel::new();
        channel
            .open(&CallContext::new(), &manager, fast_policy())
            .await
            .unwrap();

        manager.end_streams();
        assert_eq!(channel.recv().await.unwrap(), None);
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(manager.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_stream_error_fails_channel() {
        let manager = InMemoryApplicationManager::new();
        let mut channel = EventChannel::new();
        channel
            .open(&CallContext::new(), &manager, fast_policy())
            .await
            .unwrap();

        manager.fail_streams(ManagerError::new(ManagerErrorCode::Internal, "reset"));
        assert!(channel.recv().await.is_err());
        assert_eq!(channel.state(), ChannelState::Failed);
        assert_eq!(channel.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_releases_stream() {
        let manager = InMemoryApplicationManager::new();
        let mut channel = EventChannel::new();
        channel
            .open(&CallContext::new(), &manager, fast_policy())
            .await
            .unwrap();
        assert_eq!(manager.open_streams(), 1);

        channel.close();
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(manager.open_streams(), 0);
    }
}
