//! Waiting for an instance to reach a state without missing transitions.
//!
//! A wait subscribes to the manager's status stream first and only then asks
//! for a snapshot, so a state reached before the subscription existed is seen
//! by the snapshot and anything later is seen by the stream. Both sources feed
//! one [`ResolutionSlot`]; whichever decides first wins.

use crate::features::lifecycle::repo::ApplicationManagerRepository;
use crate::features::subscription::{EventChannel, SubscriptionPolicy};
use crate::shared::context::CallContext;
use crate::shared::error::{HarnessError, HarnessResult};
use crate::shared::retry::RetryError;
use crate::shared::slot::ResolutionSlot;
use crate::shared::types::{ApplicationStatus, Decision, WaitOptions, WaitTarget};
use devrig_core::CoreError;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Outcome = Result<ApplicationStatus, CoreError>;

/// One wait on one instance.
#[derive(Debug, Clone)]
pub struct WaitRequest {
    pub instance_id: String,
    pub target: WaitTarget,
}

impl WaitRequest {
    pub fn new(instance_id: impl Into<String>, target: WaitTarget) -> Self {
        Self {
            instance_id: instance_id.into(),
            target,
        }
    }
}

#[derive(Clone)]
pub struct ConvergenceEngine {
    repo: Arc<dyn ApplicationManagerRepository>,
    policy: SubscriptionPolicy,
}

impl ConvergenceEngine {
    pub fn new(repo: Arc<dyn ApplicationManagerRepository>) -> Self {
        Self {
            repo,
            policy: SubscriptionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SubscriptionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn repository(&self) -> Arc<dyn ApplicationManagerRepository> {
        self.repo.clone()
    }

    pub async fn wait_for_start(
        &self,
        ctx: &CallContext,
        instance_id: &str,
        options: WaitOptions,
    ) -> HarnessResult<ApplicationStatus> {
        self.wait(ctx, WaitRequest::new(instance_id, options.target()))
            .await
    }

    pub async fn wait_for_stopped(
        &self,
        ctx: &CallContext,
        instance_id: &str,
    ) -> HarnessResult<ApplicationStatus> {
        self.wait(ctx, WaitRequest::new(instance_id, WaitTarget::Stopped))
            .await
    }

    pub async fn wait_for<F>(
        &self,
        ctx: &CallContext,
        instance_id: &str,
        predicate: F,
    ) -> HarnessResult<ApplicationStatus>
    where
        F: Fn(&ApplicationStatus) -> bool + Send + Sync + 'static,
    {
        self.wait(ctx, WaitRequest::new(instance_id, WaitTarget::condition(predicate)))
            .await
    }

    /// Blocks until `request` is decided, the context ends, or the stream
    /// ends without a decision. Returns the deciding status.
    pub async fn wait(
        &self,
        ctx: &CallContext,
        request: WaitRequest,
    ) -> HarnessResult<ApplicationStatus> {
        let WaitRequest {
            instance_id,
            target,
        } = request;
        let condition = target.label();

        let mut channel = EventChannel::new();
        channel
            .open(ctx, self.repo.as_ref(), self.policy)
            .await
            .map_err(|e| match e {
                RetryError::Exhausted {
                    attempts,
                    last_error,
                } => HarnessError::SubscriptionUnavailable {
                    instance_id: instance_id.clone(),
                    attempts,
                    last_error: last_error.to_string(),
                },
                RetryError::Fatal(source) => HarnessError::SubscriptionFailed {
                    instance_id: instance_id.clone(),
                    source,
                },
                RetryError::Interrupted(interrupt) => {
                    HarnessError::interrupted(interrupt, &instance_id, condition)
                }
            })?;

        debug!(instance_id = %instance_id, condition, "Waiting for application instance");

        // `slot` lives until both selects finish, so `resolved` only ever
        // completes with a committed outcome.
        let (slot, mut resolved) = ResolutionSlot::new();
        let mut receiver = TaskGuard::spawn(receive_loop(
            channel,
            instance_id.clone(),
            target.clone(),
            slot.clone(),
        ));
        let mut snapshot = TaskGuard::spawn(snapshot_probe(
            ctx.clone(),
            self.repo.clone(),
            instance_id.clone(),
            target,
            slot.clone(),
        ));

        let settle = |outcome: Outcome| outcome.map_err(HarnessError::from);

        let result = tokio::select! {
            biased;
            Ok(outcome) = &mut resolved => settle(outcome),
            interrupt = ctx.done() => Err(HarnessError::interrupted(interrupt, &instance_id, condition)),
            ended = receiver.join() => {
                let stream_error = ended.flatten().unwrap_or_else(|| HarnessError::StreamEnded {
                    instance_id: instance_id.clone(),
                });
                // An in-flight snapshot may still decide the wait.
                tokio::select! {
                    biased;
                    Ok(outcome) = &mut resolved => settle(outcome),
                    interrupt = ctx.done() => Err(HarnessError::interrupted(interrupt, &instance_id, condition)),
                    _ = snapshot.join() => match resolved.try_recv() {
                        Ok(outcome) => settle(outcome),
                        Err(_) => Err(stream_error),
                    },
                }
            }
        };

        receiver.shutdown().await;
        snapshot.shutdown().await;
        drop(slot);

        match &result {
            Ok(status) => {
                info!(instance_id = %instance_id, phase = %status.phase, condition, "Application instance reached condition")
            }
            Err(e) => debug!(instance_id = %instance_id, error = %e, "Wait ended without success"),
        }
        result
    }
}

fn decide(target: &WaitTarget, status: ApplicationStatus) -> Option<Outcome> {
    match target.evaluate(&status) {
        Decision::Pending => None,
        Decision::Satisfied => Some(Ok(status)),
        Decision::Rejected(e) => Some(Err(e)),
    }
}

/// Feeds decisive stream records into `slot`. Returns the reason the stream
/// stopped when it stopped before anything was decided.
async fn receive_loop(
    mut channel: EventChannel,
    instance_id: String,
    target: WaitTarget,
    slot: Arc<ResolutionSlot<Outcome>>,
) -> Option<HarnessError> {
    loop {
        match channel.recv().await {
            Ok(Some(status)) => {
                if status.id != instance_id {
                    continue;
                }
                debug!(instance_id = %instance_id, phase = %status.phase, "Status update");
                if let Some(outcome) = decide(&target, status) {
                    slot.resolve(outcome);
                    channel.close();
                    return None;
                }
                if slot.is_resolved() {
                    channel.close();
                    return None;
                }
            }
            Ok(None) => return Some(HarnessError::StreamEnded { instance_id }),
            Err(e) => {
                return Some(HarnessError::Stream {
                    instance_id,
                    message: e.to_string(),
                })
            }
        }
    }
}

async fn snapshot_probe(
    ctx: CallContext,
    repo: Arc<dyn ApplicationManagerRepository>,
    instance_id: String,
    target: WaitTarget,
    slot: Arc<ResolutionSlot<Outcome>>,
) {
    match ctx.run(repo.describe_application(&instance_id)).await {
        Ok(Ok(status)) => {
            if let Some(outcome) = decide(&target, status) {
                if slot.resolve(outcome) {
                    debug!(instance_id = %instance_id, "Wait decided by snapshot");
                }
            }
        }
        Ok(Err(e)) => {
            warn!(instance_id = %instance_id, error = %e, "Snapshot lookup failed, relying on status updates")
        }
        Err(_) => {}
    }
}

/// Spawned task that is aborted when the guard goes away.
struct TaskGuard<T> {
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> TaskGuard<T> {
    fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            handle: Some(tokio::spawn(future)),
        }
    }

    /// Output of the task; pends forever once joined.
    async fn join(&mut self) -> Option<T> {
        match self.handle.as_mut() {
            Some(handle) => {
                let output = handle.await.ok();
                self.handle = None;
                output
            }
            None => std::future::pending().await,
        }
    }

    async fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl<T> Drop for TaskGuard<T> {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}
