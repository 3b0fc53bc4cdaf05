use crate::{ApplicationPhase, ApplicationStatus, CoreError};
use std::fmt;
use std::sync::Arc;

/// Outcome of evaluating one status observation against a wait target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Not decisive, keep observing.
    Pending,
    /// The wait is over and succeeded.
    Satisfied,
    /// The wait is over and failed.
    Rejected(CoreError),
}

impl Decision {
    pub fn is_decisive(&self) -> bool {
        !matches!(self, Decision::Pending)
    }
}

pub type StatusPredicate = Arc<dyn Fn(&ApplicationStatus) -> bool + Send + Sync>;

/// What a wait is waiting for.
#[derive(Clone)]
pub enum WaitTarget {
    /// Running. With `can_fail` set, stopping and stopped also end the wait
    /// successfully.
    Running { can_fail: bool },
    Stopped,
    /// Caller supplied predicate; satisfied as soon as it returns true.
    Condition(StatusPredicate),
}

impl WaitTarget {
    pub fn running() -> Self {
        WaitTarget::Running { can_fail: false }
    }

    pub fn running_or_gone() -> Self {
        WaitTarget::Running { can_fail: true }
    }

    pub fn condition<F>(predicate: F) -> Self
    where
        F: Fn(&ApplicationStatus) -> bool + Send + Sync + 'static,
    {
        WaitTarget::Condition(Arc::new(predicate))
    }

    /// What the instance is expected to become, for messages.
    pub fn label(&self) -> &'static str {
        match self {
            WaitTarget::Running { .. } => "running",
            WaitTarget::Stopped => "stopped",
            WaitTarget::Condition(_) => "ready",
        }
    }

    pub fn evaluate(&self, status: &ApplicationStatus) -> Decision {
        match self {
            WaitTarget::Running { can_fail } => evaluate_running(status, *can_fail),
            WaitTarget::Stopped => evaluate_stopped(status),
            WaitTarget::Condition(predicate) => {
                if predicate(status) {
                    Decision::Satisfied
                } else {
                    Decision::Pending
                }
            }
        }
    }
}

impl fmt::Debug for WaitTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitTarget::Running { can_fail } => f
                .debug_struct("Running")
                .field("can_fail", can_fail)
                .finish(),
            WaitTarget::Stopped => f.write_str("Stopped"),
            WaitTarget::Condition(_) => f.write_str("Condition(..)"),
        }
    }
}

fn failed(status: &ApplicationStatus) -> Option<Decision> {
    status.conditions.failure().map(|reason| {
        Decision::Rejected(CoreError::InstanceFailed {
            instance_id: status.id.clone(),
            reason: reason.to_string(),
        })
    })
}

fn evaluate_running(status: &ApplicationStatus, can_fail: bool) -> Decision {
    if let Some(rejected) = failed(status) {
        return rejected;
    }

    match status.phase {
        ApplicationPhase::Running => Decision::Satisfied,
        ApplicationPhase::Stopping | ApplicationPhase::Stopped if can_fail => Decision::Satisfied,
        ApplicationPhase::Stopping => {
            Decision::Rejected(CoreError::InstanceStopping(status.id.clone()))
        }
        ApplicationPhase::Stopped => {
            Decision::Rejected(CoreError::InstanceStopped(status.id.clone()))
        }
        _ => Decision::Pending,
    }
}

fn evaluate_stopped(status: &ApplicationStatus) -> Decision {
    if let Some(rejected) = failed(status) {
        return rejected;
    }

    if status.phase == ApplicationPhase::Stopped {
        Decision::Satisfied
    } else {
        Decision::Pending
    }
}
