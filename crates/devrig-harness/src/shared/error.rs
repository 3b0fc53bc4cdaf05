use devrig_core::CoreError;
use devrig_rpc::RpcError;
use std::fmt;
use thiserror::Error;

use crate::shared::context::Interrupt;

/// Status classes the lifecycle manager reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerErrorCode {
    NotFound,
    Unavailable,
    DeadlineExceeded,
    Cancelled,
    InvalidArgument,
    FailedPrecondition,
    Internal,
    Other,
}

impl fmt::Display for ManagerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManagerErrorCode::NotFound => "not found",
            ManagerErrorCode::Unavailable => "unavailable",
            ManagerErrorCode::DeadlineExceeded => "deadline exceeded",
            ManagerErrorCode::Cancelled => "cancelled",
            ManagerErrorCode::InvalidArgument => "invalid argument",
            ManagerErrorCode::FailedPrecondition => "failed precondition",
            ManagerErrorCode::Internal => "internal",
            ManagerErrorCode::Other => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("manager returned {code}: {message}")]
pub struct ManagerError {
    pub code: ManagerErrorCode,
    pub message: String,
}

impl ManagerError {
    pub fn new(code: ManagerErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ManagerErrorCode::NotFound, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ManagerErrorCode::NotFound
    }
}

impl From<tonic::Status> for ManagerError {
    fn from(status: tonic::Status) -> Self {
        let code = match status.code() {
            tonic::Code::NotFound => ManagerErrorCode::NotFound,
            tonic::Code::Unavailable => ManagerErrorCode::Unavailable,
            tonic::Code::DeadlineExceeded => ManagerErrorCode::DeadlineExceeded,
            tonic::Code::Cancelled => ManagerErrorCode::Cancelled,
            tonic::Code::InvalidArgument => ManagerErrorCode::InvalidArgument,
            tonic::Code::FailedPrecondition => ManagerErrorCode::FailedPrecondition,
            tonic::Code::Internal => ManagerErrorCode::Internal,
            _ => ManagerErrorCode::Other,
        };
        Self::new(code, status.message())
    }
}

/// Harness specific errors
#[derive(Debug, Clone, Error)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Manager(#[from] ManagerError),
    #[error("application instance {0} not found")]
    InstanceNotFound(String),
    #[error(transparent)]
    Instance(#[from] CoreError),
    #[error("cannot subscribe to status updates for application instance {instance_id} after {attempts} attempts: {last_error}")]
    SubscriptionUnavailable {
        instance_id: String,
        attempts: u32,
        last_error: String,
    },
    #[error("cannot subscribe to status updates for application instance {instance_id}: {source}")]
    SubscriptionFailed {
        instance_id: String,
        source: ManagerError,
    },
    #[error("status stream for application instance {instance_id} ended unexpectedly")]
    StreamEnded { instance_id: String },
    #[error("status stream for application instance {instance_id} failed: {message}")]
    Stream { instance_id: String, message: String },
    #[error("timed out waiting for application instance {instance_id} to become {condition}")]
    Timeout {
        instance_id: String,
        condition: String,
    },
    #[error("waiting for application instance {instance_id} to become {condition} was cancelled")]
    Cancelled {
        instance_id: String,
        condition: String,
    },
    #[error("{kind} {name} did not disappear in time")]
    SideResourcePersisted { kind: String, name: String },
    #[error("Cluster error: {0}")]
    Cluster(String),
    #[error("Agent error: {0}")]
    Agent(String),
    #[error("cannot launch application: {0}")]
    Launch(String),
    #[error("Server API error: {0}")]
    Server(#[from] RpcError),
}

impl HarnessError {
    /// Error for a wait on `instance_id` that the caller's context ended.
    pub fn interrupted(
        interrupt: Interrupt,
        instance_id: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        let instance_id = instance_id.into();
        let condition = condition.into();
        match interrupt {
            Interrupt::Cancelled => HarnessError::Cancelled {
                instance_id,
                condition,
            },
            Interrupt::DeadlineExceeded => HarnessError::Timeout {
                instance_id,
                condition,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            HarnessError::InstanceNotFound(_) => true,
            HarnessError::Manager(err) => err.is_not_found(),
            HarnessError::Server(err) => err.is_not_found(),
            _ => false,
        }
    }
}

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tonic_status_maps_to_code() {
        let err = ManagerError::from(tonic::Status::not_found("no such instance"));
        assert!(err.is_not_found());
        assert_eq!(err.message, "no such instance");

        let err = ManagerError::from(tonic::Status::resource_exhausted("busy"));
        assert_eq!(err.code, ManagerErrorCode::Other);
    }

    #[test]
    fn test_interrupt_names_instance_and_condition() {
        let err = HarnessError::interrupted(Interrupt::DeadlineExceeded, "abc", "running");
        assert_eq!(
            err.to_string(),
            "timed out waiting for application instance abc to become running"
        );

        let err = HarnessError::interrupted(Interrupt::Cancelled, "abc", "stopped");
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn test_instance_errors_are_transparent() {
        let err = HarnessError::from(CoreError::InstanceStopped("abc".to_string()));
        assert_eq!(err.to_string(), "application instance abc has stopped");
    }

    #[test]
    fn test_not_found_classification() {
        assert!(HarnessError::InstanceNotFound("abc".to_string()).is_not_found());
        assert!(HarnessError::from(ManagerError::not_found("gone")).is_not_found());
        assert!(!HarnessError::Agent("boom".to_string()).is_not_found());
    }

    #[test]
    fn test_subscription_errors_name_instance() {
        let err = HarnessError::SubscriptionFailed {
            instance_id: "abc".to_string(),
            source: ManagerError::new(ManagerErrorCode::Internal, "boom"),
        };
        assert_eq!(
            err.to_string(),
            "cannot subscribe to status updates for application instance abc: manager returned internal: boom"
        );
    }

    #[test]
    fn test_side_resource_message() {
        let err = HarnessError::SideResourcePersisted {
            kind: "service".to_string(),
            name: "ws-abc-ide".to_string(),
        };
        assert_eq!(err.to_string(), "service ws-abc-ide did not disappear in time");
    }
}
