pub mod decision;
pub mod naming;
pub mod request;

pub use decision::{Decision, WaitTarget};
pub use naming::{generate_application_id, ide_service_name, is_application_id};
pub use request::{
    AdmissionLevel, ApplicationSpec, ApplicationType, EnvironmentVariable, GitSpec,
    StartApplicationRequest,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("application instance {instance_id} failed: {reason}")]
    InstanceFailed { instance_id: String, reason: String },
    #[error("application instance {0} is stopping")]
    InstanceStopping(String),
    #[error("application instance {0} has stopped")]
    InstanceStopped(String),
    #[error("Invalid application ID: {0}")]
    InvalidApplicationId(String),
    #[error("Invalid phase: {0}")]
    InvalidPhase(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Lifecycle stage of an application instance. The declaration order is the
/// order an instance moves through, so `Ord` compares progress.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationPhase {
    #[default]
    Unknown,
    Pending,
    Creating,
    Initializing,
    Running,
    Interrupted,
    Stopping,
    Stopped,
}

impl ApplicationPhase {
    pub const ALL: [ApplicationPhase; 8] = [
        ApplicationPhase::Unknown,
        ApplicationPhase::Pending,
        ApplicationPhase::Creating,
        ApplicationPhase::Initializing,
        ApplicationPhase::Running,
        ApplicationPhase::Interrupted,
        ApplicationPhase::Stopping,
        ApplicationPhase::Stopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationPhase::Unknown => "unknown",
            ApplicationPhase::Pending => "pending",
            ApplicationPhase::Creating => "creating",
            ApplicationPhase::Initializing => "initializing",
            ApplicationPhase::Running => "running",
            ApplicationPhase::Interrupted => "interrupted",
            ApplicationPhase::Stopping => "stopping",
            ApplicationPhase::Stopped => "stopped",
        }
    }

    /// Stopping or stopped: the instance will not reach running again.
    pub fn is_winding_down(&self) -> bool {
        matches!(self, ApplicationPhase::Stopping | ApplicationPhase::Stopped)
    }
}

impl fmt::Display for ApplicationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationPhase {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        ApplicationPhase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == normalized)
            .ok_or_else(|| CoreError::InvalidPhase(value.to_string()))
    }
}

/// Flags reported next to the phase. They never change the phase by
/// themselves; a non-empty `failed` reason marks the instance as failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConditions {
    #[serde(default)]
    pub failed: String,
    #[serde(default)]
    pub timeout: String,
    #[serde(default)]
    pub pulling_images: bool,
    #[serde(default)]
    pub deployed: bool,
    #[serde(default)]
    pub needed_image_build: bool,
    #[serde(default)]
    pub first_user_activity: Option<String>,
}

impl ApplicationConditions {
    pub fn failure(&self) -> Option<&str> {
        let reason = self.failed.trim();
        if reason.is_empty() {
            None
        } else {
            Some(reason)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationMetadata {
    pub owner: String,
    pub meta_id: String,
}

/// Point-in-time view of an application instance as reported by the manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationStatus {
    pub id: String,
    pub metadata: ApplicationMetadata,
    pub phase: ApplicationPhase,
    pub conditions: ApplicationConditions,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub node_name: String,
}

impl ApplicationStatus {
    pub fn new(id: impl Into<String>, phase: ApplicationPhase) -> Self {
        Self {
            id: id.into(),
            phase,
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, owner: impl Into<String>, meta_id: impl Into<String>) -> Self {
        self.metadata = ApplicationMetadata {
            owner: owner.into(),
            meta_id: meta_id.into(),
        };
        self
    }

    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.conditions.failed = reason.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_phase(mut self, phase: ApplicationPhase) -> Self {
        self.phase = phase;
        self
    }
}
