pub use devrig_core::{
    AdmissionLevel, ApplicationConditions, ApplicationMetadata, ApplicationPhase,
    ApplicationSpec, ApplicationStatus, ApplicationType, Decision, EnvironmentVariable, GitSpec,
    StartApplicationRequest, WaitTarget,
};

/// Returned by a successful start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedApplication {
    pub instance_id: String,
    pub url: String,
}

/// Options for waiting until an instance runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitOptions {
    /// Treat stopping and stopped as a successful end of the wait.
    pub can_fail: bool,
}

impl WaitOptions {
    pub fn can_fail() -> Self {
        Self { can_fail: true }
    }

    pub fn target(&self) -> WaitTarget {
        WaitTarget::Running {
            can_fail: self.can_fail,
        }
    }
}
