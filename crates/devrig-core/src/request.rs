use crate::{ApplicationMetadata, CoreError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationType {
    #[default]
    Regular,
    Prebuild,
    Probe,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionLevel {
    #[default]
    OwnerOnly,
    Everyone,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSpec {
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSpec {
    pub application_image: String,
    pub ide_image: String,
    pub checkout_location: String,
    pub application_location: String,
    /// Go-style duration string understood by the manager, e.g. `30m`.
    pub timeout: String,
    pub git: GitSpec,
    pub admission: AdmissionLevel,
    #[serde(default)]
    pub envvars: Vec<EnvironmentVariable>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartApplicationRequest {
    pub id: String,
    pub service_prefix: String,
    pub metadata: ApplicationMetadata,
    pub application_type: ApplicationType,
    pub spec: ApplicationSpec,
}

impl StartApplicationRequest {
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.envvars.push(EnvironmentVariable {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Rejects requests the manager would refuse anyway.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(CoreError::InvalidRequest(
                "instance ID cannot be empty".to_string(),
            ));
        }
        if self.spec.application_image.trim().is_empty() {
            return Err(CoreError::InvalidRequest(
                "application image is required".to_string(),
            ));
        }
        if self.spec.ide_image.trim().is_empty() {
            return Err(CoreError::InvalidRequest("IDE image is required".to_string()));
        }
        Ok(())
    }
}
