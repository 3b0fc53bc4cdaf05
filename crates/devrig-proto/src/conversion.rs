use crate::v1;
use devrig_core as core;
use std::convert::TryFrom;

// ApplicationPhase
impl From<core::ApplicationPhase> for v1::ApplicationPhase {
    fn from(phase: core::ApplicationPhase) -> Self {
        match phase {
            core::ApplicationPhase::Unknown => Self::Unknown,
            core::ApplicationPhase::Pending => Self::Pending,
            core::ApplicationPhase::Creating => Self::Creating,
            core::ApplicationPhase::Initializing => Self::Initializing,
            core::ApplicationPhase::Running => Self::Running,
            core::ApplicationPhase::Interrupted => Self::Interrupted,
            core::ApplicationPhase::Stopping => Self::Stopping,
            core::ApplicationPhase::Stopped => Self::Stopped,
        }
    }
}

impl From<v1::ApplicationPhase> for core::ApplicationPhase {
    fn from(phase: v1::ApplicationPhase) -> Self {
        match phase {
            v1::ApplicationPhase::Unknown => Self::Unknown,
            v1::ApplicationPhase::Pending => Self::Pending,
            v1::ApplicationPhase::Creating => Self::Creating,
            v1::ApplicationPhase::Initializing => Self::Initializing,
            v1::ApplicationPhase::Running => Self::Running,
            v1::ApplicationPhase::Interrupted => Self::Interrupted,
            v1::ApplicationPhase::Stopping => Self::Stopping,
            v1::ApplicationPhase::Stopped => Self::Stopped,
        }
    }
}

pub fn phase_from_wire(value: i32) -> Result<core::ApplicationPhase, String> {
    v1::ApplicationPhase::try_from(value)
        .map(Into::into)
        .map_err(|_| format!("unknown application phase {value}"))
}

// ApplicationMetadata
impl From<core::ApplicationMetadata> for v1::ApplicationMetadata {
    fn from(metadata: core::ApplicationMetadata) -> Self {
        Self {
            owner: metadata.owner,
            meta_id: metadata.meta_id,
        }
    }
}

impl From<v1::ApplicationMetadata> for core::ApplicationMetadata {
    fn from(metadata: v1::ApplicationMetadata) -> Self {
        Self {
            owner: metadata.owner,
            meta_id: metadata.meta_id,
        }
    }
}

// ApplicationConditions
impl From<core::ApplicationConditions> for v1::ApplicationConditions {
    fn from(conditions: core::ApplicationConditions) -> Self {
        Self {
            failed: conditions.failed,
            timeout: conditions.timeout,
            pulling_images: conditions.pulling_images,
            deployed: conditions.deployed,
            needed_image_build: conditions.needed_image_build,
            first_user_activity: conditions.first_user_activity.unwrap_or_default(),
        }
    }
}

impl From<v1::ApplicationConditions> for core::ApplicationConditions {
    fn from(conditions: v1::ApplicationConditions) -> Self {
        Self {
            failed: conditions.failed,
            timeout: conditions.timeout,
            pulling_images: conditions.pulling_images,
            deployed: conditions.deployed,
            needed_image_build: conditions.needed_image_build,
            first_user_activity: Some(conditions.first_user_activity)
                .filter(|value| !value.is_empty()),
        }
    }
}

// ApplicationStatus
impl From<core::ApplicationStatus> for v1::ApplicationStatus {
    fn from(status: core::ApplicationStatus) -> Self {
        Self {
            id: status.id,
            metadata: Some(status.metadata.into()),
            phase: v1::ApplicationPhase::from(status.phase) as i32,
            conditions: Some(status.conditions.into()),
            message: status.message,
            url: status.url,
            node_name: status.node_name,
        }
    }
}

impl TryFrom<v1::ApplicationStatus> for core::ApplicationStatus {
    type Error = String;

    fn try_from(status: v1::ApplicationStatus) -> Result<Self, Self::Error> {
        if status.id.is_empty() {
            return Err("status is missing the instance id".to_string());
        }

        Ok(Self {
            phase: phase_from_wire(status.phase)?,
            id: status.id,
            metadata: status.metadata.map(Into::into).unwrap_or_default(),
            conditions: status.conditions.map(Into::into).unwrap_or_default(),
            message: status.message,
            url: status.url,
            node_name: status.node_name,
        })
    }
}

// StartApplicationRequest
impl From<core::ApplicationType> for v1::ApplicationType {
    fn from(kind: core::ApplicationType) -> Self {
        match kind {
            core::ApplicationType::Regular => Self::Regular,
            core::ApplicationType::Prebuild => Self::Prebuild,
            core::ApplicationType::Probe => Self::Probe,
        }
    }
}

impl From<v1::ApplicationType> for core::ApplicationType {
    fn from(kind: v1::ApplicationType) -> Self {
        match kind {
            v1::ApplicationType::Regular => Self::Regular,
            v1::ApplicationType::Prebuild => Self::Prebuild,
            v1::ApplicationType::Probe => Self::Probe,
        }
    }
}

impl From<core::AdmissionLevel> for v1::AdmissionLevel {
    fn from(level: core::AdmissionLevel) -> Self {
        match level {
            core::AdmissionLevel::OwnerOnly => Self::OwnerOnly,
            core::AdmissionLevel::Everyone => Self::Everyone,
        }
    }
}

impl From<v1::AdmissionLevel> for core::AdmissionLevel {
    fn from(level: v1::AdmissionLevel) -> Self {
        match level {
            v1::AdmissionLevel::OwnerOnly => Self::OwnerOnly,
            v1::AdmissionLevel::Everyone => Self::Everyone,
        }
    }
}

impl From<core::ApplicationSpec> for v1::StartApplicationSpec {
    fn from(spec: core::ApplicationSpec) -> Self {
        Self {
            application_image: spec.application_image,
            ide_image: spec.ide_image,
            checkout_location: spec.checkout_location,
            application_location: spec.application_location,
            timeout: spec.timeout,
            git: Some(v1::GitSpec {
                username: spec.git.username,
                email: spec.git.email,
            }),
            admission: v1::AdmissionLevel::from(spec.admission) as i32,
            envvars: spec
                .envvars
                .into_iter()
                .map(|var| v1::EnvironmentVariable {
                    name: var.name,
                    value: var.value,
                })
                .collect(),
        }
    }
}

impl TryFrom<v1::StartApplicationSpec> for core::ApplicationSpec {
    type Error = String;

    fn try_from(spec: v1::StartApplicationSpec) -> Result<Self, Self::Error> {
        let admission = v1::AdmissionLevel::try_from(spec.admission)
            .map_err(|_| format!("unknown admission level {}", spec.admission))?;
        let git = spec.git.unwrap_or_default();

        Ok(Self {
            application_image: spec.application_image,
            ide_image: spec.ide_image,
            checkout_location: spec.checkout_location,
            application_location: spec.application_location,
            timeout: spec.timeout,
            git: core::GitSpec {
                username: git.username,
                email: git.email,
            },
            admission: admission.into(),
            envvars: spec
                .envvars
                .into_iter()
                .map(|var| core::EnvironmentVariable {
                    name: var.name,
                    value: var.value,
                })
                .collect(),
        })
    }
}

impl From<core::StartApplicationRequest> for v1::StartApplicationRequest {
    fn from(req: core::StartApplicationRequest) -> Self {
        Self {
            id: req.id,
            service_prefix: req.service_prefix,
            metadata: Some(req.metadata.into()),
            r#type: v1::ApplicationType::from(req.application_type) as i32,
            spec: Some(req.spec.into()),
        }
    }
}

impl TryFrom<v1::StartApplicationRequest> for core::StartApplicationRequest {
    type Error = String;

    fn try_from(req: v1::StartApplicationRequest) -> Result<Self, Self::Error> {
        let kind = v1::ApplicationType::try_from(req.r#type)
            .map_err(|_| format!("unknown application type {}", req.r#type))?;

        Ok(Self {
            id: req.id,
            service_prefix: req.service_prefix,
            metadata: req.metadata.map(Into::into).unwrap_or_default(),
            application_type: kind.into(),
            spec: req.spec.ok_or("spec is missing")?.try_into()?,
        })
    }
}
