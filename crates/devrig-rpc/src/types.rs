// Entities exchanged with the platform server. Field names follow the
// server's camelCase JSON.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub creation_date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default, rename = "contextURL")]
    pub context_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub creation_time: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstancePhase {
    Preparing,
    Pending,
    Creating,
    Initializing,
    Running,
    Interrupted,
    Stopping,
    Stopped,
    /// Any phase this client does not know about.
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConditions {
    #[serde(default)]
    pub failed: Option<String>,
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub pulling_images: Option<bool>,
    #[serde(default)]
    pub deployed: Option<bool>,
    #[serde(default)]
    pub needed_image_build: Option<bool>,
    #[serde(default)]
    pub first_user_activity: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    #[serde(default)]
    pub phase: InstancePhase,
    #[serde(default)]
    pub conditions: InstanceConditions,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub node_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInstance {
    pub id: String,
    #[serde(rename = "applicationId")]
    pub application_id: String,
    #[serde(default)]
    pub creation_time: String,
    #[serde(default)]
    pub ide_url: String,
    #[serde(default)]
    pub status: InstanceStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInfo {
    pub application: Application,
    #[serde(default)]
    pub latest_instance: Option<ApplicationInstance>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CreateApplicationMode {
    /// Always create a new application, even if one for the context exists.
    #[default]
    ForceNew,
    /// Reuse a running application for the same context if there is one.
    SelectIfRunning,
    UsePrebuild,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApplicationOptions {
    #[serde(rename = "contextUrl")]
    pub context_url: String,
    pub mode: CreateApplicationMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationCreationResult {
    #[serde(default)]
    pub created_application_id: Option<String>,
    #[serde(default)]
    pub application_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartApplicationOptions {
    #[serde(default)]
    pub force_default_image: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartApplicationResult {
    pub instance_id: String,
    #[serde(default)]
    pub application_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetApplicationsOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_string: Option<String>,
    #[serde(default)]
    pub pinned_only: bool,
}
