use super::IdeImageSource;
use crate::shared::error::{HarnessError, HarnessResult};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;
use kube::Client;
use serde::Deserialize;

pub const IDE_CONFIG_MAP: &str = "server-ide-config";
pub const IDE_CONFIG_KEY: &str = "config.json";

/// Subset of the server's IDE configuration the launch flow reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerIdeConfig {
    #[serde(default)]
    pub ide_version: String,
    #[serde(default)]
    pub ide_image_repo: String,
    #[serde(default)]
    pub ide_image_aliases: IdeImageAliases,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IdeImageAliases {
    #[serde(default)]
    pub code: String,
    #[serde(default, rename = "code-latest")]
    pub code_latest: String,
}

impl ServerIdeConfig {
    pub fn parse(raw: &str) -> HarnessResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| HarnessError::Launch(format!("error unmarshalling server IDE config: {e}")))
    }
}

/// Reads the IDE configuration from the server's config map.
#[derive(Clone)]
pub struct KubeIdeImageSource {
    config_maps: Api<ConfigMap>,
}

impl KubeIdeImageSource {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            config_maps: Api::namespaced(client, namespace),
        }
    }

    pub async fn fetch(&self) -> HarnessResult<ServerIdeConfig> {
        let config_map = self
            .config_maps
            .get(IDE_CONFIG_MAP)
            .await
            .map_err(|e| HarnessError::Cluster(format!("cannot find server IDE config: {e}")))?;

        let raw = config_map
            .data
            .as_ref()
            .and_then(|data| data.get(IDE_CONFIG_KEY))
            .ok_or_else(|| HarnessError::Launch(format!("key {IDE_CONFIG_KEY} not found")))?;
        ServerIdeConfig::parse(raw)
    }
}

#[async_trait]
impl IdeImageSource for KubeIdeImageSource {
    async fn default_ide_image(&self) -> HarnessResult<String> {
        Ok(self.fetch().await?.ide_image_aliases.code)
    }
}
