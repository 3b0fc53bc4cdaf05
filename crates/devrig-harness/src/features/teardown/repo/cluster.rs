use super::{SideResourceKind, SideResourceRepository};
use crate::shared::error::{HarnessError, HarnessResult};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::api::Api;
use kube::Client;

/// Looks up side resources in one namespace.
#[derive(Clone)]
pub struct KubeSideResourceRepository {
    services: Api<Service>,
    endpoints: Api<Endpoints>,
}

impl KubeSideResourceRepository {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            services: Api::namespaced(client.clone(), namespace),
            endpoints: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl SideResourceRepository for KubeSideResourceRepository {
    async fn exists(&self, kind: SideResourceKind, name: &str) -> HarnessResult<bool> {
        let found = match kind {
            SideResourceKind::Service => self.services.get_opt(name).await.map(|s| s.is_some()),
            SideResourceKind::Endpoints => {
                self.endpoints.get_opt(name).await.map(|e| e.is_some())
            }
        };
        found.map_err(|e| HarnessError::Cluster(format!("cannot look up {kind} {name}: {e}")))
    }
}
