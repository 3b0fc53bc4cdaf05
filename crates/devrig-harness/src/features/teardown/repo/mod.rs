pub mod cluster;

use crate::shared::error::HarnessResult;
use async_trait::async_trait;
use std::fmt;

#[cfg(test)]
use mockall::automock;

/// Cluster objects that outlive an instance's phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideResourceKind {
    Service,
    Endpoints,
}

impl fmt::Display for SideResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SideResourceKind::Service => f.write_str("Service"),
            SideResourceKind::Endpoints => f.write_str("Endpoints"),
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SideResourceRepository: Send + Sync {
    /// Whether the named object still exists.
    async fn exists(&self, kind: SideResourceKind, name: &str) -> HarnessResult<bool>;
}
