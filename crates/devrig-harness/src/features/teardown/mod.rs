pub mod repo;
pub mod service;

pub use repo::cluster::KubeSideResourceRepository;
pub use repo::{SideResourceKind, SideResourceRepository};
pub use service::TeardownService;
