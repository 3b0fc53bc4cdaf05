pub mod repo;
pub mod service;

pub use repo::grpc::GrpcApplicationManager;
pub use repo::{ApplicationManagerRepository, InMemoryApplicationManager, StatusStream};
pub use service::ApplicationLifecycle;
