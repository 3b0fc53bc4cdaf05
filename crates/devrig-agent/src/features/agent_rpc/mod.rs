pub mod controller;
pub mod repo;
pub mod service;

pub use controller::AgentRpcController;
pub use repo::{LocalWorkspaceRepo, WorkspaceRepo, WorkspaceRepoError};
pub use service::{AgentRpcService, AgentRpcServiceError};
