pub mod repo;
pub mod service;

pub use repo::agent::AgentClient;
pub use repo::cluster::KubePodRepository;
pub use repo::{ComponentType, ExecOutput, PodRepository, PodSummary};
pub use service::{resolve_agent_binary, InstrumentOptions, Instrumentation, Instrumenter};
