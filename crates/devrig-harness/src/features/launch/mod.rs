pub mod repo;
pub mod service;

pub use repo::cluster::{KubeIdeImageSource, ServerIdeConfig};
pub use repo::{ApplicationServerRepository, IdeImageSource};
pub use service::{LaunchOptions, LaunchResult, LaunchService, StopHandle};
