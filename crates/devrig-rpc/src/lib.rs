pub mod error;
pub mod features;
pub mod types;

pub use error::{RpcError, RpcResult};
pub use features::connection::repo::{duplex_pair, Duplex, WebSocketTransport};
pub use features::instance_updates::{InstanceUpdates, SubscriberRegistry, ALL_INSTANCES};
pub use features::server_api::controller::ServerApi;
pub use types::*;
