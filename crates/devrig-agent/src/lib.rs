//! Instrumentation agent copied into application pods by the test harness.
//! Speaks JSON over HTTP on the port it is started with.

pub mod features;
pub mod server;

pub use server::{AgentServer, AgentServerError};

/// Environment variable the RPC port can be taken from.
pub const RPC_PORT_ENV: &str = "DEVRIG_AGENT_RPC_PORT";
