pub mod agent_rpc;
