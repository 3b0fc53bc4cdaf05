pub mod connection;
pub mod instance_updates;
pub mod server_api;
