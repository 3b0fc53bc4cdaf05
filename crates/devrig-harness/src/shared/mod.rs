pub mod context;
pub mod error;
pub mod retry;
pub mod slot;
pub mod types;
