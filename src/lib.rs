pub mod authz;
pub mod cli;
pub mod client;
pub mod config;
pub mod db;
pub mod definition;
pub mod engine;
pub mod expr;
pub mod types;
pub mod worker;

// Re-export main types
pub use types::*;

pub use client::WorkflowClient;
pub use engine::{EngineError, WorkflowEngine};
