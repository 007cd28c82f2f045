//! `engine` crate: flow models, graph validation and the execution engine.

pub mod catalog;
pub mod config;
pub mod dag;
pub mod error;
pub mod executor;
pub mod models;
pub mod schema;

pub use catalog::FlowCatalog;
pub use config::EngineConfig;
pub use dag::validate_flow;
pub use error::EngineError;
pub use executor::{ExecutorConfig, GraphExecutor, RunOutcome};
pub use models::{Connection, Flow, NodeInstance, Position};

#[cfg(test)]
mod executor_tests;
