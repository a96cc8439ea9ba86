//! CBTS Core - Shared data structures, errors and configuration
//!
//! This crate holds everything the bug tracker client crates share: the error
//! taxonomy, logging setup, configuration, wire types, and the route table.

pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod types;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use routes::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tracing;
