// Core modules
pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod guardian;
pub mod indicators;
pub mod journal;
pub mod models;
pub mod orchestrator;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use error::Error;
pub use models::*;

/// Crate-wide result type
pub type Result<T, E = Error> = std::result::Result<T, E>;
