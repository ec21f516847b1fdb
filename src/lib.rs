//! Disaster-recovery orchestrator for clustered foundry deployments.
//!
//! Captures the relational store, graph store, cache and persistent volumes
//! of a namespace as a single sealed archive, and restores them behind an
//! explicit confirmation gate.

pub mod archive;
pub mod backup;
pub mod cluster;
pub mod config;
pub mod error;
pub mod release;
pub mod restore;
pub mod stores;
pub mod utils;
pub mod volumes;

// Re-export commonly used types
pub use config::Config;
pub use error::DrError;
pub type Result<T> = std::result::Result<T, DrError>;
