//! Allocation service.
//!
//! Loads [`Config`] from the environment, wires the in-memory store, the
//! message bus and the pub/sub broker together, and optionally listens for
//! external commands.

pub mod app;
pub mod config;
pub mod error;
pub mod telemetry;

pub use app::Application;
pub use config::{Config, LogFormat};
pub use error::ServiceError;
