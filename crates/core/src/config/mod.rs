//! Configuration loading and schema definitions
//!
//! Shared configuration types used by the engine, the CLI and the server.

mod loader;
mod schema;

pub use loader::{Config, CONFIG_ENV_VAR};
pub use schema::*;
