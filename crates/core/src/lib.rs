//! Core types shared by the storefront search crates
//!
//! This crate provides the ambient pieces every other crate leans on:
//!
//! - **Error handling**: coded errors with context, recovery suggestions and
//!   serialisable reports, mapped onto HTTP status codes
//! - **Configuration**: TOML-based configuration with defaults and validation
//!
//! # Example
//!
//! ```rust,no_run
//! use storefront_core::config::Config;
//!
//! let config = Config::load(None).expect("invalid configuration");
//! println!("max page size: {}", config.schema.search.max_page_size);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;

pub use error::{Error, ErrorCode, ErrorReport, Result, ResultExt};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, ConfigSchema};
    pub use crate::error::{exit_codes, Error, ErrorCode, ErrorReport, Result, ResultExt};
}
