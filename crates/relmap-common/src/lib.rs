//! relmap-common: shared error type and configuration.
//!
//! This crate is the foundational dependency for the other relmap crates:
//!
//! - **Error Handling**: [`Error`] and the [`Result`] alias
//! - **Configuration**: [`config::Config`] loaded from TOML
//!
//! # Examples
//!
//! ```
//! use relmap_common::{Error, Result};
//!
//! fn lookup() -> Result<i64> {
//!     Err(Error::not_found("User", 7))
//! }
//! assert!(lookup().is_err());
//! ```

pub mod config;
pub mod error;

pub use config::{Config, DatabaseConfig};
pub use error::{Error, Result};
