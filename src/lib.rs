//! relmap - relationship mapping and loader strategies over SQLite
//!
//! This library crate exposes the demonstration scenarios for the CLI and
//! for integration testing.

pub mod scenarios;
