//! # dsdb
//!
//! Command-line front end of the dsdb dataset catalog.
//!
//! - `cli` - argument parsing and command implementations
//! - `config` - TOML file and environment resolution
//! - `input` - JSON and raw-file conversion of catalog objects

pub mod cli;
pub mod config;
pub mod input;
