//! Command implementations for the CLI
//!
//! - start: Start the exporter
//! - test: Test configuration validity
//! - parse: Run the line parser on a payload
//! - config: Configuration display

pub mod config;
pub mod parse;
pub mod start;
