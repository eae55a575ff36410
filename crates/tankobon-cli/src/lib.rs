//! Tankobon CLI - Command-line interface for the Tankobon manga catalog harvester
//!
//! This crate provides the CLI application that ties together all Tankobon components.

pub mod config;

pub use config::{Command, Config};
