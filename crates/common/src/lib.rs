//! Common types and utilities shared across the SFU room client crates.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for tracing subscriber setup
pub mod observability;
