// ABOUTME: Library module for tabular-etl
// ABOUTME: Exports all core functionality for use in binary and tests

pub mod aggregate;
pub mod columns;
pub mod commands;
pub mod config;
pub mod diff;
pub mod encoding;
pub mod error;
pub mod fingerprint;
pub mod ingest;
pub mod interactive;
pub mod partition;
pub mod progress;
pub mod record;
pub mod resolver;
pub mod store;
pub mod transfer;
pub mod utils;
