//! MULTISCAN: multi-timeframe technical signal scanner
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod engine;
pub mod indicators;
pub mod notify;
pub mod sources;
pub mod strategy;
pub mod types;
