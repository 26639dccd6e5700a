// usage-monitor library crate
// Exposes modules for integration testing

pub mod alerts;
pub mod cli;
pub mod commands;
pub mod config;
pub mod environment;
pub mod error;
pub mod metrics;
pub mod output;
pub mod scheduler;
pub mod storage;
pub mod utils;
