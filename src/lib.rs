pub mod config;
pub mod constants;
pub mod entities;
pub mod error;
pub mod logging;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod types;

// Port traits and their adapters
pub mod app;
pub mod infra;
