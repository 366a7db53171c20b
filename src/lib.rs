pub mod adapter;
pub mod aggregator;
pub mod config;
pub mod coordinator;
pub mod correlation;
pub mod exporter;
pub mod inventory;
pub mod journal;
pub mod lock;
pub mod log;
pub mod mg_error;
pub mod preflight;
pub mod scheduler;
pub mod types;
