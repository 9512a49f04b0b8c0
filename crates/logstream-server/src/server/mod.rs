pub mod config;
pub mod database;
pub mod repo;
pub mod service;
pub mod streaming;
pub mod telemetry;
