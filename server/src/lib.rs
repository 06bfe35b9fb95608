pub mod cache;
pub mod config;
pub mod error;
pub mod gate;
pub mod metrics;
pub mod orchestrator;
pub mod routes;
pub mod validation;
