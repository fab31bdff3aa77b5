//! Infrastructure layer: Redis store, job execution, configuration and service wiring.

pub mod config;
pub mod jobs;
pub mod services;
pub mod store;


pub use config::CoordinationConfig;
pub use services::{CoordinationServices, SharedJobs, SharedStore};
