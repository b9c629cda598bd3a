//! Library exports for the affiliate link service
//!
//! Exposes internal components for the integration tests and potential
//! library usage.

pub mod config;
pub mod database;
pub mod delivery;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod middleware;
pub mod model;
pub mod rewriter;
pub mod route;
pub mod scheduler;
pub mod store;
