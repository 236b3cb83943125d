//! Image job service
//!
//! Accepts images by upload or by fetching them from third-party services,
//! applies a pixel transform and records every step of each job's
//! lifecycle in an audit trail.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
