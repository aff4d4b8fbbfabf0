//! PDF Gateway Server Library
//!
//! Identity resolution, plan lookup and per-window quota metering in front
//! of a PDF processing engine.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod security;
pub mod services;

// Re-export commonly used types for convenience
pub use config::AppSettings;
pub use error::{AppError, AppResult};
pub use services::gate::{Admission, Gate};
