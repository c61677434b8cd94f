//! Course progress tracking: per-item completion, enrollment percentage and
//! status, and certificate issuing for completed enrollments.

pub mod certificate;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod progress;
pub mod repo;
pub mod routes;

pub use engine::ProgressEngine;
pub use error::{ProgressError, ProgressResult};
