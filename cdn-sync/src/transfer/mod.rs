//! Progress accounting and run reporting.

pub mod progress;
pub mod report;
