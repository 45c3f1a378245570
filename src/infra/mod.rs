//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod farm_data;
pub mod http;
pub mod telemetry;
