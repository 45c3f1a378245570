//! Application services layer.

pub mod calculation;
pub mod engines;
pub mod error;
pub mod repos;
