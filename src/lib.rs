//! Content-hash cache coherence for expensive farm calculations.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;
