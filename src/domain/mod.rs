//! Domain layer types and invariants.

pub mod error;
pub mod farm;
pub mod ids;
pub mod kind;
