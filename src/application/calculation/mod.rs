//! Reconciliation protocol between a calculation engine and its cache store.
//!
//! The [`Loader`] starts collecting input in the background and hands back a
//! [`Deferred`] immediately; the [`Renderer`] turns the settled state into a
//! view and writes fresh results back to the store. A [`NavigationTracker`]
//! tags every load with a generation so only the latest load of a slot writes.

mod deferred;
mod engine;
mod generation;
mod loader;
mod renderer;
#[cfg(test)]
pub(crate) mod testing;

pub use deferred::{Deferred, DeferredState, FreshResult, LoadFailure, Resolution};
pub use engine::{CalculationEngine, CalculationError};
pub use generation::{Generation, NavigationTracker};
pub use loader::{Loader, Navigation};
pub use renderer::{RenderedView, Renderer};
