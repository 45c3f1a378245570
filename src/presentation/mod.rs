//! HTML rendering of calculation pages.

pub mod views;
