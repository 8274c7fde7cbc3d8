//! Input/output helpers.
//!
//! - dataset document export (`export`)

pub mod export;

pub use export::*;
