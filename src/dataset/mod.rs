//! Dataset description building and its JSON-LD document.

pub mod builder;
pub mod jsonld;

pub use builder::{BuildError, build, default_name};
