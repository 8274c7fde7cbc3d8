//! `faen-cde` library crate.
//!
//! The binary (`faen-cde`) is a thin wrapper around this library so that:
//!
//! - the pipeline is testable against mock servers without spawning processes
//! - the API clients and dataset builders are reusable on their own
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod dataset;
pub mod domain;
pub mod error;
pub mod io;
pub mod logging;
pub mod mapping;
pub mod report;
pub mod transform;
