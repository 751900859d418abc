//! Shared supporting machinery for the livegrid platform.
//!
//! This crate carries the transverse services the other crates lean on:
//! the bounded policy cache and its multi-level composition, the generic
//! connection pool, signed CDN URLs, configuration loading, and logging
//! bootstrap.

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod signed_url;

pub use error::{Error, Result};
