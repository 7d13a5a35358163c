//! Stratum - build-graph composition engine
//!
//! Reads a package spec and turns its sources, patches, dependency
//! generators and caches into content-addressed build graphs for an
//! external build engine.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod generate;
pub mod graph;
pub mod layer;
pub mod sourcemap;
pub mod spec;
pub mod util;

pub use error::{StratumError, StratumResult};
