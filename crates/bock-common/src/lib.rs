//! # bock-common
//!
//! Shared utilities and types for the Bock storage layer.
//!
//! This crate provides common functionality used across all Bock crates:
//! - The error taxonomy shared by the driver, the ID maps and the layer applier
//! - Standard paths under the effective daemon root
//! - Human-readable byte sizes

#![warn(missing_docs)]

pub mod error;
pub mod paths;
pub mod units;

pub use error::{BockError, BockResult};
pub use paths::StoragePaths;
pub use units::human_size;
