//! Common utilities and types shared across yamlcrypt crates.
//!
//! This module provides the error type every crate returns and the node path
//! used to attribute traversal failures to a location in the document.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{NodePath, PathSegment};
