//! # cnat-core
//!
//! Shared building blocks for the cnat controller crates:
//!
//! - [`Error`] / [`Result`]: the cross-cutting error type
//! - [`key`]: canonical `namespace/name` queue keys
//! - [`runtime`]: the process-wide error reporter

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

pub mod error;
pub mod key;
pub mod result;
pub mod runtime;

pub use error::Error;
pub use key::{meta_namespace_key, split_meta_namespace_key};
pub use result::{Result, ResultExt};
pub use runtime::{handle_error, reported_errors};
