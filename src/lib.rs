#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # cnat
//!
//! Runs a Task's command once its wall-clock schedule is reached.
//!
//! This crate is the process around the controller: command line, config
//! file, store connection and shutdown. The controller itself lives in
//! `cnat-reconciler`.

pub mod app;
pub mod cli;
pub mod config;

pub use app::{run, Settings};
pub use cli::Cli;
pub use config::{ClusterConfig, Endpoint, MEMORY_ENDPOINT};
