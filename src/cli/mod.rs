//! # Command-Line Interface (CLI) Module
//!
//! Defines the `toolscout` command surface with `clap` and routes each
//! subcommand to its handler.
//!
//! ## Modules
//!
//! - **`args`**: The top-level `Cli` struct and per-command argument structs.
//! - **`handlers`**: One sub-module per command (`scan`, `identify`,
//!   `analyze`, `definitions`), each exposing a `handle` entry point that
//!   drives the engine facade.

pub mod args;
pub mod handlers;

pub use args::{Cli, Command};
