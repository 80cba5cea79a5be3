//! # System Interaction Layer
//!
//! The boundary between the detection engine and the host operating system.
//!
//! ## Modules
//!
//! - **`process`**: Spawns compiler binaries for queries, captures both
//!   output streams, bounds concurrent spawns, and kills children on
//!   cancellation.
//! - **`host`**: Host identity facts (OS, platform, architecture, path
//!   delimiter) in the vocabulary definition files use.

pub mod host;
pub mod process;
