use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Shared cancellation flag. Cooperative: long-running walks, subprocess
/// waits and analysis passes poll it and stop scheduling new work.
pub type CancellationToken = Arc<AtomicBool>;

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod system;
