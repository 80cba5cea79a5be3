//! # Compiler Subprocess Execution
//!
//! Spawns compiler binaries for `query` actions and captures everything they
//! print. Both output streams are collected and concatenated (compilers are
//! split-brained about which one carries version banners). Spawns across the
//! whole process are bounded by a counting semaphore sized to the host CPU
//! count, and a cancellation request kills the child instead of waiting it
//! out.

use crate::CancellationToken;
use crate::system::host;
use lazy_static::lazy_static;
use std::io::Read;
use std::path::Path;
use std::process::{Command as StdCommand, Stdio};
use std::sync::atomic::Ordering;
use std::sync::{Condvar, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Could not execute '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed while waiting for '{command}': {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Execution of '{command}' was interrupted.")]
    Interrupted { command: String },
}

/// What a query run produced. `success` reports the exit status, but
/// callers use the captured text either way: a compiler that exits non-zero
/// after printing its banner is still a perfectly good source of facts.
#[derive(Debug)]
pub struct CapturedOutput {
    pub text: String,
    pub success: bool,
}

/// Runs `program` with `args`, `PATH` prefixed by the program's directory,
/// and returns the concatenated stdout + stderr text.
pub fn run_captured(
    program: &Path,
    args: &[String],
    cancellation_token: &CancellationToken,
) -> Result<CapturedOutput, ProcessError> {
    let _permit = SUBPROCESS_GATE.acquire();

    let display = program.display().to_string();
    let mut command = StdCommand::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = program.parent() {
        command.env("PATH", prefixed_path(dir));
    }

    log::debug!("Spawning query process: '{}' {:?}", display, args);

    let mut child = command.spawn().map_err(|e| ProcessError::Spawn {
        command: display.clone(),
        source: e,
    })?;

    // Drain both pipes on their own threads so neither side can fill its
    // buffer and deadlock the child.
    let stdout_reader = child.stdout.take().map(spawn_drain);
    let stderr_reader = child.stderr.take().map(spawn_drain);

    let status = loop {
        if cancellation_token.load(Ordering::Relaxed) {
            let _ = child.kill();
            let _ = child.wait();
            join_drain(stdout_reader);
            join_drain(stderr_reader);
            return Err(ProcessError::Interrupted { command: display });
        }
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => std::thread::sleep(Duration::from_millis(25)),
            Err(e) => {
                join_drain(stdout_reader);
                join_drain(stderr_reader);
                return Err(ProcessError::Wait {
                    command: display,
                    source: e,
                });
            }
        }
    };

    let mut text = join_drain(stdout_reader);
    text.push_str(&join_drain(stderr_reader));

    Ok(CapturedOutput {
        text,
        success: status.success(),
    })
}

fn spawn_drain<R: Read + Send + 'static>(mut reader: R) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut bytes = Vec::new();
        let _ = reader.read_to_end(&mut bytes);
        bytes
    })
}

fn join_drain(handle: Option<std::thread::JoinHandle<Vec<u8>>>) -> String {
    match handle {
        Some(handle) => String::from_utf8_lossy(&handle.join().unwrap_or_default()).into_owned(),
        None => String::new(),
    }
}

/// The process `PATH` with `dir` prepended, so compiler front-ends can find
/// their sibling tools.
fn prefixed_path(dir: &Path) -> String {
    match std::env::var("PATH") {
        Ok(existing) if !existing.is_empty() => {
            format!("{}{}{}", dir.display(), host::path_delimiter(), existing)
        }
        _ => dir.display().to_string(),
    }
}

// --- Spawn bounding ---

/// A minimal counting semaphore; subprocess fan-out never exceeds the host
/// CPU count.
struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits.max(1)),
            available: Condvar::new(),
        }
    }

    fn acquire(&self) -> SemaphorePermit<'_> {
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            permits = self.available.wait(permits).unwrap();
        }
        *permits -= 1;
        SemaphorePermit { semaphore: self }
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        let mut permits = self.semaphore.permits.lock().unwrap();
        *permits += 1;
        self.semaphore.available.notify_one();
    }
}

lazy_static! {
    static ref SUBPROCESS_GATE: Semaphore = Semaphore::new(
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    );
}
