//! # Binary Scanner
//!
//! A binary-safe grep over the bytes of an executable. Version banners and
//! target triples are embedded as string-table records separated by NUL
//! bytes, so the scanner streams the file in chunks, splits records on NUL
//! and newline, and matches each record case-insensitively without ever
//! decoding the whole file as text. Verification only needs the first hit,
//! so the scan stops at the first matching record.

use indexmap::IndexMap;
use regex::bytes::RegexBuilder;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// The buffer size for streaming I/O over candidate binaries, in bytes.
const SCAN_BUFFER_SIZE: usize = 64 * 1024;

/// Records longer than this cannot hold a compiler banner; the carry buffer
/// is truncated to keep pathological files from buffering unboundedly.
const MAX_RECORD_LENGTH: usize = 1024 * 1024;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Failed to read candidate binary '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid scan pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Scans the bytes of `path` for the first record matching `pattern` and
/// returns its named capture groups, or `None` when nothing matches.
pub fn first_match(
    path: &Path,
    pattern: &str,
) -> Result<Option<IndexMap<String, String>>, ScanError> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .unicode(false)
        .build()
        .map_err(|e| ScanError::Pattern {
            pattern: pattern.to_string(),
            source: e,
        })?;

    let group_names: Vec<&str> = regex.capture_names().flatten().collect();

    let mut file = File::open(path).map_err(|e| ScanError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut buffer = [0u8; SCAN_BUFFER_SIZE];
    let mut carry: Vec<u8> = Vec::new();

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|e| ScanError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        if bytes_read == 0 {
            break;
        }
        carry.extend_from_slice(&buffer[..bytes_read]);

        // Process every complete record; keep the trailing partial one.
        let mut start = 0;
        for index in memchr_separators(&carry) {
            if let Some(captures) = match_record(&regex, &group_names, &carry[start..index]) {
                return Ok(Some(captures));
            }
            start = index + 1;
        }
        carry.drain(..start);
        if carry.len() > MAX_RECORD_LENGTH {
            carry.drain(..carry.len() - MAX_RECORD_LENGTH);
        }
    }

    Ok(match_record(&regex, &group_names, &carry))
}

/// Positions of record separators (NUL and newline) in `bytes`.
fn memchr_separators(bytes: &[u8]) -> Vec<usize> {
    bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == 0 || **b == b'\n')
        .map(|(index, _)| index)
        .collect()
}

fn match_record(
    regex: &regex::bytes::Regex,
    group_names: &[&str],
    record: &[u8],
) -> Option<IndexMap<String, String>> {
    let record = record.strip_suffix(b"\r").unwrap_or(record);
    if record.is_empty() {
        return None;
    }
    let captures = regex.captures(record)?;
    let mut values = IndexMap::new();
    for name in group_names {
        if let Some(group) = captures.name(name) {
            values.insert(
                name.to_string(),
                String::from_utf8_lossy(group.as_bytes()).into_owned(),
            );
        }
    }
    Some(values)
}
