//! # Discovery Engine
//!
//! Drives a definition's `discover` block: expands the candidate search
//! (PATH, rendered `locations`, platform install roots) through the finder,
//! then verifies each candidate by running the block's action stream against
//! it. A candidate that survives every action becomes a [`Toolset`] and is
//! registered under its canonical path; one that fails any action simply
//! disappears; discovery never reports per-candidate failures upward.

use crate::CancellationToken;
use crate::constants::DEEP_SEARCH_DEPTH;
use crate::core::actions::{self, ActionEntry, DISCOVER_ACTIONS};
use crate::core::finder::{Finder, FinderOptions};
use crate::core::registry::ToolsetRegistry;
use crate::core::renderer::{self, DefinitionResolver};
use crate::core::scanner;
use crate::models::{DefinitionFile, Toolset};
use rayon::prelude::*;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

/// Runs the full candidate search for one definition and registers every
/// verified toolset.
pub fn search_for_toolsets(
    definition: &DefinitionFile,
    registry: &ToolsetRegistry,
    cancellation_token: &CancellationToken,
) {
    let names = definition.binary_names();
    if names.is_empty() {
        log::debug!(
            "Definition '{}' declares no binaries; nothing to discover.",
            definition.name()
        );
        return;
    }

    let finder = Finder::new(names, FinderOptions::default(), cancellation_token.clone());

    // PATH entries are shallow; install roots get the deep walk.
    let path_roots: Vec<PathBuf> = std::env::var("PATH")
        .map(|path| std::env::split_paths(&path).collect())
        .unwrap_or_default();
    let mut candidates = finder.scan(0, &path_roots);

    let mut deep_roots = rendered_locations(definition);
    deep_roots.extend(platform_roots());
    candidates.extend(finder.scan(DEEP_SEARCH_DEPTH, &deep_roots));

    log::debug!(
        "Definition '{}': verifying {} candidate(s).",
        definition.name(),
        candidates.len()
    );

    candidates.par_iter().for_each(|candidate| {
        if cancellation_token.load(Ordering::Relaxed) {
            return;
        }
        if let Some(toolset) = identify_candidate(definition, candidate) {
            registry.register(toolset);
        }
    });
}

/// Verifies one candidate binary against a definition's `discover` block.
/// Matched fragments accumulate into the clone's intellisense defaults; any
/// failing action vetoes the candidate.
pub fn identify_candidate(definition: &DefinitionFile, candidate: &Path) -> Option<Toolset> {
    let canonical = dunce::canonicalize(candidate).ok()?;
    let discover = definition.discover()?.clone();

    let mut working = definition.clone();
    for action in actions::parse_actions(&discover, DISCOVER_ACTIONS) {
        let passed = match action.action {
            "match" => run_match_action(&mut working, &action, &canonical),
            "expression" => run_expression_action(&mut working, &action, &canonical),
            _ => true,
        };
        if !passed {
            log::trace!(
                "Candidate '{}' failed '{}' for definition '{}'.",
                canonical.display(),
                action.action,
                definition.name()
            );
            return None;
        }
    }

    Some(Toolset::new(canonical, working))
}

/// `match` action: each entry is a regex over the candidate's bytes mapped
/// to an intellisense fragment. Under `oneof` the first hit wins the block;
/// otherwise every entry must hit unless the action is `optional`.
fn run_match_action(working: &mut DefinitionFile, action: &ActionEntry, candidate: &Path) -> bool {
    let Some(entries) = action.block.as_object() else {
        return true;
    };
    let oneof = action.has_flag("oneof");
    let optional = action.has_flag("optional");
    let mut matched_any = false;

    for (pattern, fragment) in entries {
        let context = working.clone();
        let resolver = DefinitionResolver::for_toolset(&context, candidate);
        let rendered = renderer::render(pattern, &resolver);

        match scanner::first_match(candidate, &rendered) {
            Ok(Some(captures)) => {
                let data = Value::Object(
                    captures
                        .into_iter()
                        .map(|(name, value)| (name, Value::String(value)))
                        .collect(),
                );
                renderer::merge_fragment(working.intellisense_mut(), fragment, &data, &resolver);
                matched_any = true;
                if oneof {
                    return true;
                }
            }
            Ok(None) => {
                if !oneof && !optional {
                    return false;
                }
            }
            Err(e) => {
                log::debug!("Scan of '{}' failed: {}", candidate.display(), e);
                if !oneof && !optional {
                    return false;
                }
            }
        }
    }

    if oneof { matched_any || optional } else { true }
}

/// `expression` action: each entry renders to a string that must be
/// non-empty (and, under `folder`/`file`, name an existing directory or
/// file) for its fragment to apply.
fn run_expression_action(
    working: &mut DefinitionFile,
    action: &ActionEntry,
    candidate: &Path,
) -> bool {
    let Some(entries) = action.block.as_object() else {
        return true;
    };
    let oneof = action.has_flag("oneof");
    let optional = action.has_flag("optional");
    let must_be_folder = action.has_flag("folder");
    let must_be_file = action.has_flag("file");
    let mut matched_any = false;

    for (expression, fragment) in entries {
        let context = working.clone();
        let resolver = DefinitionResolver::for_toolset(&context, candidate);
        let rendered = renderer::render(expression, &resolver);

        let mut passed = !rendered.is_empty();
        if passed && must_be_folder {
            passed = Path::new(&rendered).is_dir();
        }
        if passed && must_be_file {
            passed = Path::new(&rendered).is_file();
        }

        if passed {
            let data = Value::Object(Default::default());
            renderer::merge_fragment(working.intellisense_mut(), fragment, &data, &resolver);
            matched_any = true;
            if oneof {
                return true;
            }
        } else if !oneof && !optional {
            return false;
        }
    }

    if oneof { matched_any || optional } else { true }
}

/// Renders `discover.locations` into concrete search roots. Entries may
/// resolve to lists (sentinel-joined), so each rendered value is re-split.
fn rendered_locations(definition: &DefinitionFile) -> Vec<PathBuf> {
    let resolver = DefinitionResolver::for_definition(definition);
    let raw = match definition.get("discover.locations") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    let mut roots = Vec::new();
    for template in raw {
        let rendered = renderer::render(&template, &resolver);
        for part in rendered.split(crate::constants::LIST_SENTINEL) {
            if !part.is_empty() {
                roots.push(PathBuf::from(part));
            }
        }
    }
    roots
}

/// Per-platform install roots searched in addition to PATH and `locations`.
fn platform_roots() -> Vec<PathBuf> {
    if cfg!(target_os = "windows") {
        ["ProgramFiles", "ProgramW6432", "ProgramFiles(x86)", "ProgramFiles(Arm)"]
            .iter()
            .filter_map(|variable| std::env::var(variable).ok())
            .map(PathBuf::from)
            .collect()
    } else if cfg!(target_os = "linux") {
        vec![PathBuf::from("/usr/lib/")]
    } else {
        Vec::new()
    }
}
