//! # Definition Loader
//!
//! Loads `toolset.*.json` files from the configured definition roots.
//! Definition files are JSON with comments permitted, so a small stripping
//! pass runs before parsing. After loading, `inherits` chains are resolved
//! by deep-merging each base into a clone of the child (child wins), and
//! each definition's `conditions` block is evaluated once with a bare
//! resolver. A file that fails to parse is logged and skipped; it never
//! takes the rest of the catalog down with it.

use crate::constants::{DEFINITION_FILE_PREFIX, DEFINITION_FILE_SUFFIX};
use crate::core::merger;
use crate::core::renderer::{self, DefinitionResolver};
use crate::models::DefinitionFile;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("Failed to read definition file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse definition file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Definition file '{path}' has no 'name'.")]
    MissingName { path: String },
}

/// Loads every definition under `roots`, resolves inheritance and applies
/// conditions. Malformed files are logged and skipped.
pub fn load_definitions(roots: &[PathBuf]) -> Vec<DefinitionFile> {
    let mut loaded = Vec::new();

    for root in roots {
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("Definition root '{}' not readable: {}", root.display(), e);
                continue;
            }
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_definition_file(path))
            .collect();
        paths.sort();

        for path in paths {
            match load_definition_file(&path) {
                Ok(definition) => {
                    log::debug!(
                        "Loaded definition '{}' from '{}'.",
                        definition.name(),
                        path.display()
                    );
                    loaded.push(definition);
                }
                Err(e) => log::warn!("Skipping definition: {}", e),
            }
        }
    }

    let mut resolved = resolve_inheritance(loaded);
    for definition in &mut resolved {
        apply_conditions(definition);
    }
    resolved
}

fn is_definition_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy())
        .is_some_and(|name| {
            name.starts_with(DEFINITION_FILE_PREFIX) && name.ends_with(DEFINITION_FILE_SUFFIX)
        })
}

/// Reads and parses a single definition file.
pub fn load_definition_file(path: &Path) -> Result<DefinitionFile, DefinitionError> {
    let text = std::fs::read_to_string(path).map_err(|e| DefinitionError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let doc: Value =
        serde_json::from_str(&strip_json_comments(&text)).map_err(|e| DefinitionError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
    DefinitionFile::from_value(doc).ok_or_else(|| DefinitionError::MissingName {
        path: path.display().to_string(),
    })
}

/// Replaces `//` and `/* */` comments with spaces, leaving string literals
/// (and their escapes) untouched.
pub fn strip_json_comments(text: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Normal,
        InString,
        Escaped,
        LineComment,
        BlockComment,
    }

    let mut output = String::with_capacity(text.len());
    let mut state = State::Normal;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Normal => match c {
                '"' => {
                    state = State::InString;
                    output.push(c);
                }
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::BlockComment;
                }
                _ => output.push(c),
            },
            State::InString => {
                output.push(c);
                match c {
                    '\\' => state = State::Escaped,
                    '"' => state = State::Normal,
                    _ => {}
                }
            }
            State::Escaped => {
                output.push(c);
                state = State::InString;
            }
            State::LineComment => {
                if c == '\n' {
                    output.push(c);
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Normal;
                }
            }
        }
    }
    output
}

/// Resolves `inherits` transitively: each base document is deep-merged into
/// a fresh tree, the child last so it wins conflicts. Unknown bases and
/// cycles degrade to "no base" with a warning.
fn resolve_inheritance(definitions: Vec<DefinitionFile>) -> Vec<DefinitionFile> {
    let by_name: HashMap<String, Value> = definitions
        .iter()
        .map(|d| (d.name().to_string(), d.doc().clone()))
        .collect();
    let mut memo: HashMap<String, Value> = HashMap::new();

    definitions
        .iter()
        .map(|definition| {
            let mut visiting = HashSet::new();
            let doc = resolve_doc(definition.name(), &by_name, &mut memo, &mut visiting)
                .unwrap_or_else(|| definition.doc().clone());
            DefinitionFile::from_value(doc).unwrap_or_else(|| definition.clone())
        })
        .collect()
}

fn resolve_doc(
    name: &str,
    by_name: &HashMap<String, Value>,
    memo: &mut HashMap<String, Value>,
    visiting: &mut HashSet<String>,
) -> Option<Value> {
    if let Some(resolved) = memo.get(name) {
        return Some(resolved.clone());
    }
    if !visiting.insert(name.to_string()) {
        log::warn!("Inheritance cycle through definition '{}'.", name);
        return None;
    }

    let doc = by_name.get(name)?.clone();
    let bases: Vec<String> = match doc.get("inherits") {
        Some(Value::String(base)) => vec![base.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    let resolved = if bases.is_empty() {
        doc
    } else {
        let mut target = Value::Object(Default::default());
        for base in &bases {
            match resolve_doc(base, by_name, memo, visiting) {
                Some(base_doc) => merger::merge(&mut target, &base_doc),
                None => log::warn!("Definition '{}' inherits unknown base '{}'.", name, base),
            }
        }
        merger::merge(&mut target, &doc);
        if let Some(map) = target.as_object_mut() {
            map.remove("inherits");
        }
        target
    };

    visiting.remove(name);
    memo.insert(name.to_string(), resolved.clone());
    Some(resolved)
}

/// Evaluates the `conditions` block once and merges every matching fragment
/// into the definition. The block itself is consumed.
pub fn apply_conditions(definition: &mut DefinitionFile) {
    let Some(conditions) = definition.take_conditions() else {
        return;
    };
    let Some(map) = conditions.as_object() else {
        return;
    };

    let context = definition.clone();
    let resolver = DefinitionResolver::for_definition(&context);
    let data = context
        .intellisense()
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));

    for (expression, fragment) in map {
        if renderer::evaluate_expression(expression, &data, &resolver) {
            log::trace!(
                "Condition '{}' matched for definition '{}'.",
                expression,
                context.name()
            );
            merger::merge(definition.doc_mut(), fragment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn write_definition(dir: &Path, file_name: &str, contents: &str) {
        let mut file = std::fs::File::create(dir.join(file_name)).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn test_strip_comments_preserves_strings() {
        let text = r#"{
            // a line comment
            "name": "msvc", /* block
               comment */
            "pattern": "https://example" // trailing
        }"#;
        let value: Value = serde_json::from_str(&strip_json_comments(text)).unwrap();
        assert_eq!(value["name"], "msvc");
        assert_eq!(value["pattern"], "https://example");
    }

    #[test]
    fn test_loads_only_matching_file_names_and_skips_malformed() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(dir.path(), "toolset.gcc.json", r#"{ "name": "gcc" }"#);
        write_definition(dir.path(), "toolset.broken.json", "{ not json");
        write_definition(dir.path(), "toolset.anon.json", r#"{ "version": "1" }"#);
        write_definition(dir.path(), "readme.json", r#"{ "name": "ignored" }"#);

        let definitions = load_definitions(&[dir.path().to_path_buf()]);
        let names: Vec<&str> = definitions.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["gcc"]);
    }

    #[test]
    fn test_inheritance_merges_base_under_child() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(
            dir.path(),
            "toolset.base.json",
            r#"{
                "name": "base",
                "intellisense": { "standard": "C++14", "macros": { "BASE": "1" } },
                "discover": { "binary": ["cc"] }
            }"#,
        );
        write_definition(
            dir.path(),
            "toolset.gcc.json",
            r#"{
                "name": "gcc",
                "inherits": "base",
                "intellisense": { "standard": "C++17" },
                "discover": { "binary": ["gcc"] }
            }"#,
        );

        let definitions = load_definitions(&[dir.path().to_path_buf()]);
        let gcc = definitions.iter().find(|d| d.name() == "gcc").unwrap();
        let intellisense = gcc.intellisense().unwrap();
        assert_eq!(intellisense["standard"], "C++17");
        assert_eq!(intellisense["macros"]["BASE"], "1");
        // Lists accumulate: base's binaries stay available.
        assert_eq!(gcc.binary_names(), vec!["cc", "gcc"]);
        assert!(gcc.doc().get("inherits").is_none());
    }

    #[test]
    fn test_inheritance_cycle_degrades_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(
            dir.path(),
            "toolset.a.json",
            r#"{ "name": "a", "inherits": "b", "intellisense": { "x": "1" } }"#,
        );
        write_definition(
            dir.path(),
            "toolset.b.json",
            r#"{ "name": "b", "inherits": "a" }"#,
        );

        let definitions = load_definitions(&[dir.path().to_path_buf()]);
        assert_eq!(definitions.len(), 2);
        let a = definitions.iter().find(|d| d.name() == "a").unwrap();
        assert_eq!(a.intellisense().unwrap()["x"], "1");
    }

    #[test]
    fn test_conditions_merge_matching_fragments_once() {
        let mut definition = DefinitionFile::from_value(json!({
            "name": "gcc",
            "intellisense": { "language": "c" },
            "conditions": {
                "language=='c'": { "intellisense": { "standard": "C17" } },
                "language=='cpp'": { "intellisense": { "standard": "C++20" } }
            }
        }))
        .unwrap();
        apply_conditions(&mut definition);
        assert_eq!(definition.intellisense().unwrap()["standard"], "C17");
        assert!(definition.conditions().is_none());
        // A second application is a no-op: the block was consumed.
        apply_conditions(&mut definition);
        assert_eq!(definition.intellisense().unwrap()["standard"], "C17");
    }
}
