//! # Action Parser
//!
//! Decodes the ordered keys of a definition block (`discover`, `analysis`)
//! into a priority-sorted action stream. A key looks like
//! `word[:flag[,flag]*][#comment]`: the first four letters pick the action,
//! flags are filtered against the action's legal set, and an explicit
//! `priority=<n>` flag overrides the key's positional order.

use indexmap::IndexMap;
use serde_json::Value;

/// Legal actions for a `discover` block and the flags each retains.
pub const DISCOVER_ACTIONS: &[(&str, &[&str])] = &[
    ("match", &["optional", "priority", "oneof"]),
    ("expression", &["oneof", "optional", "priority", "folder", "file"]),
];

/// Legal actions for an `analysis` block. All accept a priority and the
/// language filters; `command` additionally accepts `no_consume`.
pub const ANALYSIS_ACTIONS: &[(&str, &[&str])] = &[
    ("task", &["priority", "c", "cpp", "c++"]),
    ("command", &["priority", "c", "cpp", "c++", "no_consume"]),
    ("query", &["priority", "c", "cpp", "c++"]),
    ("expression", &["priority", "c", "cpp", "c++"]),
];

/// One decoded action: the canonical action name, the raw block value, the
/// retained flags and the effective priority.
#[derive(Debug, Clone)]
pub struct ActionEntry {
    pub action: &'static str,
    pub block: Value,
    pub flags: IndexMap<String, String>,
    pub priority: i64,
}

impl ActionEntry {
    pub fn has_flag(&self, name: &str) -> bool {
        self.flags.contains_key(name)
    }
}

/// A table of legal `(action, flags)` pairs for one block kind.
pub type ActionTable = &'static [(&'static str, &'static [&'static str])];

/// Parses the keys of `block` against `table`, returning actions in
/// ascending priority order. Unknown action prefixes are dropped.
pub fn parse_actions(block: &Value, table: ActionTable) -> Vec<ActionEntry> {
    let Some(map) = block.as_object() else {
        return Vec::new();
    };

    let mut entries: Vec<ActionEntry> = Vec::with_capacity(map.len());
    for (index, (key, value)) in map.iter().enumerate() {
        let Some((action, legal_flags)) = select_action(key, table) else {
            continue;
        };
        let flags = parse_flags(key, legal_flags);
        let priority = flags
            .get("priority")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(index as i64);
        entries.push(ActionEntry {
            action,
            block: value.clone(),
            flags,
            priority,
        });
    }

    // Stable: equal priorities keep their source order.
    entries.sort_by_key(|entry| entry.priority);
    entries
}

/// Selects the action by the key's first four letters (case-insensitive),
/// matched as a prefix of the table's action names.
fn select_action(key: &str, table: ActionTable) -> Option<(&'static str, &'static [&'static str])> {
    let word = key
        .split(['#', ':'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if word.is_empty() {
        return None;
    }
    let selector: String = word.chars().take(4).collect();
    table
        .iter()
        .find(|(name, _)| name.starts_with(&selector))
        .map(|(name, flags)| (*name, *flags))
}

/// Extracts `name` / `name=value` flags, dropping any not in `legal`.
fn parse_flags(key: &str, legal: &[&str]) -> IndexMap<String, String> {
    let mut flags = IndexMap::new();
    let without_comment = key.split('#').next().unwrap_or_default();
    let Some((_, flag_part)) = without_comment.split_once(':') else {
        return flags;
    };
    for raw in flag_part.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let (name, value) = match raw.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (raw, ""),
        };
        if legal.contains(&name) {
            flags.insert(name.to_string(), value.to_string());
        }
    }
    flags
}
