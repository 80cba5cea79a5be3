//! # Data Models
//!
//! The core data structures, in three layers:
//!
//! 1.  **Definition documents**: a [`DefinitionFile`] wraps the free-form
//!     JSON tree a `toolset.*.json` file parses into. Definitions stay
//!     dynamic on purpose (discovery and analysis merge arbitrary fragments
//!     into them), so the wrapper only adds typed accessors over the tree.
//!
//! 2.  **Identified toolsets**: a [`Toolset`] ties an immutable compiler
//!     path to its (cloned, condition-applied) definition and carries the
//!     per-toolset query and analysis caches.
//!
//! 3.  **Boundary records**: [`IntelliSenseConfiguration`] is the typed
//!     projection of a working configuration tree, produced at the facade
//!     boundary for downstream consumers. Projection is tolerant: fields a
//!     definition filled with something unexpected become their defaults
//!     instead of failing the whole analysis.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// --- Definition documents ---

/// A declarative description of one family of compilers, kept as the raw
/// JSON tree it was written as.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefinitionFile {
    doc: Value,
}

impl DefinitionFile {
    /// Wraps a parsed document; requires an object with a non-empty `name`.
    pub fn from_value(doc: Value) -> Option<Self> {
        match doc.get("name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => Some(Self { doc }),
            _ => None,
        }
    }

    pub fn doc(&self) -> &Value {
        &self.doc
    }

    pub fn doc_mut(&mut self) -> &mut Value {
        &mut self.doc
    }

    /// Field lookup, with dotted descent (`discover.binary`) as a fallback
    /// for keys that are not present verbatim.
    pub fn get(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.doc.get(key) {
            return Some(value);
        }
        let mut current = &self.doc;
        for segment in key.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }

    pub fn name(&self) -> &str {
        self.doc
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Base definitions this one inherits from, in application order.
    pub fn inherits(&self) -> Vec<String> {
        match self.doc.get("inherits") {
            Some(Value::String(name)) => vec![name.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn intellisense(&self) -> Option<&Value> {
        self.doc.get("intellisense")
    }

    /// The default intellisense tree, created on demand so discovery can
    /// merge matched fragments into it.
    pub fn intellisense_mut(&mut self) -> &mut Value {
        let map = self
            .doc
            .as_object_mut()
            .expect("definition documents are objects");
        map.entry("intellisense".to_string())
            .or_insert_with(|| Value::Object(Default::default()))
    }

    pub fn discover(&self) -> Option<&Value> {
        self.doc.get("discover")
    }

    pub fn analysis(&self) -> Option<&Value> {
        self.doc.get("analysis")
    }

    pub fn conditions(&self) -> Option<&Value> {
        self.doc.get("conditions")
    }

    /// Removes and returns the `conditions` block; applying conditions is a
    /// once-per-definition step, so the block does not survive it.
    pub fn take_conditions(&mut self) -> Option<Value> {
        self.doc.as_object_mut()?.remove("conditions")
    }

    /// The binary names this definition discovers (`discover.binary`,
    /// string or list).
    pub fn binary_names(&self) -> Vec<String> {
        match self.doc.get("discover").and_then(|d| d.get("binary")) {
            Some(Value::String(name)) => vec![name.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// The two languages an analysis can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    C,
    Cpp,
}

impl Language {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "c" => Some(Language::C),
            "cpp" | "c++" => Some(Language::Cpp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
        }
    }
}

// --- Identified toolsets ---

/// An identified compiler: its canonical path, its definition (already
/// cloned and condition-applied for this host), and the cross-invocation
/// caches.
#[derive(Debug)]
pub struct Toolset {
    compiler_path: PathBuf,
    definition: DefinitionFile,
    query_cache: Mutex<IndexMap<String, String>>,
    analysis_cache: Mutex<IndexMap<String, Value>>,
}

impl Toolset {
    pub fn new(compiler_path: PathBuf, definition: DefinitionFile) -> Self {
        Self {
            compiler_path,
            definition,
            query_cache: Mutex::new(IndexMap::new()),
            analysis_cache: Mutex::new(IndexMap::new()),
        }
    }

    pub fn compiler_path(&self) -> &Path {
        &self.compiler_path
    }

    pub fn definition(&self) -> &DefinitionFile {
        &self.definition
    }

    /// Stable identity: `<definition.name>/<version>/<architecture>/<hostArchitecture>`.
    pub fn name(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.definition.name(),
            self.intellisense_text("version"),
            self.intellisense_text("architecture"),
            self.intellisense_text("hostArchitecture"),
        )
    }

    /// The discovered version, as matched into the definition's
    /// intellisense defaults.
    pub fn version(&self) -> String {
        self.intellisense_text("version")
    }

    fn intellisense_text(&self, key: &str) -> String {
        self.definition
            .intellisense()
            .and_then(|tree| tree.get(key))
            .map(scalar_text)
            .unwrap_or_default()
    }

    pub(crate) fn cached_query(&self, command: &str) -> Option<String> {
        self.query_cache.lock().unwrap().get(command).cloned()
    }

    pub(crate) fn store_query(&self, command: String, output: String) {
        self.query_cache.lock().unwrap().insert(command, output);
    }

    pub(crate) fn cached_analysis(&self, key: &str) -> Option<Value> {
        self.analysis_cache.lock().unwrap().get(key).cloned()
    }

    pub(crate) fn store_analysis(&self, key: String, configuration: Value) {
        self.analysis_cache.lock().unwrap().insert(key, configuration);
    }

    /// The argv keys currently held by the analysis cache.
    pub fn analysis_cache_keys(&self) -> Vec<String> {
        self.analysis_cache.lock().unwrap().keys().cloned().collect()
    }

    /// Flattens the toolset for the persistent snapshot. Resolver state is
    /// derived, not stored, so the serialized form carries no cycles.
    pub fn to_serialized(&self) -> SerializedToolset {
        SerializedToolset {
            compiler_path: self.compiler_path.display().to_string(),
            definition: self.definition.clone(),
            queries: self.query_cache.lock().unwrap().clone(),
            analysis: self.analysis_cache.lock().unwrap().clone(),
        }
    }

    /// Rehydrates a snapshot entry. Entries whose compiler no longer exists
    /// on disk are rejected so the registry never serves stale paths.
    pub fn from_serialized(serialized: SerializedToolset) -> Option<Self> {
        let compiler_path = PathBuf::from(&serialized.compiler_path);
        if !compiler_path.is_file() {
            return None;
        }
        DefinitionFile::from_value(serialized.definition.doc.clone())?;
        Some(Self {
            compiler_path,
            definition: serialized.definition,
            query_cache: Mutex::new(serialized.queries),
            analysis_cache: Mutex::new(serialized.analysis),
        })
    }
}

/// The on-disk shape of one registry entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedToolset {
    pub compiler_path: String,
    pub definition: DefinitionFile,
    #[serde(default)]
    pub queries: IndexMap<String, String>,
    #[serde(default)]
    pub analysis: IndexMap<String, Value>,
}

// --- Boundary records ---

/// Include search paths, bucketed the way downstream parsers consume them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IncludeConfiguration {
    pub paths: Vec<String>,
    pub system_paths: Vec<String>,
    pub built_in_paths: Vec<String>,
    pub external_paths: Vec<String>,
    pub environment_paths: Vec<String>,
    pub framework_paths: Vec<String>,
}

/// The resolved view of one translation unit's analysis inputs: the typed
/// boundary record projected from a working configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntelliSenseConfiguration {
    pub compiler_path: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub architecture: Option<String>,
    pub host_architecture: Option<String>,
    pub bits: Option<u32>,
    pub language: Option<String>,
    pub standard: Option<String>,
    pub macros: IndexMap<String, String>,
    pub defines: IndexMap<String, String>,
    pub include: IncludeConfiguration,
    pub forced_include_files: Vec<String>,
    pub parser_arguments: Vec<String>,
}

impl IntelliSenseConfiguration {
    /// Projects a working configuration tree into the typed record.
    /// Field-tolerant: anything of an unexpected shape becomes its default.
    pub fn from_tree(tree: &Value) -> Self {
        let mut config = Self {
            compiler_path: text_field(tree, "compilerPath"),
            name: text_field(tree, "name"),
            version: text_field(tree, "version"),
            architecture: text_field(tree, "architecture"),
            host_architecture: text_field(tree, "hostArchitecture"),
            language: text_field(tree, "language"),
            standard: text_field(tree, "standard"),
            ..Self::default()
        };
        config.bits = tree.get("bits").and_then(|bits| match bits {
            Value::Number(n) => n.as_u64().map(|n| n as u32),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });
        config.macros = map_field(tree, "macros");
        config.defines = map_field(tree, "defines");
        if let Some(include) = tree.get("include") {
            config.include = IncludeConfiguration {
                paths: list_field(include, "paths"),
                system_paths: list_field(include, "systemPaths"),
                built_in_paths: list_field(include, "builtInPaths"),
                external_paths: list_field(include, "externalPaths"),
                environment_paths: list_field(include, "environmentPaths"),
                framework_paths: list_field(include, "frameworkPaths"),
            };
        }
        config.forced_include_files = list_field(tree, "forcedIncludeFiles");
        config.parser_arguments = list_field(tree, "parserArguments");
        config
    }
}

/// Options for one analysis pass.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    pub base_directory: Option<PathBuf>,
    pub source_file: Option<PathBuf>,
    pub language: Option<String>,
    pub standard: Option<String>,
    /// A fragment merged over the cached result on every call; applied to a
    /// deep clone, never to the cache itself.
    pub user_intellisense_configuration: Option<Value>,
}

/// Options for `Engine::initialize`.
#[derive(Debug, Clone, Default)]
pub struct InitializeOptions {
    /// Keep the current registry and in-progress state instead of resetting.
    pub quick: bool,
    /// Directory for the persistent snapshot.
    pub storage_path: Option<PathBuf>,
}

// --- Tree helpers ---

/// Renders a scalar leaf as text, the way it would appear on a command line.
pub(crate) fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn text_field(tree: &Value, key: &str) -> Option<String> {
    match tree.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn list_field(tree: &Value, key: &str) -> Vec<String> {
    match tree.get(key) {
        Some(Value::Array(items)) => items.iter().map(scalar_text).collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn map_field(tree: &Value, key: &str) -> IndexMap<String, String> {
    match tree.get(key) {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(name, value)| (name.clone(), scalar_text(value)))
            .collect(),
        _ => IndexMap::new(),
    }
}
