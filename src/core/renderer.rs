//! # Value Renderer
//!
//! Expands `${prefix:expression}` tokens in strings and whole JSON trees
//! through a pluggable [`Resolver`]. Rendering resolves innermost tokens
//! first and re-scans the result until it reaches a fixed point, bounded by
//! [`MAX_RENDER_ITERATIONS`] against self-referential definitions.
//! Unresolvable tokens render to the empty string rather than failing: a
//! definition that references a value this host does not have simply
//! contributes nothing.

use crate::constants::{LIST_SENTINEL, MAX_RENDER_ITERATIONS};
use crate::core::{expr, merger};
use crate::models::DefinitionFile;
use crate::system::host;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::path::Path;

lazy_static! {
    // Innermost tokens only: no `${` or `}` inside the braces. Outer tokens
    // become visible on the next fixed-point pass.
    static ref TOKEN_RE: Regex = Regex::new(r"\$\{([^${}]*)\}").unwrap();
}

/// A resolved template value. Lists rendered into a string slot are joined
/// with the BEL sentinel, which the merger splits back apart.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Text(String),
    List(Vec<String>),
}

impl Resolved {
    fn into_text(self) -> String {
        match self {
            Resolved::Text(s) => s,
            Resolved::List(items) => items.join(&LIST_SENTINEL.to_string()),
        }
    }
}

/// The lookup half of the renderer. Implementations carry whatever context
/// they need (a definition, a compiler path, capture groups); returning
/// `None` renders the token as empty.
pub trait Resolver {
    fn resolve(&self, prefix: &str, expression: &str) -> Option<Resolved>;
}

/// Renders a template to a plain string.
pub fn render(template: &str, resolver: &dyn Resolver) -> String {
    let mut current = template.to_string();
    for _ in 0..MAX_RENDER_ITERATIONS {
        if !TOKEN_RE.is_match(&current) {
            break;
        }
        current = TOKEN_RE
            .replace_all(&current, |caps: &regex::Captures| {
                let (prefix, expression) = split_token(&caps[1]);
                resolver
                    .resolve(prefix, expression)
                    .map(Resolved::into_text)
                    .unwrap_or_default()
            })
            .into_owned();
    }
    current
}

/// Renders a template with a data context (capture groups, the working
/// configuration) layered over `resolver`.
pub fn render_with_data(template: &str, data: &Value, resolver: &dyn Resolver) -> String {
    let layered = DataResolver { data, inner: resolver };
    render(template, &layered)
}

/// Walks a JSON tree and renders every string leaf in place, preserving
/// structure. `data` is the identifier context for empty-prefix lookups.
pub fn recursive_render(value: &mut Value, data: &Value, resolver: &dyn Resolver) {
    match value {
        Value::String(s) => {
            *s = render_with_data(s, data, resolver);
        }
        Value::Array(items) => {
            for item in items {
                recursive_render(item, data, resolver);
            }
        }
        Value::Object(map) => {
            if map.keys().any(|key| key.contains("${")) {
                // Keys can carry tokens too (`{"${key}": "${value}"}`), so
                // the map is rebuilt with rendered keys.
                let taken = std::mem::take(map);
                for (key, mut item) in taken {
                    recursive_render(&mut item, data, resolver);
                    map.insert(render_with_data(&key, data, resolver), item);
                }
            } else {
                for (_, item) in map.iter_mut() {
                    recursive_render(item, data, resolver);
                }
            }
        }
        _ => {}
    }
}

/// Renders `expression` and evaluates the result as a boolean expression
/// against `data`. Parse failures are falsy.
pub fn evaluate_expression(expression: &str, data: &Value, resolver: &dyn Resolver) -> bool {
    let rendered = render_with_data(expression, data, resolver);
    expr::evaluate(&rendered, data)
}

/// Renders a fragment's string leaves with `data` as context, then merges
/// the result into `target`. The fragment itself is never mutated.
pub fn merge_fragment(target: &mut Value, fragment: &Value, data: &Value, resolver: &dyn Resolver) {
    let mut rendered = fragment.clone();
    recursive_render(&mut rendered, data, resolver);
    merger::merge(target, &rendered);
}

fn split_token(inner: &str) -> (&str, &str) {
    match inner.find(':') {
        Some(index) => (&inner[..index], &inner[index + 1..]),
        None => ("", inner),
    }
}

// --- Resolver implementations ---

/// The standard resolver: host facts, the process environment, and (when
/// present) a definition plus the binary under inspection. Carries exactly
/// the per-toolset state the design calls for.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefinitionResolver<'a> {
    definition: Option<&'a DefinitionFile>,
    compiler_path: Option<&'a Path>,
    base_directory: Option<&'a Path>,
}

impl<'a> DefinitionResolver<'a> {
    /// A resolver with no definition or compiler context (condition
    /// evaluation at load time).
    pub fn bare() -> Self {
        Self::default()
    }

    pub fn for_definition(definition: &'a DefinitionFile) -> Self {
        Self {
            definition: Some(definition),
            compiler_path: None,
            base_directory: None,
        }
    }

    pub fn for_toolset(definition: &'a DefinitionFile, compiler_path: &'a Path) -> Self {
        Self {
            definition: Some(definition),
            compiler_path: Some(compiler_path),
            base_directory: None,
        }
    }

    pub fn with_base_directory(mut self, base_directory: Option<&'a Path>) -> Self {
        self.base_directory = base_directory;
        self
    }

    fn resolve_reserved(&self, expression: &str) -> Option<Resolved> {
        match expression {
            "pathSeparator" => Some(Resolved::Text(std::path::MAIN_SEPARATOR.to_string())),
            "pathDelimiter" => Some(Resolved::Text(host::path_delimiter().to_string())),
            "workspaceFolder" | "cwd" => {
                let dir = match self.base_directory {
                    Some(dir) => dir.to_path_buf(),
                    None => std::env::current_dir().ok()?,
                };
                Some(Resolved::Text(dunce::simplified(&dir).display().to_string()))
            }
            "name" => self
                .definition
                .map(|d| Resolved::Text(d.name().to_string())),
            "binary" | "compilerPath" => self
                .compiler_path
                .map(|p| Resolved::Text(dunce::simplified(p).display().to_string())),
            "compilerPath.basename" => {
                let name = self.compiler_path?.file_name()?.to_string_lossy();
                Some(Resolved::Text(strip_executable_extension(&name)))
            }
            "host.os" => Some(Resolved::Text(host::os_name().to_string())),
            "host.platform" => Some(Resolved::Text(host::platform_name().to_string())),
            "host.arch" => Some(Resolved::Text(host::arch_name().to_string())),
            _ => None,
        }
    }
}

impl Resolver for DefinitionResolver<'_> {
    fn resolve(&self, prefix: &str, expression: &str) -> Option<Resolved> {
        match prefix {
            "env" => {
                if expression == "home" {
                    let home = dirs::home_dir()?;
                    return Some(Resolved::Text(home.display().to_string()));
                }
                std::env::var(expression).ok().map(Resolved::Text)
            }
            // Reserved for host settings; empty until a host wires one in.
            "config" => Some(Resolved::Text(String::new())),
            "definition" => value_to_resolved(self.definition?.get(expression)?),
            "" => self.resolve_reserved(expression).or_else(|| {
                let intellisense = self.definition?.intellisense()?;
                value_to_resolved(tree_lookup(intellisense, expression)?)
            }),
            _ => None,
        }
    }
}

/// Layers a data tree (regex captures, the working configuration) over an
/// inner resolver. Empty-prefix identifiers found in the data win.
pub struct DataResolver<'a> {
    pub data: &'a Value,
    pub inner: &'a dyn Resolver,
}

impl Resolver for DataResolver<'_> {
    fn resolve(&self, prefix: &str, expression: &str) -> Option<Resolved> {
        if prefix.is_empty()
            && let Some(value) = tree_lookup(self.data, expression)
            && let Some(resolved) = value_to_resolved(value)
        {
            return Some(resolved);
        }
        self.inner.resolve(prefix, expression)
    }
}

/// The regex-building resolver used for `command` chains: expands a small
/// set of reserved shorthand tokens into regex fragments and defers
/// everything else to the wrapped resolver.
pub struct RxResolver<'a> {
    pub inner: &'a dyn Resolver,
}

impl Resolver for RxResolver<'_> {
    fn resolve(&self, prefix: &str, expression: &str) -> Option<Resolved> {
        if prefix.is_empty() {
            let shorthand = match expression {
                "-/" | "/-" => Some(r"[\-\/]"),
                "key" => Some("(?<key>[^=]+)"),
                "value" => Some("(?<value>.+)"),
                "keyEqualsValue" => Some("(?<key>[^=]+)=(?<value>.+)"),
                _ => None,
            };
            if let Some(text) = shorthand {
                return Some(Resolved::Text(text.to_string()));
            }
        }
        self.inner.resolve(prefix, expression)
    }
}

/// Strips a trailing executable extension on Windows (`cl.exe` → `cl`).
pub fn strip_executable_extension(name: &str) -> String {
    if cfg!(target_os = "windows") {
        let lower = name.to_ascii_lowercase();
        for ext in crate::constants::WINDOWS_EXECUTABLE_EXTENSIONS {
            if lower.ends_with(ext) {
                return name[..name.len() - ext.len()].to_string();
            }
        }
    }
    name.to_string()
}

fn tree_lookup<'v>(tree: &'v Value, name: &str) -> Option<&'v Value> {
    if let Some(value) = tree.get(name) {
        return Some(value);
    }
    let mut current = tree;
    for segment in name.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn value_to_resolved(value: &Value) -> Option<Resolved> {
    match value {
        Value::String(s) => Some(Resolved::Text(s.clone())),
        Value::Number(n) => Some(Resolved::Text(n.to_string())),
        Value::Bool(b) => Some(Resolved::Text(b.to_string())),
        Value::Array(items) => Some(Resolved::List(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct MapResolver(serde_json::Map<String, Value>);

    impl Resolver for MapResolver {
        fn resolve(&self, prefix: &str, expression: &str) -> Option<Resolved> {
            if !prefix.is_empty() {
                return None;
            }
            value_to_resolved(self.0.get(expression)?)
        }
    }

    fn resolver(data: Value) -> MapResolver {
        MapResolver(data.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_renders_simple_and_adjacent_tokens() {
        let r = resolver(json!({ "a": "x", "b": "y" }));
        assert_eq!(render("${a}${b}", &r), "xy");
        assert_eq!(render("-I${a}/include", &r), "-Ix/include");
    }

    #[test]
    fn test_renders_nested_tokens_innermost_first() {
        let r = resolver(json!({ "which": "a", "a": "resolved" }));
        assert_eq!(render("${${which}}", &r), "resolved");
    }

    #[test]
    fn test_unknown_tokens_render_empty() {
        let r = resolver(json!({}));
        assert_eq!(render("pre${missing}post", &r), "prepost");
    }

    #[test]
    fn test_fixed_point_iteration_is_bounded() {
        // `a` resolves to a token referencing itself; rendering must stop
        // at the iteration bound instead of spinning.
        let r = resolver(json!({ "a": "${a}" }));
        assert_eq!(render("${a}", &r), "${a}");

        // A finite chain still resolves completely.
        let r = resolver(json!({ "a": "${b}", "b": "${c}", "c": "done" }));
        assert_eq!(render("${a}", &r), "done");
    }

    #[test]
    fn test_list_resolution_joins_with_sentinel() {
        let r = resolver(json!({ "paths": ["/a", "/b"] }));
        assert_eq!(
            render("${paths}", &r),
            format!("/a{}/b", crate::constants::LIST_SENTINEL)
        );
    }

    #[test]
    fn test_recursive_render_preserves_structure() {
        let r = resolver(json!({}));
        let data = json!({ "arch": "x64" });
        let mut tree = json!({ "architecture": "${arch}", "nested": ["${arch}", 3] });
        recursive_render(&mut tree, &data, &r);
        assert_eq!(tree, json!({ "architecture": "x64", "nested": ["x64", 3] }));
    }

    #[test]
    fn test_rx_resolver_expands_shorthand() {
        let inner = resolver(json!({}));
        let rx = RxResolver { inner: &inner };
        assert_eq!(render("${-/}I${value}", &rx), r"[\-\/]I(?<value>.+)");
        assert_eq!(
            render("${keyEqualsValue}", &rx),
            "(?<key>[^=]+)=(?<value>.+)"
        );
    }

    #[test]
    fn test_evaluate_expression_renders_before_parsing() {
        let inner = resolver(json!({}));
        let data = json!({ "language": "cpp" });
        assert!(evaluate_expression("'${language}'=='cpp'", &data, &inner));
        assert!(!evaluate_expression("'${language}'=='c'", &data, &inner));
        // Identifiers still work unrendered.
        assert!(evaluate_expression("language=='cpp'", &data, &inner));
    }

    #[test]
    fn test_merge_fragment_uses_capture_context() {
        let inner = resolver(json!({}));
        let captures = json!({ "p": "/x" });
        let mut target = json!({ "include": { "paths": [] } });
        merge_fragment(
            &mut target,
            &json!({ "include": { "paths": ["${p}"] } }),
            &captures,
            &inner,
        );
        assert_eq!(target["include"]["paths"], json!(["/x"]));
    }

    #[test]
    fn test_recursive_render_renders_object_keys() {
        let inner = resolver(json!({}));
        let data = json!({ "key": "__STDC__", "value": "1" });
        let mut tree = json!({ "macros": { "${key}": "${value}" } });
        recursive_render(&mut tree, &data, &inner);
        assert_eq!(tree, json!({ "macros": { "__STDC__": "1" } }));
    }

    #[test]
    fn test_definition_resolver_reads_intellisense_fields() {
        let definition = DefinitionFile::from_value(json!({
            "name": "gcc",
            "intellisense": { "standard": "C++17" }
        }))
        .unwrap();
        let r = DefinitionResolver::for_definition(&definition);
        assert_eq!(render("${standard}", &r), "C++17");
        assert_eq!(render("${name}", &r), "gcc");
        assert_eq!(render("${definition:name}", &r), "gcc");
    }
}
