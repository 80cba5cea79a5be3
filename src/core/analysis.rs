//! # Analysis Engine
//!
//! Transforms an argv-style compiler invocation into a resolved IntelliSense
//! configuration by running the toolset's `analysis` action stream: argv
//! rewriting tasks, `command` rules that consume recognized arguments,
//! compiler `query` invocations, and expression-gated fragments. Results are
//! cached per exact argv; user overrides are always applied to a deep clone
//! of the cached tree, never to the cache itself.

use crate::CancellationToken;
use crate::constants::LIST_SENTINEL;
use crate::core::actions::{self, ANALYSIS_ACTIONS, ActionEntry};
use crate::core::merger;
use crate::core::renderer::{self, DefinitionResolver, Resolved, Resolver, RxResolver};
use crate::models::{self, AnalysisOptions, IntelliSenseConfiguration, Language, Toolset};
use crate::system::{host, process};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

impl Toolset {
    /// Produces the IntelliSense configuration for one compiler invocation.
    /// Failures inside the definition degrade to partial results; nothing
    /// here panics an entire host over one stubborn compiler.
    pub fn get_intellisense_configuration(
        &self,
        compiler_args: &[String],
        options: &AnalysisOptions,
    ) -> IntelliSenseConfiguration {
        let token: CancellationToken = Arc::new(AtomicBool::new(false));
        self.get_intellisense_configuration_with(compiler_args, options, &token)
    }

    /// As [`Self::get_intellisense_configuration`], with cooperative
    /// cancellation. A cancelled analysis writes no cache entry.
    pub fn get_intellisense_configuration_with(
        &self,
        compiler_args: &[String],
        options: &AnalysisOptions,
        cancellation_token: &CancellationToken,
    ) -> IntelliSenseConfiguration {
        let cache_key = compiler_args.join(" ");
        if let Some(cached) = self.cached_analysis(&cache_key) {
            log::trace!("Analysis cache hit for '{}'.", cache_key);
            return self.finish(cached, options);
        }

        let definition = self.definition().clone();
        let resolver = DefinitionResolver::for_toolset(&definition, self.compiler_path())
            .with_base_directory(options.base_directory.as_deref());

        let mut args = compiler_args.to_vec();
        let mut config = self.seed_configuration(options);

        let analysis_block = definition.analysis().cloned().unwrap_or(Value::Null);
        for action in actions::parse_actions(&analysis_block, ANALYSIS_ACTIONS) {
            if cancellation_token.load(Ordering::Relaxed) {
                return self.finish(config, options);
            }
            if skip_for_language(&action, &config) {
                continue;
            }
            match action.action {
                "task" => run_tasks(&action.block, &mut args, options.base_directory.as_deref()),
                "command" => run_command_action(&action, &mut args, &mut config, &resolver),
                "query" => self.run_query_action(&action, &mut config, &resolver, cancellation_token),
                "expression" => run_expression_action(&action, &mut config, &resolver),
                _ => {}
            }
        }

        validate_paths(&mut config, &resolver);
        let data = config.clone();
        renderer::recursive_render(&mut config, &data, &resolver);

        if cancellation_token.load(Ordering::Relaxed) {
            return self.finish(config, options);
        }
        self.store_analysis(cache_key, config.clone());
        self.finish(config, options)
    }

    /// Seeds the working configuration: the definition's intellisense
    /// defaults shallow-merged with the invocation basics.
    fn seed_configuration(&self, options: &AnalysisOptions) -> Value {
        let mut config = self
            .definition()
            .intellisense()
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        if !config.is_object() {
            config = Value::Object(Default::default());
        }
        let map = config.as_object_mut().expect("seed is an object");
        map.insert(
            "compilerPath".to_string(),
            Value::String(self.compiler_path().display().to_string()),
        );
        if let Some(language) = &options.language {
            map.insert("language".to_string(), Value::String(language.clone()));
        }
        if let Some(standard) = &options.standard {
            map.insert("standard".to_string(), Value::String(standard.clone()));
        }
        config
    }

    /// Deep-clones the (cached) tree, folds in user overrides, and projects
    /// the typed boundary record. Post-processing runs on the clone so the
    /// cached tree stays pristine.
    fn finish(&self, tree: Value, options: &AnalysisOptions) -> IntelliSenseConfiguration {
        let mut out = tree;
        if let Some(user) = &options.user_intellisense_configuration {
            let definition = self.definition().clone();
            let resolver = DefinitionResolver::for_toolset(&definition, self.compiler_path())
                .with_base_directory(options.base_directory.as_deref());
            merger::merge(&mut out, user);
            validate_paths(&mut out, &resolver);
        }
        post_process(&mut out);
        IntelliSenseConfiguration::from_tree(&out)
    }

    /// `query` action: run the compiler, cache what it printed, and mine the
    /// text with the entry's regex rules.
    fn run_query_action(
        &self,
        action: &ActionEntry,
        config: &mut Value,
        resolver: &dyn Resolver,
        cancellation_token: &CancellationToken,
    ) {
        let Some(entries) = action.block.as_object() else {
            return;
        };

        for (command_template, rules) in entries {
            let scratch = ScratchFiles::default();
            let tmp_resolver = TmpResolver {
                inner: resolver,
                scratch: &scratch,
            };
            let rendered = renderer::render(command_template, &tmp_resolver);

            let text = match self.cached_query(&rendered) {
                Some(text) => {
                    log::trace!("Query cache hit for '{}'.", rendered);
                    text
                }
                None => {
                    let query_args = shlex::split(&rendered).unwrap_or_default();
                    let mut captured =
                        match process::run_captured(self.compiler_path(), &query_args, cancellation_token) {
                            Ok(output) => output.text,
                            Err(process::ProcessError::Interrupted { .. }) => return,
                            Err(e) => {
                                // A compiler that cannot run contributes
                                // nothing; analysis continues without it.
                                log::debug!("Query failed: {}", e);
                                String::new()
                            }
                        };
                    captured.push_str(&scratch.read_all());
                    self.store_query(rendered.clone(), captured.clone());
                    captured
                }
            };

            if text.is_empty() {
                continue;
            }
            apply_query_rules(rules, &text, config, resolver);
        }
    }
}

/// Language filtering: `c`-flagged blocks only run for C, `cpp`/`c++` only
/// for C++. The effective language is re-read from the working
/// configuration, so an earlier action can change it for later ones.
fn skip_for_language(action: &ActionEntry, config: &Value) -> bool {
    let language = config
        .get("language")
        .and_then(Value::as_str)
        .and_then(Language::parse);
    if action.has_flag("c") && language != Some(Language::C) {
        return true;
    }
    if (action.has_flag("cpp") || action.has_flag("c++")) && language != Some(Language::Cpp) {
        return true;
    }
    false
}

/// `task` action: named argv transformations, run in place.
fn run_tasks(block: &Value, args: &mut Vec<String>, base_directory: Option<&Path>) {
    let names: Vec<String> = match block {
        Value::String(name) => vec![name.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    for name in names {
        match name.as_str() {
            "inline-environment-variables" => {
                if let Ok(cl) = std::env::var("CL") {
                    args.extend(shlex::split(&cl).unwrap_or_default());
                }
                if let Ok(cl_trailing) = std::env::var("_CL_") {
                    let mut prefixed = shlex::split(&cl_trailing).unwrap_or_default();
                    prefixed.append(args);
                    *args = prefixed;
                }
            }
            "inline-response-file" => inline_response_files(args, base_directory),
            "remove-linker-arguments" => {
                if let Some(position) = args.iter().position(|arg| {
                    arg.eq_ignore_ascii_case("-link") || arg.eq_ignore_ascii_case("/link")
                }) {
                    args.truncate(position);
                }
            }
            // Reserved task names: recognized, deliberately inert.
            "consume-lib-path" | "zwCommandLineSwitch" | "experimentalModuleNegative"
            | "verifyIncludes" => {}
            other => log::debug!("Unknown analysis task '{}'.", other),
        }
    }
}

/// Replaces every `@file` argument with the argv-tokenized contents of
/// `file`. Unreadable response files are left in place.
fn inline_response_files(args: &mut Vec<String>, base_directory: Option<&Path>) {
    let mut inlined = Vec::with_capacity(args.len());
    for arg in args.drain(..) {
        let Some(file) = arg.strip_prefix('@') else {
            inlined.push(arg);
            continue;
        };
        let mut path = PathBuf::from(file);
        if path.is_relative()
            && let Some(base) = base_directory
        {
            path = base.join(path);
        }
        match std::fs::read_to_string(&path) {
            Ok(contents) => inlined.extend(shlex::split(&contents).unwrap_or_default()),
            Err(e) => {
                log::debug!("Response file '{}' not readable: {}", path.display(), e);
                inlined.push(arg);
            }
        }
    }
    *args = inlined;
}

/// `command` action: each key is a `;`-separated chain of regexes matched
/// element-wise against the head of the argv. A matching chain merges its
/// fragment (captures as context) and consumes the matched prefix, or keeps
/// it aside under `no_consume`. Unrecognized arguments shift into the kept
/// list one at a time.
fn run_command_action(
    action: &ActionEntry,
    args: &mut Vec<String>,
    config: &mut Value,
    resolver: &dyn Resolver,
) {
    let Some(entries) = action.block.as_object() else {
        return;
    };
    let no_consume = action.has_flag("no_consume");
    let rx_resolver = RxResolver { inner: resolver };

    let mut chains: Vec<(Vec<regex::Regex>, &Value)> = Vec::new();
    for (chain_spec, fragment) in entries {
        let mut regexes = Vec::new();
        let mut valid = true;
        for part in chain_spec.split(';') {
            let rendered = renderer::render(part, &rx_resolver);
            match regex::Regex::new(&format!("^(?:{})$", rendered)) {
                Ok(regex) => regexes.push(regex),
                Err(e) => {
                    log::debug!("Invalid command rule '{}': {}", chain_spec, e);
                    valid = false;
                    break;
                }
            }
        }
        if valid && !regexes.is_empty() {
            chains.push((regexes, fragment));
        }
    }

    let mut queue: VecDeque<String> = args.drain(..).collect();
    let mut kept: Vec<String> = Vec::new();

    'next_argument: while !queue.is_empty() {
        for (regexes, fragment) in &chains {
            if regexes.len() > queue.len() {
                continue;
            }
            let mut captures = serde_json::Map::new();
            let mut matched = true;
            for (index, regex) in regexes.iter().enumerate() {
                let Some(found) = regex.captures(&queue[index]) else {
                    matched = false;
                    break;
                };
                for name in regex.capture_names().flatten() {
                    if let Some(group) = found.name(name) {
                        captures.insert(name.to_string(), Value::String(group.as_str().to_string()));
                    }
                }
            }
            if matched {
                renderer::merge_fragment(config, fragment, &Value::Object(captures), resolver);
                let consumed: Vec<String> = queue.drain(..regexes.len()).collect();
                if no_consume {
                    kept.extend(consumed);
                }
                continue 'next_argument;
            }
        }
        kept.push(queue.pop_front().expect("queue checked non-empty"));
    }

    *args = kept;
}

/// Applies one query entry's `regex → fragment` rules over captured text.
/// Rules iterate every multi-line match; capture values spanning lines are
/// pre-split into trimmed lists.
fn apply_query_rules(rules: &Value, text: &str, config: &mut Value, resolver: &dyn Resolver) {
    let Some(rule_map) = rules.as_object() else {
        return;
    };
    for (pattern, fragment) in rule_map {
        let regex = match regex::RegexBuilder::new(pattern).multi_line(true).build() {
            Ok(regex) => regex,
            Err(e) => {
                log::debug!("Invalid query rule '{}': {}", pattern, e);
                continue;
            }
        };
        for found in regex.captures_iter(text) {
            let mut data = serde_json::Map::new();
            for name in regex.capture_names().flatten() {
                let Some(group) = found.name(name) else { continue };
                let value = group.as_str();
                if value.contains('\n') {
                    let lines: Vec<Value> = value
                        .lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty())
                        .map(|line| Value::String(line.to_string()))
                        .collect();
                    data.insert(name.to_string(), Value::Array(lines));
                } else {
                    data.insert(name.to_string(), Value::String(value.to_string()));
                }
            }
            renderer::merge_fragment(config, fragment, &Value::Object(data), resolver);
        }
    }
}

/// `expression` action: evaluate each entry against the current
/// configuration; truthy expressions merge their fragment. Earlier actions'
/// side effects are visible here because the data context is rebuilt per
/// entry.
fn run_expression_action(action: &ActionEntry, config: &mut Value, resolver: &dyn Resolver) {
    let Some(entries) = action.block.as_object() else {
        return;
    };
    for (expression, fragment) in entries {
        let data = config.clone();
        if renderer::evaluate_expression(expression, &data, resolver) {
            renderer::merge_fragment(config, fragment, &data, resolver);
        }
    }
}

/// Walks the configuration and, for every key ending in `path`, `paths`,
/// `file` or `files` (case-insensitive): renders each entry, splits strings
/// on the OS path delimiter into lists, keeps only entries that exist on
/// disk (canonicalized), and deduplicates preserving first occurrence.
pub(crate) fn validate_paths(config: &mut Value, resolver: &dyn Resolver) {
    let data = config.clone();
    validate_tree(config, &data, resolver);
}

fn validate_tree(value: &mut Value, data: &Value, resolver: &dyn Resolver) {
    let Some(map) = value.as_object_mut() else {
        return;
    };
    for (key, entry) in map.iter_mut() {
        let lower = key.to_ascii_lowercase();
        let is_path_key = lower.ends_with("path")
            || lower.ends_with("paths")
            || lower.ends_with("file")
            || lower.ends_with("files");
        if is_path_key {
            validate_path_value(entry, data, resolver);
        } else if entry.is_object() {
            validate_tree(entry, data, resolver);
        }
    }
}

fn validate_path_value(entry: &mut Value, data: &Value, resolver: &dyn Resolver) {
    match entry {
        Value::String(template) => {
            let rendered = renderer::render_with_data(template, data, resolver);
            let parts: Vec<&str> = rendered
                .split(|c: char| c == host::path_delimiter() || c == LIST_SENTINEL)
                .filter(|part| !part.is_empty())
                .collect();
            if parts.len() > 1 {
                // Delimiter-joined strings are coerced into lists.
                let validated = validate_entries(parts.iter().map(|s| s.to_string()));
                *entry = Value::Array(validated.into_iter().map(Value::String).collect());
            } else {
                *entry = match parts.first().and_then(|part| existing_path(part)) {
                    Some(path) => Value::String(path),
                    None => Value::Null,
                };
            }
        }
        Value::Array(items) => {
            let mut rendered: Vec<String> = Vec::with_capacity(items.len());
            for item in items.iter() {
                let text = match item {
                    Value::String(template) => {
                        renderer::render_with_data(template, data, resolver)
                    }
                    other => models::scalar_text(other),
                };
                for part in text
                    .split(|c: char| c == host::path_delimiter() || c == LIST_SENTINEL)
                    .filter(|part| !part.is_empty())
                {
                    rendered.push(part.to_string());
                }
            }
            let validated = validate_entries(rendered.into_iter());
            *entry = Value::Array(validated.into_iter().map(Value::String).collect());
        }
        _ => {}
    }
}

/// Keeps only existing filesystem entries, canonicalized, first occurrence
/// wins.
fn validate_entries(entries: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut validated = Vec::new();
    for entry in entries {
        if let Some(path) = existing_path(&entry)
            && seen.insert(path.clone())
        {
            validated.push(path);
        }
    }
    validated
}

fn existing_path(text: &str) -> Option<String> {
    let canonical = dunce::canonicalize(Path::new(text)).ok()?;
    Some(canonical.display().to_string())
}

/// Derives `parserArguments` from the resolved configuration: `-D` for every
/// macro, `-I` for built-in include paths, `--sys_include` for system and
/// external paths, `--include_directory` for plain and environment paths.
/// Appending only happens when `parserArguments` is already a list.
fn post_process(config: &mut Value) {
    if !config
        .get("parserArguments")
        .map(Value::is_array)
        .unwrap_or(false)
    {
        return;
    }

    let mut derived: Vec<String> = Vec::new();
    if let Some(macros) = config.get("macros").and_then(Value::as_object) {
        for (name, value) in macros {
            derived.push(format!("-D{}={}", name, models::scalar_text(value)));
        }
    }
    for path in include_list(config, "builtInPaths") {
        derived.push(format!("-I{}", path));
    }
    for path in include_list(config, "systemPaths")
        .into_iter()
        .chain(include_list(config, "externalPaths"))
    {
        derived.push("--sys_include".to_string());
        derived.push(path);
    }
    for path in include_list(config, "paths")
        .into_iter()
        .chain(include_list(config, "environmentPaths"))
    {
        derived.push("--include_directory".to_string());
        derived.push(path);
    }

    let arguments = config["parserArguments"]
        .as_array_mut()
        .expect("checked above");
    arguments.extend(derived.into_iter().map(Value::String));
}

fn include_list(config: &Value, key: &str) -> Vec<String> {
    config
        .get("include")
        .and_then(|include| include.get(key))
        .and_then(Value::as_array)
        .map(|items| items.iter().map(models::scalar_text).collect())
        .unwrap_or_default()
}

// --- Query scratch files ---

/// Scratch files backing `${tmp:...}` tokens: created empty before the
/// compiler runs, read after it exits, deleted on drop whatever the
/// outcome.
#[derive(Default)]
struct ScratchFiles {
    files: std::sync::Mutex<Vec<(String, tempfile::NamedTempFile)>>,
}

impl ScratchFiles {
    fn path_for(&self, name: &str) -> Option<String> {
        let mut files = self.files.lock().unwrap();
        if let Some((_, file)) = files.iter().find(|(existing, _)| existing == name) {
            return Some(file.path().display().to_string());
        }
        let sanitized: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect();
        let file = tempfile::Builder::new()
            .prefix("toolscout-")
            .suffix(&format!("-{}", sanitized))
            .tempfile()
            .ok()?;
        let path = file.path().display().to_string();
        files.push((name.to_string(), file));
        Some(path)
    }

    fn read_all(&self) -> String {
        let files = self.files.lock().unwrap();
        let mut text = String::new();
        for (_, file) in files.iter() {
            if let Ok(contents) = std::fs::read_to_string(file.path()) {
                text.push_str(&contents);
            }
        }
        text
    }
}

struct TmpResolver<'a> {
    inner: &'a dyn Resolver,
    scratch: &'a ScratchFiles,
}

impl Resolver for TmpResolver<'_> {
    fn resolve(&self, prefix: &str, expression: &str) -> Option<Resolved> {
        if prefix == "tmp" {
            return self.scratch.path_for(expression).map(Resolved::Text);
        }
        self.inner.resolve(prefix, expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DefinitionFile;
    use serde_json::json;

    struct NullResolver;
    impl Resolver for NullResolver {
        fn resolve(&self, _prefix: &str, _expression: &str) -> Option<Resolved> {
            None
        }
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[cfg(unix)]
    fn toolset_with(doc: Value) -> (tempfile::TempDir, Toolset) {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let compiler = dir.path().join("fakecc");
        std::fs::write(&compiler, b"#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&compiler, std::fs::Permissions::from_mode(0o755)).unwrap();
        let compiler = dunce::canonicalize(&compiler).unwrap();
        let definition = DefinitionFile::from_value(doc).unwrap();
        (dir, Toolset::new(compiler, definition))
    }

    #[test]
    fn test_response_file_inlining() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rsp.txt"), "-I/u/inc -DFOO=1").unwrap();

        let mut argv = args(&["@rsp.txt"]);
        run_tasks(
            &json!("inline-response-file"),
            &mut argv,
            Some(dir.path()),
        );
        assert_eq!(argv, args(&["-I/u/inc", "-DFOO=1"]));
    }

    #[test]
    fn test_unreadable_response_file_is_left_in_place() {
        let mut argv = args(&["@/missing/rsp.txt", "-c"]);
        run_tasks(&json!("inline-response-file"), &mut argv, None);
        assert_eq!(argv, args(&["@/missing/rsp.txt", "-c"]));
    }

    #[test]
    fn test_linker_arguments_are_truncated() {
        let mut argv = args(&["-O2", "/LINK", "/LIBPATH:x"]);
        run_tasks(&json!("remove-linker-arguments"), &mut argv, None);
        assert_eq!(argv, args(&["-O2"]));
    }

    #[test]
    fn test_command_rewrite_with_no_consume_keeps_arguments() {
        let block = json!({
            "command:no_consume": {
                "-I(?<p>.+)": { "include": { "paths": ["${p}"] } }
            }
        });
        let actions = actions::parse_actions(&block, ANALYSIS_ACTIONS);
        let mut argv = args(&["-I/x", "-O2"]);
        let mut config = json!({});
        run_command_action(&actions[0], &mut argv, &mut config, &NullResolver);

        assert_eq!(config["include"]["paths"], json!(["/x"]));
        assert_eq!(argv, args(&["-I/x", "-O2"]));
    }

    #[test]
    fn test_command_rewrite_consumes_by_default() {
        let block = json!({
            "command": {
                "${-/}D(?<key>[^=]+)=(?<value>.+)": { "macros": { "${key}": "${value}" } }
            }
        });
        let actions = actions::parse_actions(&block, ANALYSIS_ACTIONS);
        let mut argv = args(&["-DX=1", "/DY=2", "-c"]);
        let mut config = json!({});
        run_command_action(&actions[0], &mut argv, &mut config, &NullResolver);

        assert_eq!(config["macros"]["X"], "1");
        assert_eq!(config["macros"]["Y"], "2");
        assert_eq!(argv, args(&["-c"]));
    }

    #[test]
    fn test_command_chain_matches_consecutive_arguments() {
        let block = json!({
            "command": {
                "-isystem;(?<dir>.+)": { "include": { "systemPaths": ["${dir}"] } }
            }
        });
        let actions = actions::parse_actions(&block, ANALYSIS_ACTIONS);
        let mut argv = args(&["-isystem", "/sys/include", "-W"]);
        let mut config = json!({});
        run_command_action(&actions[0], &mut argv, &mut config, &NullResolver);

        assert_eq!(config["include"]["systemPaths"], json!(["/sys/include"]));
        assert_eq!(argv, args(&["-W"]));
    }

    #[test]
    fn test_query_rules_split_multiline_captures() {
        let rules = json!({
            "#include <\\.\\.\\.> search starts here:\\n(?<dirs>(?:\\s+.+\\n)+)End of search list": {
                "include": { "systemPaths": ["${dirs}"] }
            }
        });
        let text = "#include <...> search starts here:\n /usr/include\n /usr/local/include\nEnd of search list\n";
        let mut config = json!({});
        apply_query_rules(&rules, text, &mut config, &NullResolver);
        assert_eq!(
            config["include"]["systemPaths"],
            json!(["/usr/include", "/usr/local/include"])
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_expression_gated_fragment_sets_the_standard() {
        let (_dir, toolset) = toolset_with(json!({
            "name": "gcc",
            "intellisense": { "language": "c" },
            "analysis": {
                "expression": {
                    "language=='cpp'": { "standard": "C++17" }
                }
            }
        }));
        let options = AnalysisOptions {
            language: Some("cpp".to_string()),
            ..Default::default()
        };
        let config = toolset.get_intellisense_configuration(&[], &options);
        assert_eq!(config.standard.as_deref(), Some("C++17"));
        assert_eq!(config.language.as_deref(), Some("cpp"));
    }

    #[cfg(unix)]
    #[test]
    fn test_language_filtered_blocks_are_skipped() {
        let (_dir, toolset) = toolset_with(json!({
            "name": "gcc",
            "analysis": {
                "expression:c": { "1==1": { "standard": "C17" } },
                "expression:cpp": { "1==1": { "standard": "C++20" } }
            }
        }));
        let options = AnalysisOptions {
            language: Some("cpp".to_string()),
            ..Default::default()
        };
        let config = toolset.get_intellisense_configuration(&[], &options);
        assert_eq!(config.standard.as_deref(), Some("C++20"));
    }

    #[cfg(unix)]
    #[test]
    fn test_priority_order_side_effects_are_observable() {
        let (_dir, toolset) = toolset_with(json!({
            "name": "gcc",
            "analysis": {
                "expression:priority=2#gate": {
                    "standard=='C++20'": { "macros": { "GATED": "1" } }
                },
                "expression:priority=1#set": {
                    "1==1": { "standard": "C++20" }
                }
            }
        }));
        let config = toolset.get_intellisense_configuration(&[], &AnalysisOptions::default());
        assert_eq!(config.standard.as_deref(), Some("C++20"));
        assert_eq!(config.macros.get("GATED").map(String::as_str), Some("1"));
    }

    #[cfg(unix)]
    #[test]
    fn test_path_validation_prunes_nonexistent_entries() {
        let (_dir, toolset) = toolset_with(json!({
            "name": "gcc",
            "intellisense": {
                "include": { "paths": ["/does/not/exist", "${env:HOME}"] }
            },
            "analysis": {}
        }));
        let config = toolset.get_intellisense_configuration(&[], &AnalysisOptions::default());
        let home = dunce::canonicalize(dirs::home_dir().unwrap()).unwrap();
        assert_eq!(config.include.paths, vec![home.display().to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_post_processing_derives_parser_arguments() {
        let system_dir = tempfile::tempdir().unwrap();
        let include_dir = tempfile::tempdir().unwrap();
        let system = dunce::canonicalize(system_dir.path()).unwrap();
        let include = dunce::canonicalize(include_dir.path()).unwrap();

        let (_dir, toolset) = toolset_with(json!({
            "name": "gcc",
            "intellisense": {
                "macros": { "X": "1" },
                "include": {
                    "systemPaths": [system.display().to_string()],
                    "paths": [include.display().to_string()]
                },
                "parserArguments": []
            },
            "analysis": {}
        }));
        let config = toolset.get_intellisense_configuration(&[], &AnalysisOptions::default());
        assert_eq!(
            config.parser_arguments,
            vec![
                "-DX=1".to_string(),
                "--sys_include".to_string(),
                system.display().to_string(),
                "--include_directory".to_string(),
                include.display().to_string(),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_repeat_analysis_hits_the_cache_without_spawning() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("spawns.log");
        let compiler = dir.path().join("fakecc");
        std::fs::write(
            &compiler,
            format!(
                "#!/bin/sh\necho spawned >> {}\necho '#define __FAKE__ 1'\n",
                counter.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&compiler, std::fs::Permissions::from_mode(0o755)).unwrap();
        let compiler = dunce::canonicalize(&compiler).unwrap();

        let definition = DefinitionFile::from_value(json!({
            "name": "fake",
            "analysis": {
                "query": {
                    "-E -dM": {
                        "#define (?<key>\\S+) (?<value>.+)": {
                            "macros": { "${key}": "${value}" }
                        }
                    }
                }
            }
        }))
        .unwrap();
        let toolset = Toolset::new(compiler, definition);

        let argv = args(&["-O2", "-c"]);
        let first = toolset.get_intellisense_configuration(&argv, &AnalysisOptions::default());
        let second = toolset.get_intellisense_configuration(&argv, &AnalysisOptions::default());

        assert_eq!(first, second);
        assert_eq!(first.macros.get("__FAKE__").map(String::as_str), Some("1"));
        let spawns = std::fs::read_to_string(&counter).unwrap();
        assert_eq!(spawns.lines().count(), 1);
        assert_eq!(toolset.analysis_cache_keys(), vec!["-O2 -c".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_user_overrides_apply_to_a_clone_of_the_cache() {
        let (_dir, toolset) = toolset_with(json!({
            "name": "gcc",
            "intellisense": { "standard": "C++14" },
            "analysis": {}
        }));
        let argv = args(&["-c"]);
        let plain = toolset.get_intellisense_configuration(&argv, &AnalysisOptions::default());
        assert_eq!(plain.standard.as_deref(), Some("C++14"));

        let overridden = toolset.get_intellisense_configuration(
            &argv,
            &AnalysisOptions {
                user_intellisense_configuration: Some(json!({ "standard": "C++23" })),
                ..Default::default()
            },
        );
        assert_eq!(overridden.standard.as_deref(), Some("C++23"));

        // The cache itself must stay pristine.
        let again = toolset.get_intellisense_configuration(&argv, &AnalysisOptions::default());
        assert_eq!(again.standard.as_deref(), Some("C++14"));
    }

    #[cfg(unix)]
    #[test]
    fn test_cancelled_analysis_writes_no_cache_entry() {
        let (_dir, toolset) = toolset_with(json!({
            "name": "gcc",
            "analysis": {}
        }));
        let token: CancellationToken = Arc::new(AtomicBool::new(true));
        let _ = toolset.get_intellisense_configuration_with(
            &args(&["-c"]),
            &AnalysisOptions::default(),
            &token,
        );
        assert!(toolset.analysis_cache_keys().is_empty());
    }
}
