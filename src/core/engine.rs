//! # Engine Facade
//!
//! The public surface of the detection engine: `initialize` loads the
//! definition catalog and the persistent snapshot, `get_toolsets` drains
//! discovery for every definition not yet searched, and `identify_toolset`
//! resolves a candidate (an absolute executable path, or a `*`-glob over
//! registered toolset names) to a single toolset. All registry mutations
//! funnel through here, guarded by the engine's locks, so callers on any
//! thread see one consistent view.

use crate::CancellationToken;
use crate::core::registry::{RegistryError, ToolsetRegistry};
use crate::core::renderer::strip_executable_extension;
use crate::core::{commons, definitions, discovery};
use crate::models::{
    AnalysisOptions, DefinitionFile, InitializeOptions, IntelliSenseConfiguration, Toolset,
};
use indexmap::IndexMap;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("The toolset engine has not been initialized.")]
    NotInitialized,
    #[error("Storage error: {0}")]
    Storage(#[from] RegistryError),
}

pub struct Engine {
    definitions: Mutex<Vec<DefinitionFile>>,
    registry: ToolsetRegistry,
    /// Definitions already drained by `get_toolsets`.
    searched: Mutex<HashSet<String>>,
    /// Per-candidate dedup for concurrent `identify_toolset` calls.
    in_progress: InProgress,
    initialized: AtomicBool,
    init_lock: Mutex<()>,
    cancellation_token: CancellationToken,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            definitions: Mutex::new(Vec::new()),
            registry: ToolsetRegistry::new(),
            searched: Mutex::new(HashSet::new()),
            in_progress: InProgress::default(),
            initialized: AtomicBool::new(false),
            init_lock: Mutex::new(()),
            cancellation_token: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn registry(&self) -> &ToolsetRegistry {
        &self.registry
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Loads definitions and the on-disk snapshot. Idempotent; concurrent
    /// callers serialize on an internal lock, and `quick` keeps the current
    /// registry instead of resetting it.
    pub fn initialize(
        &self,
        config_folders: &[PathBuf],
        options: InitializeOptions,
    ) -> Result<IndexMap<String, Arc<Toolset>>, EngineError> {
        let _guard = self.init_lock.lock().unwrap();

        if self.initialized.load(Ordering::SeqCst) && options.quick {
            return Ok(self.registry.snapshot());
        }
        if !options.quick {
            self.registry.reset();
            self.searched.lock().unwrap().clear();
        }

        let loaded = definitions::load_definitions(config_folders);
        log::debug!("Loaded {} definition(s).", loaded.len());
        *self.definitions.lock().unwrap() = loaded;

        self.registry.set_storage_path(options.storage_path.clone());
        self.registry.load_cached_entries();
        self.initialized.store(true, Ordering::SeqCst);
        Ok(self.registry.snapshot())
    }

    pub fn definitions(&self) -> Vec<DefinitionFile> {
        self.definitions.lock().unwrap().clone()
    }

    fn require_initialized(&self) -> Result<(), EngineError> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::NotInitialized)
        }
    }

    /// Runs discovery for every definition not yet searched and returns the
    /// registry. Definitions fan out concurrently; repeated calls only
    /// search what is new.
    pub fn get_toolsets(&self) -> Result<IndexMap<String, Arc<Toolset>>, EngineError> {
        self.require_initialized()?;

        let pending: Vec<DefinitionFile> = {
            let definitions = self.definitions.lock().unwrap();
            let mut searched = self.searched.lock().unwrap();
            definitions
                .iter()
                .filter(|definition| searched.insert(definition.name().to_string()))
                .cloned()
                .collect()
        };

        pending.par_iter().for_each(|definition| {
            discovery::search_for_toolsets(definition, &self.registry, &self.cancellation_token);
        });

        if let Err(e) = self.registry.flush() {
            log::warn!("Failed to write the toolset snapshot: {}", e);
        }
        Ok(self.registry.snapshot())
    }

    /// Resolves a candidate to a toolset: an absolute path to an existing
    /// executable is identified directly against the matching definitions;
    /// anything else is treated as a `*`-glob over registered toolset names
    /// (highest version first), retrying once after a full search.
    pub fn identify_toolset(&self, candidate: &str) -> Result<Option<Arc<Toolset>>, EngineError> {
        self.require_initialized()?;
        let _ticket = self.in_progress.enter(candidate);

        let candidate_path = Path::new(candidate);
        if candidate_path.is_absolute() && candidate_path.is_file() {
            return Ok(self.identify_by_path(candidate_path));
        }

        if let Some(found) = self.match_registered(candidate) {
            return Ok(Some(found));
        }
        self.get_toolsets()?;
        Ok(self.match_registered(candidate))
    }

    /// Analysis through the facade: runs the toolset's analysis and
    /// schedules a snapshot write for the newly cached results.
    pub fn intellisense_configuration(
        &self,
        toolset: &Toolset,
        compiler_args: &[String],
        options: &AnalysisOptions,
    ) -> IntelliSenseConfiguration {
        let configuration = toolset.get_intellisense_configuration_with(
            compiler_args,
            options,
            &self.cancellation_token,
        );
        self.registry.mark_dirty();
        if let Err(e) = self.registry.flush() {
            log::warn!("Failed to write the toolset snapshot: {}", e);
        }
        configuration
    }

    fn identify_by_path(&self, path: &Path) -> Option<Arc<Toolset>> {
        if let Some(existing) = self.registry.get(path) {
            return Some(existing);
        }

        let file_name = path.file_name()?.to_string_lossy();
        let stem = strip_executable_extension(&file_name);

        for definition in self.definitions() {
            if !lists_binary(&definition, &stem) {
                continue;
            }
            let mut cloned = definition.clone();
            definitions::apply_conditions(&mut cloned);
            if let Some(toolset) = discovery::identify_candidate(&cloned, path) {
                let registered = self.registry.register(toolset);
                if let Err(e) = self.registry.flush() {
                    log::warn!("Failed to write the toolset snapshot: {}", e);
                }
                return Some(registered);
            }
        }
        None
    }

    /// Glob-matches registered toolset names, highest version first;
    /// insertion order breaks ties (the sort is stable).
    fn match_registered(&self, pattern: &str) -> Option<Arc<Toolset>> {
        let mut entries: Vec<Arc<Toolset>> = self.registry.snapshot().values().cloned().collect();
        entries.sort_by(|a, b| commons::compare_versions(&b.version(), &a.version()));
        entries
            .into_iter()
            .find(|toolset| commons::glob_matches(pattern, &toolset.name()))
    }
}

fn lists_binary(definition: &DefinitionFile, stem: &str) -> bool {
    definition.binary_names().iter().any(|name| {
        if cfg!(target_os = "windows") {
            name.eq_ignore_ascii_case(stem)
        } else {
            name == stem
        }
    })
}

/// Blocks concurrent identical requests: the second caller waits for the
/// first to finish, then reads the memoized result from the registry.
#[derive(Default)]
struct InProgress {
    active: Mutex<HashSet<String>>,
    released: Condvar,
}

struct InProgressTicket<'a> {
    owner: &'a InProgress,
    key: String,
}

impl InProgress {
    fn enter(&self, key: &str) -> InProgressTicket<'_> {
        let mut active = self.active.lock().unwrap();
        while active.contains(key) {
            active = self.released.wait(active).unwrap();
        }
        active.insert(key.to_string());
        InProgressTicket {
            owner: self,
            key: key.to_string(),
        }
    }
}

impl Drop for InProgressTicket<'_> {
    fn drop(&mut self) {
        self.owner.active.lock().unwrap().remove(&self.key);
        self.owner.released.notify_all();
    }
}
