//! Module dependency graph.
//!
//! Modules are keyed by `(namespace, path)`, so the same path string can
//! exist once on disk and once behind a plugin without colliding.

use super::plugin::{Loader, FILE_NAMESPACE};
use crate::imports::ImportSpecCore;
use rustc_hash::FxHashMap as HashMap;
use std::collections::VecDeque;

/// Unique identifier for a module in the graph.
pub type ModuleId = usize;

/// Identity of a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleKey {
    pub namespace: String,
    pub path: String,
}

impl ModuleKey {
    pub fn new(namespace: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            path: path.into(),
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::new(FILE_NAMESPACE, path)
    }

    /// Whether the module lives on disk.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.namespace == FILE_NAMESPACE
    }
}

impl std::fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_file() {
            f.write_str(&self.path)
        } else {
            write!(f, "{}:{}", self.namespace, self.path)
        }
    }
}

/// What an import specifier inside a module points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    Module(ModuleId),
    /// Left for the runtime to provide.
    External(String),
}

/// A module in the dependency graph.
#[derive(Debug, Clone)]
pub struct Module {
    pub key: ModuleKey,
    /// Loaded contents. Empty for `file` loader modules read from disk.
    pub source: String,
    pub loader: Loader,
    /// Directory the module's own imports resolved against.
    pub resolve_dir: String,
    /// Import sites found in `source`.
    pub imports: Vec<ImportSpecCore>,
    /// Module IDs this module depends on.
    pub dependencies: Vec<ModuleId>,
}

impl Module {
    pub fn new(key: ModuleKey, source: String, loader: Loader, resolve_dir: String) -> Self {
        Self {
            key,
            source,
            loader,
            resolve_dir,
            imports: Vec::new(),
            dependencies: Vec::new(),
        }
    }
}

/// The module dependency graph.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: Vec<Module>,
    key_to_id: HashMap<ModuleKey, ModuleId>,
    /// (importer, specifier) -> dependency.
    specifier_map: HashMap<(ModuleId, String), Dependency>,
}

impl ModuleGraph {
    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module to the graph, returning its ID.
    ///
    /// A module already present under the same key keeps its original ID.
    pub fn add(&mut self, module: Module) -> ModuleId {
        if let Some(&id) = self.key_to_id.get(&module.key) {
            return id;
        }
        let id = self.modules.len();
        self.key_to_id.insert(module.key.clone(), id);
        self.modules.push(module);
        id
    }

    /// Get a module by ID.
    #[must_use]
    pub fn get(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    /// Get module ID by key.
    #[must_use]
    pub fn id_of(&self, key: &ModuleKey) -> Option<ModuleId> {
        self.key_to_id.get(key).copied()
    }

    /// Number of modules in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if graph is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Record what `specifier` resolved to inside module `from`.
    pub fn link(&mut self, from: ModuleId, specifier: &str, dep: Dependency) {
        if let Dependency::Module(target) = dep {
            if let Some(module) = self.modules.get_mut(from) {
                if !module.dependencies.contains(&target) {
                    module.dependencies.push(target);
                }
            }
        }
        self.specifier_map.insert((from, specifier.to_string()), dep);
    }

    /// Look up what a specifier resolved to from a given module.
    #[must_use]
    pub fn resolve_specifier(&self, from: ModuleId, specifier: &str) -> Option<&Dependency> {
        self.specifier_map.get(&(from, specifier.to_string()))
    }

    /// Get modules in topological order (dependencies before dependents).
    ///
    /// Modules on a cycle are appended in ID order.
    #[must_use]
    pub fn toposort(&self) -> Vec<ModuleId> {
        let n = self.modules.len();
        if n == 0 {
            return Vec::new();
        }

        let mut in_degree = vec![0usize; n];
        let mut adj: Vec<Vec<ModuleId>> = vec![Vec::new(); n];

        for (id, module) in self.modules.iter().enumerate() {
            for &dep_id in &module.dependencies {
                adj[dep_id].push(id);
                in_degree[id] += 1;
            }
        }

        // Kahn's algorithm
        let mut queue: VecDeque<ModuleId> = (0..n).filter(|&id| in_degree[id] == 0).collect();
        let mut placed = vec![false; n];
        let mut order = Vec::with_capacity(n);
        while let Some(id) = queue.pop_front() {
            placed[id] = true;
            order.push(id);
            for &next in &adj[id] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        order.extend((0..n).filter(|&id| !placed[id]));
        order
    }

    /// Iterate over all modules.
    pub fn iter(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.modules.iter().enumerate()
    }
}
