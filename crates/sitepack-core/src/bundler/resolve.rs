//! Default file-system resolution for the `file` namespace.
//!
//! Runs only after every plugin declined an import.
//!
//! ## Specifier Types
//!
//! - Relative: `./utils`, `../lib/foo`
//! - Absolute: `/abs/path/to/module`
//! - Bare: `lodash`, `@scope/pkg`, `preact/hooks`
//! - Builtin: `node:fs` (always external)

use std::path::{Path, PathBuf};

const EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "json"];
const INDEX_FILES: &[&str] = &["index.ts", "index.tsx", "index.js", "index.jsx", "index.mjs"];

/// Outcome of resolving a specifier in the file namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// A file on disk.
    Found(PathBuf),
    /// Left for the runtime (`node:*` builtins and configured externals).
    External(String),
}

/// Error during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveError {
    pub specifier: String,
    pub from: String,
    pub message: String,
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cannot resolve '{}' from '{}': {}",
            self.specifier, self.from, self.message
        )
    }
}

impl std::error::Error for ResolveError {}

impl ResolveError {
    fn new(specifier: &str, from: &Path, message: impl Into<String>) -> Self {
        Self {
            specifier: specifier.to_string(),
            from: from.display().to_string(),
            message: message.into(),
        }
    }
}

/// Import resolver for files on disk.
#[derive(Debug, Default, Clone)]
pub struct FileResolver {
    external: Vec<String>,
}

impl FileResolver {
    /// Create a new resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat these package names (and their subpaths) as external.
    #[must_use]
    pub fn with_external(mut self, external: Vec<String>) -> Self {
        self.external = external;
        self
    }

    /// Resolve `specifier` as written in a module whose imports resolve
    /// against `resolve_dir`. `cwd` bounds the `node_modules` walk.
    pub fn resolve(
        &self,
        specifier: &str,
        resolve_dir: &Path,
        cwd: &Path,
    ) -> Result<Resolved, ResolveError> {
        if specifier.starts_with("node:") {
            return Ok(Resolved::External(specifier.to_string()));
        }

        if specifier.starts_with("./") || specifier.starts_with("../") || specifier == "." {
            let target = resolve_dir.join(specifier);
            return self.resolve_file_or_directory(&target, specifier, resolve_dir);
        }

        if specifier.starts_with('/') {
            return self.resolve_file_or_directory(Path::new(specifier), specifier, resolve_dir);
        }

        let (pkg_name, _) = parse_bare_specifier(specifier);
        if self.external.iter().any(|e| e == pkg_name || e == specifier) {
            return Ok(Resolved::External(specifier.to_string()));
        }

        self.resolve_bare(specifier, resolve_dir, cwd)
    }

    /// Walk up from `resolve_dir` looking for `node_modules/<pkg>`.
    fn resolve_bare(
        &self,
        specifier: &str,
        resolve_dir: &Path,
        cwd: &Path,
    ) -> Result<Resolved, ResolveError> {
        let (pkg_name, subpath) = parse_bare_specifier(specifier);

        let mut current = Some(resolve_dir);
        while let Some(dir) = current {
            let pkg_dir = dir.join("node_modules").join(pkg_name);

            if pkg_dir.is_dir() {
                let pkg_json = pkg_dir.join("package.json");
                if pkg_json.is_file() {
                    if let Some(entry) = resolve_package_entry(&pkg_dir, &pkg_json, subpath) {
                        return canonical(&entry, specifier, resolve_dir);
                    }
                }

                let target = match subpath {
                    Some(sub) => pkg_dir.join(sub),
                    None => pkg_dir.clone(),
                };
                if let Ok(found) = self.resolve_file_or_directory(&target, specifier, resolve_dir)
                {
                    return Ok(found);
                }
            }

            if dir == cwd {
                break;
            }
            current = dir.parent();
        }

        Err(ResolveError::new(
            specifier,
            resolve_dir,
            format!("Cannot find package '{pkg_name}' in node_modules"),
        ))
    }

    /// Resolve a path that might be a file, an extensionless file, or a
    /// directory with an index file.
    fn resolve_file_or_directory(
        &self,
        target: &Path,
        specifier: &str,
        from: &Path,
    ) -> Result<Resolved, ResolveError> {
        if target.is_file() {
            return canonical(target, specifier, from);
        }

        for ext in EXTENSIONS {
            let with_ext = PathBuf::from(format!("{}.{ext}", target.display()));
            if with_ext.is_file() {
                return canonical(&with_ext, specifier, from);
            }
        }

        if target.is_dir() {
            for index in INDEX_FILES {
                let index_path = target.join(index);
                if index_path.is_file() {
                    return canonical(&index_path, specifier, from);
                }
            }
        }

        Err(ResolveError::new(specifier, from, "File not found"))
    }
}

fn canonical(path: &Path, specifier: &str, from: &Path) -> Result<Resolved, ResolveError> {
    dunce::canonicalize(path)
        .map(Resolved::Found)
        .map_err(|e| ResolveError::new(specifier, from, e.to_string()))
}

/// Split a bare specifier into package name and subpath.
fn parse_bare_specifier(specifier: &str) -> (&str, Option<&str>) {
    let split_at = if specifier.starts_with('@') {
        specifier.match_indices('/').nth(1).map(|(i, _)| i)
    } else {
        specifier.find('/')
    };

    match split_at {
        Some(i) => (&specifier[..i], Some(&specifier[i + 1..])),
        None => (specifier, None),
    }
}

/// Entry point from `package.json`: `exports`, then `module`, then `main`.
fn resolve_package_entry(pkg_dir: &Path, pkg_json: &Path, subpath: Option<&str>) -> Option<PathBuf> {
    let content = std::fs::read_to_string(pkg_json).ok()?;
    let json: serde_json::Value = serde_json::from_str(&content).ok()?;

    let export_key = subpath.map_or_else(|| ".".to_string(), |sub| format!("./{sub}"));
    if let Some(entry) = json
        .get("exports")
        .and_then(|exports| resolve_exports(exports, &export_key))
    {
        let target = pkg_dir.join(entry);
        if target.is_file() {
            return Some(target);
        }
    }

    if subpath.is_some() {
        return None;
    }

    ["module", "main"]
        .iter()
        .filter_map(|field| json.get(*field).and_then(|v| v.as_str()))
        .map(|entry| pkg_dir.join(entry))
        .find(|target| target.is_file())
}

/// Resolve the `exports` field (string, subpath map, or root conditions).
fn resolve_exports(exports: &serde_json::Value, subpath: &str) -> Option<String> {
    match exports {
        serde_json::Value::String(s) => (subpath == ".").then(|| s.clone()),
        serde_json::Value::Object(map) => {
            if let Some(value) = map.get(subpath) {
                return resolve_export_value(value);
            }
            if subpath == "." && !map.keys().any(|k| k.starts_with('.')) {
                return resolve_export_value(exports);
            }
            None
        }
        _ => None,
    }
}

/// Pick a condition: `browser` > `import` > `default` > `require`.
fn resolve_export_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => ["browser", "import", "default", "require"]
            .iter()
            .find_map(|cond| map.get(*cond))
            .and_then(resolve_export_value),
        _ => None,
    }
}
