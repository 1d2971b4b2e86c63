//! JavaScript/TypeScript bundler.
//!
//! Bundles an entry point and everything it imports into a single output
//! file. Plugins hook into resolution and loading through namespaces.
//!
//! ## Usage
//!
//! ```ignore
//! use sitepack_core::bundler::{BuildOptions, Bundler};
//!
//! let bundler = Bundler::new(cwd.clone()).with_plugin(Box::new(RemoteModulePlugin::new(fetcher)))?;
//! let output = bundler.build(&BuildOptions::new("src/ts/main.ts", "docs/js/main.min.js", cwd)).await?;
//! ```
//!
//! ## Architecture
//!
//! 1. **Resolution** - Plugins first, then the default file resolver
//! 2. **Graph** - Breadth-first traversal; loads within a wave run concurrently
//! 3. **Emit** - Rewrite every module into a registry function
//! 4. **Write** - Output file, source map and `file`-loader assets

mod emit;
mod graph;
mod minify;
mod plugin;
pub mod plugins;
mod resolve;

pub use emit::{emit_bundle, BundleFormat, BundleOutput, EmitPlan, SourceMap};
pub use graph::{Dependency, Module, ModuleGraph, ModuleId, ModuleKey};
pub use minify::{compact_lines, minify, strip_comments};
pub use plugin::{
    HookResult, LoadRequest, LoadResult, Loader, Plugin, PluginContainer, PluginContext,
    PluginError, ReloadEvent, ResolveRequest, ResolveResult, FILE_NAMESPACE,
};
pub use resolve::{FileResolver, ResolveError, Resolved};

use crate::imports::scan_imports;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use std::path::{Path, PathBuf};

/// Stable bundler error codes.
pub mod codes {
    pub const BUNDLE_ENTRY_NOT_FOUND: &str = "BUNDLE_ENTRY_NOT_FOUND";
    pub const BUNDLE_RESOLVE_ERROR: &str = "BUNDLE_RESOLVE_ERROR";
    pub const BUNDLE_READ_ERROR: &str = "BUNDLE_READ_ERROR";
    pub const BUNDLE_PARSE_ERROR: &str = "BUNDLE_PARSE_ERROR";
    pub const BUNDLE_NO_LOADER: &str = "BUNDLE_NO_LOADER";
    pub const BUNDLE_MODULE_NOT_FOUND: &str = "BUNDLE_MODULE_NOT_FOUND";
    pub const BUNDLE_WRITE_ERROR: &str = "BUNDLE_WRITE_ERROR";
    pub const BUNDLE_INVALID_OPTIONS: &str = "BUNDLE_INVALID_OPTIONS";
    pub const BUNDLE_INTERNAL_ERROR: &str = "BUNDLE_INTERNAL_ERROR";
    pub const NAMESPACE_UNRESOLVED: &str = "NAMESPACE_UNRESOLVED";
    pub const PLUGIN_ERROR: &str = "PLUGIN_ERROR";
    pub const PLUGIN_REGISTER_ERROR: &str = "PLUGIN_REGISTER_ERROR";
}

/// Bundle options.
#[derive(Debug, Clone)]
pub struct BundleOptions {
    /// Output format.
    pub format: BundleFormat,
    /// Minify output.
    pub minify: bool,
    /// Generate source maps.
    pub sourcemap: bool,
    /// External packages (left for the runtime to provide).
    pub external: Vec<String>,
    /// Target environment, e.g. `es2018`. Recorded, not lowered to.
    pub target: String,
    /// Follow imports. When false only the entry is emitted, verbatim.
    pub bundle: bool,
    /// Text placed at the very top of the output.
    pub banner: Option<String>,
    /// Files executed before the entry, relative to the working directory.
    pub inject: Vec<PathBuf>,
    /// Extension (with dot) to loader overrides.
    pub loaders: HashMap<String, Loader>,
    /// Output name template for `file`-loader assets: `[name]`, `[hash]`.
    pub asset_names: String,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            format: BundleFormat::Esm,
            minify: false,
            sourcemap: false,
            external: Vec::new(),
            target: "es2020".to_string(),
            bundle: true,
            banner: None,
            inject: Vec::new(),
            loaders: HashMap::default(),
            asset_names: "[name]-[hash]".to_string(),
        }
    }
}

impl BundleOptions {
    /// Loader for a file on disk: overrides first, then built-ins.
    #[must_use]
    pub fn loader_for(&self, path: &Path) -> Option<Loader> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.loaders
            .get(&format!(".{ext}"))
            .copied()
            .or_else(|| Loader::for_extension(&ext))
    }
}

/// Options for a build that writes its output to disk.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Entry points. A single-file build takes exactly one.
    pub entry_points: Vec<String>,
    /// Output file.
    pub outfile: PathBuf,
    /// Working directory relative paths resolve against.
    pub cwd: PathBuf,
    /// Everything else about the bundle.
    pub bundle: BundleOptions,
}

impl BuildOptions {
    pub fn new(entry: impl Into<String>, outfile: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            entry_points: vec![entry.into()],
            outfile: outfile.into(),
            cwd: cwd.into(),
            bundle: BundleOptions::default(),
        }
    }
}

/// Bundle result.
#[derive(Debug)]
pub struct BundleResult {
    /// Bundled code.
    pub code: String,
    /// Source map (if enabled).
    pub map: Option<String>,
    /// Modules included in the bundle, in emission order.
    pub modules: Vec<String>,
    /// `file`-loader assets to write next to the output.
    pub assets: Vec<AssetOutput>,
}

/// Asset output.
#[derive(Debug, Clone)]
pub struct AssetOutput {
    /// Output file name.
    pub name: String,
    /// File contents.
    pub contents: Vec<u8>,
}

/// What a build wrote.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub outfile: PathBuf,
    pub map_file: Option<PathBuf>,
    pub assets: Vec<PathBuf>,
    pub modules: Vec<String>,
    /// Size of the written bundle in bytes.
    pub bytes: usize,
}

/// Bundler error.
#[derive(Debug, Clone)]
pub struct BundleError {
    pub code: &'static str,
    pub message: String,
    pub path: Option<String>,
}

impl BundleError {
    pub fn new(code: &'static str, message: impl Into<String>, path: Option<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path,
        }
    }
}

impl std::fmt::Display for BundleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{}: {} ({})", self.code, self.message, path)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for BundleError {}

impl From<ResolveError> for BundleError {
    fn from(err: ResolveError) -> Self {
        BundleError {
            code: codes::BUNDLE_RESOLVE_ERROR,
            message: err.to_string(),
            path: Some(err.from),
        }
    }
}

/// A build that can be started from inside another build.
///
/// The worker plugin holds one of these to compile worker scripts while the
/// outer build is suspended in its load hook.
pub trait NestedBuilder: Send + Sync {
    fn build<'a>(&'a self, options: &'a BuildOptions) -> BoxFuture<'a, Result<BuildOutput, BundleError>>;
}

/// A module waiting to be loaded.
#[derive(Debug, Clone)]
struct Scheduled {
    key: ModuleKey,
    plugin_data: Option<serde_json::Value>,
    importer: String,
}

/// Contents of a loaded module.
struct Loaded {
    source: String,
    /// Raw bytes of `file`-loader modules.
    bytes: Option<Vec<u8>>,
    loader: Loader,
    resolve_dir: String,
}

/// What an import site resolved to.
enum Target {
    Module {
        key: ModuleKey,
        plugin_data: Option<serde_json::Value>,
    },
    External(String),
}

/// A traversed module graph.
struct BuiltGraph {
    graph: ModuleGraph,
    entry: ModuleId,
    inject: Vec<ModuleId>,
    assets: HashMap<ModuleId, Vec<u8>>,
}

/// The main bundler.
pub struct Bundler {
    plugins: PluginContainer,
}

impl Bundler {
    /// Create a bundler for the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            plugins: PluginContainer::new(cwd),
        }
    }

    /// Register a plugin.
    pub fn add_plugin(&mut self, plugin: Box<dyn Plugin>) -> Result<(), BundleError> {
        self.plugins.add(plugin).map_err(|e| BundleError {
            code: codes::PLUGIN_REGISTER_ERROR,
            message: e.to_string(),
            path: None,
        })
    }

    /// Register a plugin, builder style.
    pub fn with_plugin(mut self, plugin: Box<dyn Plugin>) -> Result<Self, BundleError> {
        self.add_plugin(plugin)?;
        Ok(self)
    }

    /// Get mutable access to the plugin container.
    pub fn plugins_mut(&mut self) -> &mut PluginContainer {
        &mut self.plugins
    }

    /// The build-session context handed to plugins.
    pub fn context(&self) -> &PluginContext {
        self.plugins.context()
    }

    /// Bundle from an entry point.
    pub async fn bundle(
        &self,
        entry: &str,
        cwd: &Path,
        options: &BundleOptions,
    ) -> Result<BundleResult, BundleError> {
        self.bundle_named(entry, cwd, options, "bundle.js").await
    }

    /// Bundle one entry and write the result to `options.outfile`.
    pub async fn build(&self, options: &BuildOptions) -> Result<BuildOutput, BundleError> {
        let [entry] = options.entry_points.as_slice() else {
            return Err(BundleError::new(
                codes::BUNDLE_INVALID_OPTIONS,
                format!(
                    "A single-file build takes exactly one entry point, got {}",
                    options.entry_points.len()
                ),
                None,
            ));
        };

        let outfile = if options.outfile.is_absolute() {
            options.outfile.clone()
        } else {
            options.cwd.join(&options.outfile)
        };
        let file_name = outfile
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("bundle.js")
            .to_string();

        let result = self
            .bundle_named(entry, &options.cwd, &options.bundle, &file_name)
            .await?;

        let out_dir = outfile.parent().unwrap_or(Path::new("."));
        let write_error = |path: &Path, e: std::io::Error| BundleError {
            code: codes::BUNDLE_WRITE_ERROR,
            message: e.to_string(),
            path: Some(path.display().to_string()),
        };
        std::fs::create_dir_all(out_dir).map_err(|e| write_error(out_dir, e))?;
        std::fs::write(&outfile, &result.code).map_err(|e| write_error(&outfile, e))?;
        let mut written = vec![outfile.clone()];

        let map_file = match &result.map {
            Some(map) => {
                let map_path = out_dir.join(format!("{file_name}.map"));
                std::fs::write(&map_path, map).map_err(|e| write_error(&map_path, e))?;
                written.push(map_path.clone());
                Some(map_path)
            }
            None => None,
        };

        let mut assets = Vec::with_capacity(result.assets.len());
        for asset in &result.assets {
            let path = out_dir.join(&asset.name);
            std::fs::write(&path, &asset.contents).map_err(|e| write_error(&path, e))?;
            written.push(path.clone());
            assets.push(path);
        }

        tracing::debug!(
            outfile = %outfile.display(),
            bytes = result.code.len(),
            modules = result.modules.len(),
            "wrote bundle"
        );
        self.plugins.context().notify_reload(written);

        Ok(BuildOutput {
            outfile,
            map_file,
            assets,
            modules: result.modules,
            bytes: result.code.len(),
        })
    }

    async fn bundle_named(
        &self,
        entry: &str,
        cwd: &Path,
        options: &BundleOptions,
        file_name: &str,
    ) -> Result<BundleResult, BundleError> {
        tracing::debug!(entry, cwd = %cwd.display(), "bundling");

        if !options.bundle {
            return self.passthrough(entry, cwd, options).await;
        }

        let built = self.build_graph(entry, cwd, options).await?;

        let asset_names: HashMap<ModuleId, String> = built
            .assets
            .iter()
            .filter_map(|(&id, bytes)| {
                let module = built.graph.get(id)?;
                Some((id, asset_name(&options.asset_names, &module.key.path, bytes)))
            })
            .collect();

        let plan = EmitPlan {
            graph: &built.graph,
            entry: built.entry,
            inject: &built.inject,
            assets: &asset_names,
            file_name,
        };
        let output = emit_bundle(&plan, options)?;

        let modules = built
            .graph
            .toposort()
            .into_iter()
            .filter_map(|id| built.graph.get(id).map(|m| m.key.to_string()))
            .collect();

        let mut assets: Vec<AssetOutput> = built
            .assets
            .into_iter()
            .filter_map(|(id, contents)| {
                let name = asset_names.get(&id)?.clone();
                Some(AssetOutput { name, contents })
            })
            .collect();
        assets.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(BundleResult {
            code: output.code,
            map: output.map,
            modules,
            assets,
        })
    }

    /// `bundle = false`: the entry itself, untouched apart from the banner.
    async fn passthrough(
        &self,
        entry: &str,
        cwd: &Path,
        options: &BundleOptions,
    ) -> Result<BundleResult, BundleError> {
        let resolver = FileResolver::new().with_external(options.external.clone());
        let scheduled = match self.resolve_entry(entry, cwd, &resolver)? {
            Target::Module { key, plugin_data } => Scheduled {
                key,
                plugin_data,
                importer: String::new(),
            },
            Target::External(spec) => return Err(external_entry(&spec)),
        };
        let loaded = self.load_module(&scheduled, options).await?;

        let code = match options.banner.as_deref().filter(|b| !b.is_empty()) {
            Some(banner) => format!("{}\n{}", banner.trim_end_matches('\n'), loaded.source),
            None => loaded.source,
        };
        Ok(BundleResult {
            code,
            map: None,
            modules: vec![scheduled.key.to_string()],
            assets: Vec::new(),
        })
    }

    /// Traverse the import graph breadth-first.
    ///
    /// Each wave's loads are in flight together; results are then processed in
    /// discovery order so module IDs do not depend on network timing.
    async fn build_graph(
        &self,
        entry: &str,
        cwd: &Path,
        options: &BundleOptions,
    ) -> Result<BuiltGraph, BundleError> {
        let resolver = FileResolver::new().with_external(options.external.clone());

        let mut wave = Vec::new();
        for path in &options.inject {
            match self.resolve_entry(&path.display().to_string(), cwd, &resolver)? {
                Target::Module { key, plugin_data } => wave.push(Scheduled {
                    key,
                    plugin_data,
                    importer: String::new(),
                }),
                Target::External(spec) => return Err(external_entry(&spec)),
            }
        }
        let entry_key = match self.resolve_entry(entry, cwd, &resolver)? {
            Target::Module { key, plugin_data } => {
                wave.push(Scheduled {
                    key: key.clone(),
                    plugin_data,
                    importer: String::new(),
                });
                key
            }
            Target::External(spec) => return Err(external_entry(&spec)),
        };
        let inject_keys: Vec<ModuleKey> = wave
            .iter()
            .take(options.inject.len())
            .map(|s| s.key.clone())
            .collect();

        let mut graph = ModuleGraph::new();
        let mut assets = HashMap::default();
        let mut scheduled: HashSet<ModuleKey> = wave.iter().map(|s| s.key.clone()).collect();
        let mut links: Vec<(ModuleId, String, ModuleKey)> = Vec::new();

        while !wave.is_empty() {
            let mut in_flight: FuturesUnordered<BoxFuture<'_, (usize, Result<Loaded, BundleError>)>> =
                FuturesUnordered::new();
            for (i, item) in wave.iter().enumerate() {
                in_flight.push(Box::pin(async move { (i, self.load_module(item, options).await) }));
            }

            let mut results: Vec<Option<Result<Loaded, BundleError>>> =
                std::iter::repeat_with(|| None).take(wave.len()).collect();
            while let Some((i, result)) = in_flight.next().await {
                results[i] = Some(result);
            }
            drop(in_flight);

            let mut next = Vec::new();
            for (item, result) in wave.iter().zip(results) {
                let Some(result) = result else { continue };
                let loaded = result?;

                let mut module = Module::new(
                    item.key.clone(),
                    loaded.source,
                    loaded.loader,
                    loaded.resolve_dir,
                );
                if module.loader.is_script() {
                    module.imports = scan_imports(&module.source);
                }
                let imports = module.imports.clone();
                let id = graph.add(module);
                if let Some(bytes) = loaded.bytes {
                    assets.insert(id, bytes);
                }
                tracing::trace!(module = %item.key, imports = imports.len(), "loaded module");

                let Some(importer) = graph.get(id).cloned() else {
                    continue;
                };
                for import in &imports {
                    match self.resolve_import(&import.raw, &importer, cwd, &resolver)? {
                        Target::External(spec) => {
                            graph.link(id, &import.raw, Dependency::External(spec));
                        }
                        Target::Module { key, plugin_data } => {
                            if scheduled.insert(key.clone()) {
                                next.push(Scheduled {
                                    key: key.clone(),
                                    plugin_data,
                                    importer: importer.key.path.clone(),
                                });
                            }
                            links.push((id, import.raw.clone(), key));
                        }
                    }
                }
            }
            wave = next;
        }

        for (from, specifier, key) in links {
            let target = graph.id_of(&key).ok_or_else(|| BundleError {
                code: codes::BUNDLE_INTERNAL_ERROR,
                message: format!("Module {key} was scheduled but never loaded"),
                path: None,
            })?;
            graph.link(from, &specifier, Dependency::Module(target));
        }

        let lookup = |key: &ModuleKey| {
            graph.id_of(key).ok_or_else(|| BundleError {
                code: codes::BUNDLE_INTERNAL_ERROR,
                message: "Entry module not found after graph build".to_string(),
                path: Some(key.to_string()),
            })
        };
        let entry = lookup(&entry_key)?;
        let inject = inject_keys.iter().map(lookup).collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(modules = graph.len(), "module graph built");
        Ok(BuiltGraph {
            graph,
            entry,
            inject,
            assets,
        })
    }

    fn resolve_entry(
        &self,
        entry: &str,
        cwd: &Path,
        resolver: &FileResolver,
    ) -> Result<Target, BundleError> {
        let request = ResolveRequest::entry(entry, cwd);
        let resolved = self.plugins.resolve(&request).map_err(|e| BundleError {
            code: codes::PLUGIN_ERROR,
            message: e.to_string(),
            path: Some(entry.to_string()),
        })?;
        if let Some(result) = resolved {
            return self.plugin_target(result, cwd, cwd, resolver);
        }

        let path = Path::new(entry);
        let specifier = if path.is_absolute() || entry.starts_with('.') {
            entry.to_string()
        } else {
            format!("./{entry}")
        };
        match resolver.resolve(&specifier, cwd, cwd) {
            Ok(Resolved::Found(path)) => Ok(Target::Module {
                key: ModuleKey::file(path.display().to_string()),
                plugin_data: None,
            }),
            Ok(Resolved::External(spec)) => Ok(Target::External(spec)),
            Err(e) => Err(BundleError {
                code: codes::BUNDLE_ENTRY_NOT_FOUND,
                message: format!("Cannot find entry point: {}", e.message),
                path: Some(entry.to_string()),
            }),
        }
    }

    fn resolve_import(
        &self,
        specifier: &str,
        importer: &Module,
        cwd: &Path,
        resolver: &FileResolver,
    ) -> Result<Target, BundleError> {
        let request = ResolveRequest::new(
            specifier,
            importer.key.path.clone(),
            importer.key.namespace.clone(),
            importer.resolve_dir.clone(),
        );
        let resolved = self.plugins.resolve(&request).map_err(|e| BundleError {
            code: if importer.key.is_file() {
                codes::PLUGIN_ERROR
            } else {
                codes::NAMESPACE_UNRESOLVED
            },
            message: e.to_string(),
            path: Some(importer.key.to_string()),
        })?;

        let resolve_dir = Path::new(&importer.resolve_dir);
        if let Some(result) = resolved {
            return self.plugin_target(result, resolve_dir, cwd, resolver);
        }

        match resolver.resolve(specifier, resolve_dir, cwd)? {
            Resolved::Found(path) => Ok(Target::Module {
                key: ModuleKey::file(path.display().to_string()),
                plugin_data: None,
            }),
            Resolved::External(spec) => Ok(Target::External(spec)),
        }
    }

    /// A plugin may also hand a path back to the file namespace.
    fn plugin_target(
        &self,
        result: ResolveResult,
        resolve_dir: &Path,
        cwd: &Path,
        resolver: &FileResolver,
    ) -> Result<Target, BundleError> {
        if result.namespace != FILE_NAMESPACE {
            return Ok(Target::Module {
                key: ModuleKey::new(result.namespace, result.path),
                plugin_data: result.plugin_data,
            });
        }
        match resolver.resolve(&result.path, resolve_dir, cwd)? {
            Resolved::Found(path) => Ok(Target::Module {
                key: ModuleKey::file(path.display().to_string()),
                plugin_data: result.plugin_data,
            }),
            Resolved::External(spec) => Ok(Target::External(spec)),
        }
    }

    /// Load one module: from disk in the file namespace, otherwise through the
    /// owning plugin.
    async fn load_module(
        &self,
        item: &Scheduled,
        options: &BundleOptions,
    ) -> Result<Loaded, BundleError> {
        let key = &item.key;

        if key.is_file() {
            let path = Path::new(&key.path);
            let loader = options.loader_for(path).ok_or_else(|| BundleError {
                code: codes::BUNDLE_NO_LOADER,
                message: format!(
                    "No loader is configured for '{}' files",
                    path.extension().and_then(|e| e.to_str()).unwrap_or("")
                ),
                path: Some(key.path.clone()),
            })?;
            let read_error = |e: std::io::Error| BundleError {
                code: codes::BUNDLE_READ_ERROR,
                message: e.to_string(),
                path: Some(key.path.clone()),
            };
            let resolve_dir = path
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_default();

            if loader == Loader::File {
                let bytes = std::fs::read(path).map_err(read_error)?;
                return Ok(Loaded {
                    source: String::new(),
                    bytes: Some(bytes),
                    loader,
                    resolve_dir,
                });
            }
            let source = std::fs::read_to_string(path).map_err(read_error)?;
            return Ok(Loaded {
                source,
                bytes: None,
                loader,
                resolve_dir,
            });
        }

        let request = LoadRequest {
            path: key.path.clone(),
            namespace: key.namespace.clone(),
            plugin_data: item.plugin_data.clone(),
            importer_path: item.importer.clone(),
        };
        let result = self.plugins.load(&request).await.map_err(|e| BundleError {
            code: codes::PLUGIN_ERROR,
            message: e.to_string(),
            path: Some(key.to_string()),
        })?;
        let Some(result) = result else {
            return Err(BundleError {
                code: codes::BUNDLE_MODULE_NOT_FOUND,
                message: format!("Could not load '{}': no module was produced", key.path),
                path: Some(key.to_string()),
            });
        };

        let bytes = (result.loader == Loader::File).then(|| result.contents.as_bytes().to_vec());
        Ok(Loaded {
            source: if bytes.is_some() {
                String::new()
            } else {
                result.contents
            },
            bytes,
            loader: result.loader,
            resolve_dir: result.resolve_directory.unwrap_or_default(),
        })
    }
}

impl NestedBuilder for Bundler {
    fn build<'a>(&'a self, options: &'a BuildOptions) -> BoxFuture<'a, Result<BuildOutput, BundleError>> {
        Box::pin(Bundler::build(self, options))
    }
}

fn external_entry(spec: &str) -> BundleError {
    BundleError::new(
        codes::BUNDLE_ENTRY_NOT_FOUND,
        format!("Entry point '{spec}' is external"),
        Some(spec.to_string()),
    )
}

/// Output name for a `file`-loader asset.
fn asset_name(template: &str, path: &str, bytes: &[u8]) -> String {
    let path = Path::new(path);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("asset");
    let hash = blake3::hash(bytes).to_hex();
    let name = template
        .replace("[name]", stem)
        .replace("[hash]", &hash.as_str()[..8]);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{name}.{ext}"),
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_asset_name_templates() {
        assert_eq!(asset_name("[name]", "/a/font.ttf", b"x"), "font.ttf");
        let hashed = asset_name("[name]-[hash]", "/a/font.ttf", b"x");
        assert!(hashed.starts_with("font-"));
        assert!(hashed.ends_with(".ttf"));
        assert_eq!(hashed.len(), "font-".len() + 8 + ".ttf".len());
    }

    #[test]
    fn test_loader_overrides() {
        let mut options = BundleOptions::default();
        assert_eq!(options.loader_for(Path::new("a.ts")), Some(Loader::Ts));
        assert_eq!(options.loader_for(Path::new("a.ttf")), None);
        options.loaders.insert(".ttf".to_string(), Loader::File);
        assert_eq!(options.loader_for(Path::new("A.TTF")), Some(Loader::File));
    }

    #[tokio::test]
    async fn test_bundle_relative_imports() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/main.ts", "import { greet } from './greet';\ngreet();\n");
        write(
            dir.path(),
            "src/greet.ts",
            "import data from './data.json';\nexport function greet() {\n  console.log(data.msg);\n}\n",
        );
        write(dir.path(), "src/data.json", r#"{"msg": "hi"}"#);

        let bundler = Bundler::new(dir.path().to_path_buf());
        let result = bundler
            .bundle("src/main.ts", dir.path(), &BundleOptions::default())
            .await
            .unwrap();

        assert_eq!(result.modules.len(), 3);
        assert!(result.modules[0].ends_with("data.json"));
        assert!(result.modules[2].ends_with("main.ts"));
        assert!(result.code.contains("exports.default = {\"msg\":\"hi\"};"));
        assert!(result.code.contains("const __entry = __require("));
    }

    #[tokio::test]
    async fn test_bundle_missing_import() {
        let dir = tempdir().unwrap();
        write(dir.path(), "main.ts", "import './nope';\n");

        let bundler = Bundler::new(dir.path().to_path_buf());
        let err = bundler
            .bundle("main.ts", dir.path(), &BundleOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::BUNDLE_RESOLVE_ERROR);
    }

    #[tokio::test]
    async fn test_bundle_missing_entry() {
        let dir = tempdir().unwrap();
        let bundler = Bundler::new(dir.path().to_path_buf());
        let err = bundler
            .bundle("src/none.ts", dir.path(), &BundleOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::BUNDLE_ENTRY_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_build_writes_outputs_and_notifies() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/main.ts", "import font from './font.ttf';\nconsole.log(font);\n");
        write(dir.path(), "src/font.ttf", "not really a font");

        let mut bundler = Bundler::new(dir.path().to_path_buf());
        let mut reload = bundler.plugins_mut().context_mut().enable_reload(8);

        let mut options = BuildOptions::new("src/main.ts", "out/main.js", dir.path());
        options.bundle.sourcemap = true;
        options.bundle.asset_names = "[name]".to_string();
        options
            .bundle
            .loaders
            .insert(".ttf".to_string(), Loader::File);

        let output = bundler.build(&options).await.unwrap();
        let out_dir = dir.path().join("out");
        assert_eq!(output.outfile, out_dir.join("main.js"));
        assert_eq!(output.map_file, Some(out_dir.join("main.js.map")));
        assert_eq!(output.assets, vec![out_dir.join("font.ttf")]);

        let code = std::fs::read_to_string(out_dir.join("main.js")).unwrap();
        assert!(code.contains("exports.default = \"./font.ttf\";"));
        assert!(code.ends_with("//# sourceMappingURL=main.js.map\n"));
        assert_eq!(
            std::fs::read_to_string(out_dir.join("font.ttf")).unwrap(),
            "not really a font"
        );

        let event = reload.recv().await.unwrap();
        assert_eq!(event.paths.len(), 3);
    }

    #[tokio::test]
    async fn test_build_rejects_multiple_entries() {
        let dir = tempdir().unwrap();
        let mut options = BuildOptions::new("a.ts", "out.js", dir.path());
        options.entry_points.push("b.ts".to_string());

        let err = Bundler::new(dir.path().to_path_buf())
            .build(&options)
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::BUNDLE_INVALID_OPTIONS);
    }

    #[tokio::test]
    async fn test_passthrough_and_inject() {
        let dir = tempdir().unwrap();
        write(dir.path(), "main.ts", "import './side';\nrun();\n");
        write(dir.path(), "side.ts", "globalThis.ready = true;\n");
        write(dir.path(), "shim.js", "globalThis.process = { env: {} };\n");

        let bundler = Bundler::new(dir.path().to_path_buf());
        let options = BundleOptions {
            bundle: false,
            banner: Some("const global = globalThis;".to_string()),
            ..Default::default()
        };
        let result = bundler.bundle("main.ts", dir.path(), &options).await.unwrap();
        assert_eq!(
            result.code,
            "const global = globalThis;\nimport './side';\nrun();\n"
        );

        let options = BundleOptions {
            inject: vec![PathBuf::from("shim.js")],
            format: BundleFormat::Iife,
            ..Default::default()
        };
        let result = bundler.bundle("main.ts", dir.path(), &options).await.unwrap();
        let inject_call = result.code.find("__require(0);").unwrap();
        let entry_call = result.code.rfind("__require(").unwrap();
        assert!(inject_call <= entry_call);
        assert!(result.modules.iter().any(|m| m.ends_with("shim.js")));
    }

    #[tokio::test]
    async fn test_externals_are_not_bundled() {
        let dir = tempdir().unwrap();
        write(dir.path(), "main.ts", "import { h } from 'preact';\nimport fs from 'node:fs';\n");

        let bundler = Bundler::new(dir.path().to_path_buf());
        let options = BundleOptions {
            external: vec!["preact".to_string()],
            ..Default::default()
        };
        let result = bundler.bundle("main.ts", dir.path(), &options).await.unwrap();
        assert_eq!(result.modules.len(), 1);
        assert!(result.code.contains("import * as __ext_0 from \"node:fs\";"));
        assert!(result.code.contains("import * as __ext_1 from \"preact\";"));
    }
}
