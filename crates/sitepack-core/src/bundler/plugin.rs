//! Plugin system for the bundler.
//!
//! A plugin owns one namespace and contributes two interceptors:
//!
//! - a resolve interceptor (`try_resolve`) that rewrites an import path and
//!   tags it with a namespace before default file-system resolution runs;
//! - a load interceptor (`try_load`) that supplies the contents of every path
//!   tagged with the plugin's namespace.
//!
//! Plugins are registered into a [`PluginContainer`], which keeps a routing
//! table from namespace to plugin. Every import found inside a module loaded
//! from a plugin namespace is resolved by that same plugin, so resolution
//! nests without relying on convention.
//!
//! ## Example
//!
//! ```ignore
//! use sitepack_core::bundler::{HookResult, LoadRequest, LoadResult, Loader, Plugin, PluginContext,
//!     ResolveRequest, ResolveResult};
//!
//! struct EnvPlugin;
//!
//! impl Plugin for EnvPlugin {
//!     fn name(&self) -> &str { "env" }
//!     fn namespace(&self) -> &str { "env-ns" }
//!
//!     fn try_resolve(&self, req: &ResolveRequest, _ctx: &PluginContext) -> Option<ResolveResult> {
//!         (req.import_path == "env").then(|| ResolveResult::new("env", "env-ns"))
//!     }
//!
//!     fn try_load<'a>(&'a self, _req: &'a LoadRequest, _ctx: &'a PluginContext)
//!         -> BoxFuture<'a, HookResult<Option<LoadResult>>> {
//!         Box::pin(async { Ok(Some(LoadResult::new("export default {}", Loader::Js))) })
//!     }
//! }
//! ```

use crate::Error;
use futures::future::BoxFuture;
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::broadcast;

/// Namespace of ordinary files on disk. Reserved for the host.
pub const FILE_NAMESPACE: &str = "file";

/// Result type for plugin hooks.
pub type HookResult<T> = Result<T, PluginError>;

/// Error from a plugin.
#[derive(Debug, Clone)]
pub struct PluginError {
    /// Plugin name that caused the error.
    pub plugin: String,
    /// Hook that failed.
    pub hook: &'static str,
    /// Error message.
    pub message: String,
}

impl PluginError {
    pub fn new(plugin: impl Into<String>, hook: &'static str, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            hook,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for PluginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.plugin, self.hook, self.message)
    }
}

impl std::error::Error for PluginError {}

/// How the host should interpret loaded contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Loader {
    Js,
    Jsx,
    Ts,
    Tsx,
    Json,
    Text,
    /// Opaque file reference: copied to the output directory, imported as its URL.
    File,
}

impl Loader {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Js => "js",
            Self::Jsx => "jsx",
            Self::Ts => "ts",
            Self::Tsx => "tsx",
            Self::Json => "json",
            Self::Text => "text",
            Self::File => "file",
        }
    }

    /// Whether the contents are script source that may contain imports.
    #[must_use]
    pub fn is_script(&self) -> bool {
        matches!(self, Self::Js | Self::Jsx | Self::Ts | Self::Tsx)
    }

    /// Built-in loader for a file extension (without the dot).
    #[must_use]
    pub fn for_extension(ext: &str) -> Option<Self> {
        match ext {
            "js" | "mjs" | "cjs" => Some(Self::Js),
            "jsx" => Some(Self::Jsx),
            "ts" | "mts" | "cts" => Some(Self::Ts),
            "tsx" => Some(Self::Tsx),
            "json" => Some(Self::Json),
            "txt" => Some(Self::Text),
            _ => None,
        }
    }
}

impl FromStr for Loader {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "js" => Ok(Self::Js),
            "jsx" => Ok(Self::Jsx),
            "ts" => Ok(Self::Ts),
            "tsx" => Ok(Self::Tsx),
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            "file" => Ok(Self::File),
            _ => Err(Error::UnknownLoader(s.to_string())),
        }
    }
}

/// A request to resolve one import site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    /// The specifier as written in source.
    pub import_path: String,
    /// Path of the importing module (empty for entry points).
    pub importer_path: String,
    /// Namespace of the importing module.
    pub namespace: String,
    /// Directory relative imports are resolved against.
    pub resolve_directory: String,
}

impl ResolveRequest {
    pub fn new(
        import_path: impl Into<String>,
        importer_path: impl Into<String>,
        namespace: impl Into<String>,
        resolve_directory: impl Into<String>,
    ) -> Self {
        Self {
            import_path: import_path.into(),
            importer_path: importer_path.into(),
            namespace: namespace.into(),
            resolve_directory: resolve_directory.into(),
        }
    }

    /// Request for an entry point, resolved from `cwd` in the file namespace.
    pub fn entry(import_path: impl Into<String>, cwd: &Path) -> Self {
        Self::new(
            import_path,
            String::new(),
            FILE_NAMESPACE,
            cwd.display().to_string(),
        )
    }
}

/// A plugin's replacement for default resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveResult {
    /// Rewritten path.
    pub path: String,
    /// Namespace selecting the load interceptor.
    pub namespace: String,
    /// Plugin-private data handed to the load interceptor.
    pub plugin_data: Option<serde_json::Value>,
}

impl ResolveResult {
    pub fn new(path: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            namespace: namespace.into(),
            plugin_data: None,
        }
    }

    #[must_use]
    pub fn with_plugin_data(mut self, data: serde_json::Value) -> Self {
        self.plugin_data = Some(data);
        self
    }
}

/// A request to load a previously resolved path.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub path: String,
    pub namespace: String,
    pub plugin_data: Option<serde_json::Value>,
    /// Path of the module whose import produced this request.
    pub importer_path: String,
}

impl LoadRequest {
    /// Build the load request for a resolution made on behalf of `importer_path`.
    pub fn from_resolved(resolved: &ResolveResult, importer_path: impl Into<String>) -> Self {
        Self {
            path: resolved.path.clone(),
            namespace: resolved.namespace.clone(),
            plugin_data: resolved.plugin_data.clone(),
            importer_path: importer_path.into(),
        }
    }
}

/// Terminal output for a resolved path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    /// Module contents.
    pub contents: String,
    /// How to parse `contents`.
    pub loader: Loader,
    /// Directory imports inside `contents` resolve against.
    pub resolve_directory: Option<String>,
}

impl LoadResult {
    pub fn new(contents: impl Into<String>, loader: Loader) -> Self {
        Self {
            contents: contents.into(),
            loader,
            resolve_directory: None,
        }
    }

    #[must_use]
    pub fn with_resolve_directory(mut self, dir: impl Into<String>) -> Self {
        self.resolve_directory = Some(dir.into());
        self
    }
}

/// Sent to reload subscribers after a build wrote its outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadEvent {
    /// Files written by the build.
    pub paths: Vec<PathBuf>,
}

/// Build-session context passed to plugin hooks.
///
/// Holds everything a hook may need from the surrounding build, including the
/// reload channel a dev server would subscribe to. Nothing here is global:
/// each build session owns its own context.
#[derive(Debug)]
pub struct PluginContext {
    /// Working directory.
    pub cwd: PathBuf,
    /// Output directory of the current build, once known.
    pub outdir: Option<PathBuf>,
    /// Whether this is a watch/dev build.
    pub watch: bool,
    reload: Option<broadcast::Sender<ReloadEvent>>,
}

impl Default for PluginContext {
    fn default() -> Self {
        Self::new(std::env::current_dir().unwrap_or_default())
    }
}

impl PluginContext {
    /// Create a new plugin context.
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            outdir: None,
            watch: false,
            reload: None,
        }
    }

    /// Open the reload channel and return a first subscriber.
    pub fn enable_reload(&mut self, capacity: usize) -> broadcast::Receiver<ReloadEvent> {
        match &self.reload {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(capacity.max(1));
                self.reload = Some(tx);
                rx
            }
        }
    }

    /// Subscribe to reload notifications, if the channel is open.
    #[must_use]
    pub fn subscribe_reload(&self) -> Option<broadcast::Receiver<ReloadEvent>> {
        self.reload.as_ref().map(broadcast::Sender::subscribe)
    }

    /// Notify reload subscribers. Returns how many received the event.
    pub fn notify_reload(&self, paths: Vec<PathBuf>) -> usize {
        match &self.reload {
            Some(tx) => tx.send(ReloadEvent { paths }).unwrap_or(0),
            None => 0,
        }
    }
}

/// The plugin trait.
///
/// Implementations must be reentrant: the host may run several resolve and
/// load calls at once for independent import sites. Configuration is
/// read-only after construction.
pub trait Plugin: Send + Sync {
    /// Plugin name for debugging and error messages.
    fn name(&self) -> &str;

    /// The namespace this plugin owns.
    fn namespace(&self) -> &str;

    /// Resolve an import.
    ///
    /// Return `Some(result)` to take over the resolution, or `None` to let the
    /// next plugin or the default resolver handle it. When the importer lives
    /// in this plugin's namespace, `None` is an error.
    fn try_resolve(&self, _request: &ResolveRequest, _ctx: &PluginContext) -> Option<ResolveResult> {
        None
    }

    /// Load a path previously tagged with this plugin's namespace.
    ///
    /// `Ok(None)` means "no result": the module ends up missing.
    fn try_load<'a>(
        &'a self,
        request: &'a LoadRequest,
        ctx: &'a PluginContext,
    ) -> BoxFuture<'a, HookResult<Option<LoadResult>>>;
}

/// Ordered plugin list plus the namespace routing table.
pub struct PluginContainer {
    plugins: Vec<Box<dyn Plugin>>,
    routes: HashMap<String, usize>,
    ctx: PluginContext,
}

impl PluginContainer {
    /// Create a new plugin container.
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            plugins: Vec::new(),
            routes: HashMap::default(),
            ctx: PluginContext::new(cwd),
        }
    }

    /// Register a plugin and route its namespace to it.
    ///
    /// Fails if the namespace is reserved or already owned.
    pub fn add(&mut self, plugin: Box<dyn Plugin>) -> HookResult<()> {
        let namespace = plugin.namespace().to_string();
        if namespace == FILE_NAMESPACE || namespace.is_empty() {
            return Err(PluginError::new(
                plugin.name(),
                "register",
                format!("namespace '{namespace}' is reserved"),
            ));
        }
        if let Some(&owner) = self.routes.get(&namespace) {
            return Err(PluginError::new(
                plugin.name(),
                "register",
                format!(
                    "namespace '{namespace}' is already owned by plugin '{}'",
                    self.plugins[owner].name()
                ),
            ));
        }
        self.routes.insert(namespace, self.plugins.len());
        self.plugins.push(plugin);
        Ok(())
    }

    /// Set watch mode.
    pub fn set_watch(&mut self, watch: bool) {
        self.ctx.watch = watch;
    }

    /// Get the context (for modification).
    pub fn context_mut(&mut self) -> &mut PluginContext {
        &mut self.ctx
    }

    /// Get the context (read-only).
    pub fn context(&self) -> &PluginContext {
        &self.ctx
    }

    /// Check if any plugins are registered.
    pub fn has_plugins(&self) -> bool {
        !self.plugins.is_empty()
    }

    /// Whether `namespace` is routed to a plugin.
    pub fn owns(&self, namespace: &str) -> bool {
        self.routes.contains_key(namespace)
    }

    fn owner(&self, namespace: &str) -> Option<&dyn Plugin> {
        self.routes.get(namespace).map(|&i| self.plugins[i].as_ref())
    }

    /// Resolve an import through plugins.
    ///
    /// Imports found inside a plugin namespace go to that namespace's plugin
    /// only, and must be resolved by it. Imports from the file namespace are
    /// offered to every plugin in registration order; `Ok(None)` means the
    /// default resolver should handle it.
    pub fn resolve(&self, request: &ResolveRequest) -> HookResult<Option<ResolveResult>> {
        if request.namespace != FILE_NAMESPACE {
            let Some(plugin) = self.owner(&request.namespace) else {
                return Err(PluginError::new(
                    "host",
                    "resolve",
                    format!("no plugin owns namespace '{}'", request.namespace),
                ));
            };
            return match plugin.try_resolve(request, &self.ctx) {
                Some(result) => Ok(Some(result)),
                None => Err(PluginError::new(
                    plugin.name(),
                    "resolve",
                    format!(
                        "'{}' imported from '{}' was not resolved inside namespace '{}'",
                        request.import_path, request.importer_path, request.namespace
                    ),
                )),
            };
        }

        for plugin in &self.plugins {
            if let Some(result) = plugin.try_resolve(request, &self.ctx) {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    /// Load a path from a plugin namespace.
    pub async fn load(&self, request: &LoadRequest) -> HookResult<Option<LoadResult>> {
        let Some(plugin) = self.owner(&request.namespace) else {
            return Err(PluginError::new(
                "host",
                "load",
                format!("no plugin owns namespace '{}'", request.namespace),
            ));
        };
        plugin.try_load(request, &self.ctx).await
    }
}

impl Default for PluginContainer {
    fn default() -> Self {
        Self::new(std::env::current_dir().unwrap_or_default())
    }
}
