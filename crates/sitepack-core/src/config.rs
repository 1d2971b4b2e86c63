use crate::bundler::plugins::WorkerPluginOptions;
use crate::bundler::{BundleFormat, BundleOptions, Loader};
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Project file looked up in the project root.
pub const SITE_CONFIG_FILE: &str = "sitepack.json";

/// Runtime configuration for the sitepack CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }
}

/// Project configuration, read from `sitepack.json`.
///
/// Every field is optional; paths are relative to the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub src_dir: PathBuf,
    /// Output root. `sitepack build --clean` removes it first.
    pub dest_dir: PathBuf,
    /// Entry glob patterns. `.d.ts` files never match.
    pub entries: Vec<String>,
    /// Where bundles are written.
    pub js_dir: PathBuf,
    /// Output name template; `[name]` is the entry's file stem.
    pub entry_names: String,
    pub asset_names: String,
    pub target: String,
    pub format: BundleFormat,
    pub minify: bool,
    pub sourcemap: bool,
    pub external: Vec<String>,
    /// Extension (with dot) to loader name.
    pub loaders: BTreeMap<String, String>,
    pub plugins: PluginsConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        let loaders = [(".ttf", "file"), (".wasm", "file")]
            .into_iter()
            .map(|(ext, loader)| (ext.to_string(), loader.to_string()))
            .collect();
        Self {
            src_dir: PathBuf::from("src"),
            dest_dir: PathBuf::from("docs"),
            entries: vec!["src/ts/*.ts".to_string(), "src/ts/scripts/*".to_string()],
            js_dir: PathBuf::from("docs/js"),
            entry_names: "[name].min".to_string(),
            asset_names: "[name]".to_string(),
            target: "es2018".to_string(),
            format: BundleFormat::Esm,
            minify: true,
            sourcemap: true,
            external: Vec::new(),
            loaders,
            plugins: PluginsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    pub worker: WorkerConfig,
    pub remote: RemoteConfig,
}

/// `plugins.worker` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub prefix: String,
    pub out_dir: Option<PathBuf>,
    pub public_path: String,
    pub suffix: String,
    pub shim: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let defaults = WorkerPluginOptions::default();
        Self {
            enabled: true,
            prefix: defaults.prefix,
            out_dir: None,
            public_path: defaults.public_path,
            suffix: defaults.suffix,
            shim: defaults.shim,
        }
    }
}

/// `plugins.remote` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub enabled: bool,
    /// Overall request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 15,
        }
    }
}

impl SiteConfig {
    /// Read a config file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read `sitepack.json` from `root`, or fall back to defaults.
    pub fn discover(root: &Path) -> Result<Self, Error> {
        let path = root.join(SITE_CONFIG_FILE);
        if path.is_file() {
            tracing::debug!(path = %path.display(), "using project config");
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Expand entry globs under `root`. Sorted, deduplicated, files only.
    pub fn entry_points(&self, root: &Path) -> Result<Vec<PathBuf>, Error> {
        let mut found = Vec::new();
        for pattern in &self.entries {
            let full = root.join(pattern);
            let full = full.to_string_lossy();
            let paths = glob::glob(&full).map_err(|e| Error::EntryPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            for path in paths.filter_map(Result::ok) {
                let is_decl = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".d.ts"));
                if path.is_file() && !is_decl {
                    found.push(path);
                }
            }
        }
        found.sort();
        found.dedup();
        Ok(found)
    }

    /// Output file for an entry point.
    #[must_use]
    pub fn output_path(&self, root: &Path, entry: &Path) -> PathBuf {
        let stem = entry
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("bundle");
        let name = self.entry_names.replace("[name]", stem);
        root.join(&self.js_dir).join(format!("{name}.js"))
    }

    /// Bundle options for the main entries.
    pub fn bundle_options(&self) -> Result<BundleOptions, Error> {
        let loaders = self
            .loaders
            .iter()
            .map(|(ext, name)| {
                let ext = if ext.starts_with('.') {
                    ext.clone()
                } else {
                    format!(".{ext}")
                };
                Ok((ext, name.parse::<Loader>()?))
            })
            .collect::<Result<_, Error>>()?;

        Ok(BundleOptions {
            format: self.format,
            minify: self.minify,
            sourcemap: self.sourcemap,
            external: self.external.clone(),
            target: self.target.clone(),
            asset_names: self.asset_names.clone(),
            loaders,
            ..Default::default()
        })
    }

    /// Worker plugin options. Worker bundles land in `js_dir` unless the
    /// worker section names its own directory.
    #[must_use]
    pub fn worker_options(&self) -> WorkerPluginOptions {
        let worker = &self.plugins.worker;
        WorkerPluginOptions {
            prefix: worker.prefix.clone(),
            out_dir: worker.out_dir.clone().unwrap_or_else(|| self.js_dir.clone()),
            public_path: worker.public_path.clone(),
            suffix: worker.suffix.clone(),
            shim: worker.shim.clone(),
            ..Default::default()
        }
    }
}
