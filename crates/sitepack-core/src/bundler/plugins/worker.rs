//! Web worker plugin.
//!
//! `import url from "worker:./sieve.ts"` builds `sieve.ts` on its own into
//! `<out_dir>/sieve.worker.js` and replaces the import with a module that
//! default-exports the worker's public URL:
//!
//! ```ignore
//! const worker = new Worker(url, { type: "module" });
//! ```
//!
//! The worker build is a complete, separate bundle with its own settings;
//! a worker runs in a different global scope than the page.

use crate::bundler::{
    BuildOptions, BundleFormat, BundleOptions, HookResult, LoadRequest, LoadResult, Loader,
    NestedBuilder, Plugin, PluginContext, ResolveRequest, ResolveResult,
};
use futures::future::BoxFuture;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Namespace owned by [`WorkerPlugin`].
pub const WORKER_NAMESPACE: &str = "web-worker";

/// Worker plugin configuration.
#[derive(Debug, Clone)]
pub struct WorkerPluginOptions {
    /// Import prefix that marks a worker script.
    pub prefix: String,
    /// Directory worker bundles are written to, relative to the working directory.
    pub out_dir: PathBuf,
    /// URL prefix the page loads worker bundles from.
    pub public_path: String,
    /// Replaces the source extension in the output file name.
    pub suffix: String,
    /// Injected into every worker build when the file exists.
    pub shim: Option<PathBuf>,
    /// Settings for the worker builds.
    pub settings: BundleOptions,
}

impl Default for WorkerPluginOptions {
    fn default() -> Self {
        let mut loaders = rustc_hash::FxHashMap::default();
        loaders.insert(".ttf".to_string(), Loader::File);

        Self {
            prefix: "worker:".to_string(),
            out_dir: PathBuf::from("docs/js"),
            public_path: "./js".to_string(),
            suffix: ".worker.js".to_string(),
            shim: Some(PathBuf::from("shims/node-shim.js")),
            settings: BundleOptions {
                format: BundleFormat::Esm,
                minify: true,
                sourcemap: true,
                target: "es2018".to_string(),
                bundle: true,
                banner: Some("const global = globalThis;".to_string()),
                loaders,
                asset_names: "[name]".to_string(),
                ..Default::default()
            },
        }
    }
}

/// Where one worker import is built from and to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerBuildDescriptor {
    /// Worker entry point.
    pub source_path: PathBuf,
    /// Output base name, e.g. `sieve.worker.js`.
    pub output_file_name: String,
    /// Output file.
    pub output_path: PathBuf,
    /// URL the importing module receives.
    pub public_url: String,
}

impl WorkerBuildDescriptor {
    /// Describe the build for `import_path` (prefix already stripped) as
    /// imported from `importer_path`.
    pub fn new(
        import_path: &str,
        importer_path: &str,
        options: &WorkerPluginOptions,
        cwd: &Path,
    ) -> Self {
        let importer_dir = Path::new(importer_path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(cwd);
        let source_path = normalize(&importer_dir.join(import_path));

        let stem = source_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("worker");
        let output_file_name = format!("{stem}{}", options.suffix);
        let output_path = cwd.join(&options.out_dir).join(&output_file_name);
        let public_url = format!(
            "{}/{output_file_name}",
            options.public_path.trim_end_matches('/')
        );

        Self {
            source_path,
            output_file_name,
            output_path,
            public_url,
        }
    }
}

/// Lexically drop `.` and fold `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Builds `worker:` imports as separate bundles.
pub struct WorkerPlugin {
    options: WorkerPluginOptions,
    builder: Arc<dyn NestedBuilder>,
}

impl WorkerPlugin {
    pub fn new(builder: Arc<dyn NestedBuilder>) -> Self {
        Self::with_options(builder, WorkerPluginOptions::default())
    }

    pub fn with_options(builder: Arc<dyn NestedBuilder>, options: WorkerPluginOptions) -> Self {
        Self { options, builder }
    }

    pub fn options(&self) -> &WorkerPluginOptions {
        &self.options
    }

    fn build_options(&self, descriptor: &WorkerBuildDescriptor, cwd: &Path) -> BuildOptions {
        let mut settings = self.options.settings.clone();
        if let Some(shim) = &self.options.shim {
            if cwd.join(shim).is_file() {
                settings.inject.push(shim.clone());
            }
        }
        BuildOptions {
            entry_points: vec![descriptor.source_path.display().to_string()],
            outfile: descriptor.output_path.clone(),
            cwd: cwd.to_path_buf(),
            bundle: settings,
        }
    }
}

impl Plugin for WorkerPlugin {
    fn name(&self) -> &str {
        "worker"
    }

    fn namespace(&self) -> &str {
        WORKER_NAMESPACE
    }

    fn try_resolve(&self, request: &ResolveRequest, _ctx: &PluginContext) -> Option<ResolveResult> {
        let path = request.import_path.strip_prefix(self.options.prefix.as_str())?;
        tracing::debug!(import = %request.import_path, importer = %request.importer_path, "worker import");
        Some(
            ResolveResult::new(path, WORKER_NAMESPACE)
                .with_plugin_data(serde_json::json!({ "importer": request.importer_path })),
        )
    }

    fn try_load<'a>(
        &'a self,
        request: &'a LoadRequest,
        ctx: &'a PluginContext,
    ) -> BoxFuture<'a, HookResult<Option<LoadResult>>> {
        Box::pin(async move {
            let importer = request
                .plugin_data
                .as_ref()
                .and_then(|data| data.get("importer"))
                .and_then(|v| v.as_str())
                .unwrap_or(&request.importer_path);

            let descriptor = WorkerBuildDescriptor::new(&request.path, importer, &self.options, &ctx.cwd);
            let options = self.build_options(&descriptor, &ctx.cwd);

            match self.builder.build(&options).await {
                Ok(output) => {
                    tracing::debug!(
                        source = %descriptor.source_path.display(),
                        outfile = %output.outfile.display(),
                        "built worker"
                    );
                    let url = serde_json::Value::String(descriptor.public_url).to_string();
                    let dir = descriptor
                        .source_path
                        .parent()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    Ok(Some(
                        LoadResult::new(format!("export default {url};\n"), Loader::Js)
                            .with_resolve_directory(dir),
                    ))
                }
                Err(err) => {
                    tracing::error!(
                        source = %descriptor.source_path.display(),
                        error = %err,
                        "worker build failed"
                    );
                    Ok(None)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::{codes, BuildOutput, BundleError};
    use std::sync::Mutex;

    /// Records build requests; fails when `fail` is set.
    #[derive(Default)]
    struct RecordingBuilder {
        fail: bool,
        calls: Mutex<Vec<BuildOptions>>,
    }

    impl NestedBuilder for RecordingBuilder {
        fn build<'a>(&'a self, options: &'a BuildOptions) -> BoxFuture<'a, Result<BuildOutput, BundleError>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(options.clone());
                if self.fail {
                    return Err(BundleError::new(codes::BUNDLE_RESOLVE_ERROR, "boom", None));
                }
                Ok(BuildOutput {
                    outfile: options.outfile.clone(),
                    map_file: None,
                    assets: Vec::new(),
                    modules: Vec::new(),
                    bytes: 0,
                })
            })
        }
    }

    fn ctx() -> PluginContext {
        PluginContext::new(PathBuf::from("/project"))
    }

    #[test]
    fn test_resolve_requires_exact_prefix() {
        let plugin = WorkerPlugin::new(Arc::new(RecordingBuilder::default()));
        for path in ["./foo.ts", "worker", "Worker:./foo.ts", " worker:./foo.ts", "https://x/y.ts"] {
            let req = ResolveRequest::new(path, "/project/src/bar.ts", "file", "/project/src");
            assert!(plugin.try_resolve(&req, &ctx()).is_none(), "{path}");
        }
    }

    #[test]
    fn test_resolve_strips_prefix_and_keeps_importer() {
        let plugin = WorkerPlugin::new(Arc::new(RecordingBuilder::default()));
        let req = ResolveRequest::new("worker:./foo.ts", "/src/bar.ts", "file", "/src");
        let result = plugin.try_resolve(&req, &ctx()).unwrap();

        assert_eq!(result.path, "./foo.ts");
        assert_eq!(result.namespace, WORKER_NAMESPACE);
        assert_eq!(
            result.plugin_data,
            Some(serde_json::json!({ "importer": "/src/bar.ts" }))
        );
    }

    #[test]
    fn test_descriptor() {
        let options = WorkerPluginOptions::default();
        let d = WorkerBuildDescriptor::new("./foo.ts", "/src/bar.ts", &options, Path::new("/project"));
        assert_eq!(d.source_path, PathBuf::from("/src/foo.ts"));
        assert_eq!(d.output_file_name, "foo.worker.js");
        assert_eq!(d.output_path, PathBuf::from("/project/docs/js/foo.worker.js"));
        assert_eq!(d.public_url, "./js/foo.worker.js");

        let d = WorkerBuildDescriptor::new("../w/sieve.tsx", "/project/src/ts/app.ts", &options, Path::new("/project"));
        assert_eq!(d.source_path, PathBuf::from("/project/src/w/sieve.tsx"));
        assert_eq!(d.output_file_name, "sieve.worker.js");
    }

    #[tokio::test]
    async fn test_load_builds_and_exports_url() {
        let builder = Arc::new(RecordingBuilder::default());
        let plugin = WorkerPlugin::new(builder.clone());
        let resolved = plugin
            .try_resolve(
                &ResolveRequest::new("worker:./foo.ts", "/project/src/bar.ts", "file", "/project/src"),
                &ctx(),
            )
            .unwrap();
        let req = LoadRequest::from_resolved(&resolved, "/project/src/bar.ts");

        let result = plugin.try_load(&req, &ctx()).await.unwrap().unwrap();
        assert_eq!(result.contents, "export default \"./js/foo.worker.js\";\n");
        assert_eq!(result.loader, Loader::Js);

        let calls = builder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let options = &calls[0];
        assert_eq!(options.entry_points, vec!["/project/src/foo.ts".to_string()]);
        assert_eq!(options.outfile, PathBuf::from("/project/docs/js/foo.worker.js"));
        assert_eq!(options.bundle.target, "es2018");
        assert_eq!(options.bundle.banner.as_deref(), Some("const global = globalThis;"));
        assert!(options.bundle.minify && options.bundle.sourcemap && options.bundle.bundle);
        assert_eq!(options.bundle.loaders.get(".ttf"), Some(&Loader::File));
        // No shim on disk under /project.
        assert!(options.bundle.inject.is_empty());
    }

    #[tokio::test]
    async fn test_load_failure_yields_no_module() {
        let plugin = WorkerPlugin::new(Arc::new(RecordingBuilder {
            fail: true,
            ..Default::default()
        }));
        let req = LoadRequest {
            path: "./foo.ts".to_string(),
            namespace: WORKER_NAMESPACE.to_string(),
            plugin_data: Some(serde_json::json!({ "importer": "/src/bar.ts" })),
            importer_path: "/src/bar.ts".to_string(),
        };
        assert!(plugin.try_load(&req, &ctx()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shim_injected_when_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("shims")).unwrap();
        std::fs::write(dir.path().join("shims/node-shim.js"), "").unwrap();

        let plugin = WorkerPlugin::new(Arc::new(RecordingBuilder::default()));
        let d = WorkerBuildDescriptor::new("./w.ts", "", plugin.options(), dir.path());
        let options = plugin.build_options(&d, dir.path());
        assert_eq!(options.bundle.inject, vec![PathBuf::from("shims/node-shim.js")]);
        assert_eq!(d.source_path, dir.path().join("w.ts"));
    }
}
