pub mod build;
pub mod bundle;
pub mod version;

use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use sitepack_core::bundler::plugins::{RemoteModulePlugin, WorkerPlugin, WorkerPluginOptions};
use sitepack_core::bundler::{BundleError, Bundler};
use sitepack_core::fetch::{HttpFetcher, RemoteFetcher};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Which plugins a command registers.
#[derive(Debug, Clone)]
pub struct PluginSet {
    /// `None` disables the worker plugin.
    pub worker: Option<WorkerPluginOptions>,
    /// `None` disables the remote plugin; otherwise the request timeout.
    pub remote: Option<Duration>,
}

/// Create a bundler with the requested plugins.
///
/// Worker builds get their own bundler. It shares the remote fetcher, so a
/// worker may import URLs too, but it never nests further workers.
pub fn make_bundler(cwd: &Path, plugins: &PluginSet) -> Result<Bundler> {
    let fetcher: Option<Arc<dyn RemoteFetcher>> = match plugins.remote {
        Some(timeout) => Some(Arc::new(
            HttpFetcher::with_timeouts(Duration::from_secs(5).min(timeout), timeout)
                .into_diagnostic()?,
        )),
        None => None,
    };

    let mut bundler = Bundler::new(cwd.to_path_buf());
    if let Some(options) = &plugins.worker {
        let mut nested = Bundler::new(cwd.to_path_buf());
        if let Some(fetcher) = &fetcher {
            nested
                .add_plugin(Box::new(RemoteModulePlugin::new(fetcher.clone())))
                .into_diagnostic()?;
        }
        bundler
            .add_plugin(Box::new(WorkerPlugin::with_options(
                Arc::new(nested),
                options.clone(),
            )))
            .into_diagnostic()?;
    }
    if let Some(fetcher) = fetcher {
        bundler
            .add_plugin(Box::new(RemoteModulePlugin::new(fetcher)))
            .into_diagnostic()?;
    }
    Ok(bundler)
}

/// Bundler error as it appears in `--json` output.
#[derive(Debug, Serialize)]
pub struct ErrorJson {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl From<&BundleError> for ErrorJson {
    fn from(e: &BundleError) -> Self {
        Self {
            code: e.code.to_string(),
            message: e.message.clone(),
            path: e.path.clone(),
        }
    }
}

/// Print one JSON value on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value).into_diagnostic()?);
    Ok(())
}
