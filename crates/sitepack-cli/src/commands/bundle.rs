//! `sitepack bundle` command implementation.
//!
//! Bundles one entry point. With `-o` the bundle, its source map and assets
//! are written to disk; otherwise the code is printed to stdout.

use super::{make_bundler, print_json, ErrorJson, PluginSet};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use sitepack_core::bundler::{BuildOptions, BundleFormat, BundleOptions};
use sitepack_core::version::SCHEMA_VERSION;
use std::path::PathBuf;
use std::time::Instant;

/// Bundle command action.
#[derive(Debug, Clone)]
pub struct BundleAction {
    /// Entry point: a file or an `http(s)://` URL.
    pub entry: String,
    /// Working directory.
    pub cwd: PathBuf,
    /// Output file (if None, prints to stdout).
    pub outfile: Option<PathBuf>,
    pub format: BundleFormat,
    pub minify: bool,
    pub sourcemap: bool,
    /// External packages (don't bundle).
    pub external: Vec<String>,
    /// Banner text to prepend.
    pub banner: Option<String>,
    pub plugins: PluginSet,
}

/// JSON output for bundle command.
#[derive(Serialize)]
struct BundleResultJson {
    schema_version: u32,
    ok: bool,
    entry: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    outfile: Option<String>,
    format: &'static str,
    modules: Vec<String>,
    assets: Vec<String>,
    size_bytes: usize,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorJson>,
}

/// Run the bundle command.
pub fn run(action: BundleAction, json: bool) -> Result<()> {
    let start = Instant::now();
    let span = tracing::info_span!("bundle", cmd = "bundle", cwd = %action.cwd.display());
    let _guard = span.enter();

    let bundler = make_bundler(&action.cwd, &action.plugins)?;
    let options = BundleOptions {
        format: action.format,
        minify: action.minify,
        sourcemap: action.sourcemap,
        external: action.external.clone(),
        banner: action.banner.clone(),
        ..Default::default()
    };

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;

    // (modules, assets, size, code when printing to stdout)
    let result = runtime.block_on(async {
        match &action.outfile {
            Some(outfile) => {
                let build = BuildOptions {
                    entry_points: vec![action.entry.clone()],
                    outfile: outfile.clone(),
                    cwd: action.cwd.clone(),
                    bundle: options,
                };
                bundler.build(&build).await.map(|out| {
                    let assets = out.assets.iter().map(|p| p.display().to_string()).collect();
                    (out.modules, assets, out.bytes, None)
                })
            }
            None => bundler
                .bundle(&action.entry, &action.cwd, &options)
                .await
                .map(|res| {
                    let assets = res.assets.iter().map(|a| a.name.clone()).collect();
                    let size = res.code.len();
                    (res.modules, assets, size, Some(res.code))
                }),
        }
    });

    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok((modules, assets, size_bytes, code)) => {
            if json {
                print_json(&BundleResultJson {
                    schema_version: SCHEMA_VERSION,
                    ok: true,
                    entry: action.entry.clone(),
                    outfile: action.outfile.as_ref().map(|p| p.display().to_string()),
                    format: action.format.as_str(),
                    modules,
                    assets,
                    size_bytes,
                    duration_ms,
                    error: None,
                })?;
            } else if let Some(code) = code {
                print!("{code}");
            } else if let Some(outfile) = &action.outfile {
                println!(
                    "  {} -> {} ({} modules, {:.1}KB, {}ms)",
                    action.entry,
                    outfile.display(),
                    modules.len(),
                    size_bytes as f64 / 1024.0,
                    duration_ms
                );
                for asset in &assets {
                    println!("    + {asset}");
                }
            }
            Ok(())
        }
        Err(e) => {
            if json {
                print_json(&BundleResultJson {
                    schema_version: SCHEMA_VERSION,
                    ok: false,
                    entry: action.entry.clone(),
                    outfile: action.outfile.as_ref().map(|p| p.display().to_string()),
                    format: action.format.as_str(),
                    modules: Vec::new(),
                    assets: Vec::new(),
                    size_bytes: 0,
                    duration_ms,
                    error: Some(ErrorJson::from(&e)),
                })?;
            } else {
                eprintln!("error: {e}");
            }
            std::process::exit(1);
        }
    }
}
