//! `sitepack build` command implementation.
//!
//! Reads `sitepack.json`, bundles every entry point into the configured
//! script directory and reports raw and gzip sizes per output.

use super::{make_bundler, print_json, ErrorJson, PluginSet};
use flate2::write::GzEncoder;
use flate2::Compression;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use sitepack_core::bundler::BuildOptions;
use sitepack_core::version::SCHEMA_VERSION;
use sitepack_core::SiteConfig;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Build command action.
#[derive(Debug, Clone)]
pub struct BuildAction {
    pub cwd: PathBuf,
    /// Config file; `<cwd>/sitepack.json` when absent.
    pub config: Option<PathBuf>,
    /// Remove the destination directory first.
    pub clean: bool,
    pub no_worker: bool,
    pub no_remote: bool,
}

#[derive(Serialize)]
struct BuildResultJson {
    schema_version: u32,
    ok: bool,
    cwd: String,
    outputs: Vec<OutputJson>,
    duration_ms: u64,
    notes: Vec<String>,
}

#[derive(Serialize)]
struct OutputJson {
    entry: String,
    outfile: String,
    ok: bool,
    size_bytes: usize,
    gzip_bytes: usize,
    modules: usize,
    assets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorJson>,
}

/// Run the build command.
pub fn run(action: BuildAction, json: bool) -> Result<()> {
    let start = Instant::now();
    let span = tracing::info_span!("build", cmd = "build", cwd = %action.cwd.display());
    let _guard = span.enter();

    let config = match &action.config {
        Some(path) => SiteConfig::load(&action.cwd.join(path)),
        None => SiteConfig::discover(&action.cwd),
    }
    .into_diagnostic()?;

    let mut notes = Vec::new();
    if action.clean {
        let dest = action.cwd.join(&config.dest_dir);
        if dest.is_dir() {
            std::fs::remove_dir_all(&dest).into_diagnostic()?;
            notes.push(format!("removed {}", config.dest_dir.display()));
        }
    }

    let entries = config.entry_points(&action.cwd).into_diagnostic()?;
    if entries.is_empty() {
        notes.push(format!("no entry points matched {}", config.entries.join(", ")));
    }

    let plugins = PluginSet {
        worker: (config.plugins.worker.enabled && !action.no_worker).then(|| config.worker_options()),
        remote: (config.plugins.remote.enabled && !action.no_remote)
            .then(|| Duration::from_secs(config.plugins.remote.timeout_secs)),
    };
    let bundler = make_bundler(&action.cwd, &plugins)?;
    let bundle_options = config.bundle_options().into_diagnostic()?;

    let builds: Vec<BuildOptions> = entries
        .iter()
        .map(|entry| BuildOptions {
            entry_points: vec![entry.display().to_string()],
            outfile: config.output_path(&action.cwd, entry),
            cwd: action.cwd.clone(),
            bundle: bundle_options.clone(),
        })
        .collect();

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let results = runtime.block_on(futures::future::join_all(
        builds.iter().map(|options| bundler.build(options)),
    ));

    let mut outputs = Vec::with_capacity(results.len());
    for (options, result) in builds.iter().zip(results) {
        let entry = relative(&action.cwd, Path::new(&options.entry_points[0]));
        let outfile = relative(&action.cwd, &options.outfile);
        outputs.push(match result {
            Ok(out) => {
                let code = std::fs::read(&out.outfile).into_diagnostic()?;
                OutputJson {
                    entry,
                    outfile,
                    ok: true,
                    size_bytes: out.bytes,
                    gzip_bytes: gzip_size(&code)?,
                    modules: out.modules.len(),
                    assets: out.assets.iter().map(|p| relative(&action.cwd, p)).collect(),
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(entry = %entry, error = %e, "build failed");
                OutputJson {
                    entry,
                    outfile,
                    ok: false,
                    size_bytes: 0,
                    gzip_bytes: 0,
                    modules: 0,
                    assets: Vec::new(),
                    error: Some(ErrorJson::from(&e)),
                }
            }
        });
    }

    let ok = outputs.iter().all(|o| o.ok);
    let duration_ms = start.elapsed().as_millis() as u64;

    if json {
        print_json(&BuildResultJson {
            schema_version: SCHEMA_VERSION,
            ok,
            cwd: action.cwd.display().to_string(),
            outputs,
            duration_ms,
            notes,
        })?;
    } else {
        for note in &notes {
            println!("  note: {note}");
        }
        for output in &outputs {
            match &output.error {
                None => println!(
                    "  {} -> {} ({:.1}KB, {:.1}KB gzip)",
                    output.entry,
                    output.outfile,
                    output.size_bytes as f64 / 1024.0,
                    output.gzip_bytes as f64 / 1024.0
                ),
                Some(error) => eprintln!("  {} failed: {}: {}", output.entry, error.code, error.message),
            }
        }
        println!("  built {} file(s) in {duration_ms}ms", outputs.len());
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn gzip_size(bytes: &[u8]) -> Result<usize> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).into_diagnostic()?;
    Ok(encoder.finish().into_diagnostic()?.len())
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}
