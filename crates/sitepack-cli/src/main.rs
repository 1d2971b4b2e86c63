#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use commands::PluginSet;
use miette::Result;
use sitepack_core::bundler::plugins::WorkerPluginOptions;
use sitepack_core::bundler::BundleFormat;
use sitepack_core::Config;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "sitepack")]
#[command(author, version, about = "Bundle site scripts with worker and remote-module imports", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Bundle one entry point
    Bundle {
        /// Entry point file or http(s) URL
        entry: String,

        /// Output file (if not specified, prints to stdout)
        #[arg(long, short = 'o')]
        outfile: Option<PathBuf>,

        /// Output format: esm, cjs, or iife
        #[arg(long, default_value = "esm")]
        format: String,

        /// Minify output
        #[arg(long)]
        minify: bool,

        /// Generate source maps
        #[arg(long)]
        sourcemap: bool,

        /// External packages (don't bundle, keep as imports)
        #[arg(long, value_delimiter = ',')]
        external: Vec<String>,

        /// Banner text to prepend to output
        #[arg(long)]
        banner: Option<String>,

        /// Disable `worker:` imports
        #[arg(long)]
        no_worker: bool,

        /// Disable http(s) URL imports
        #[arg(long)]
        no_remote: bool,
    },

    /// Build every entry point listed in sitepack.json
    Build {
        /// Path to config file (overrides auto-discovery)
        #[arg(long, short = 'c', value_name = "FILE")]
        config: Option<PathBuf>,

        /// Remove the destination directory before building
        #[arg(long)]
        clean: bool,

        /// Disable `worker:` imports
        #[arg(long)]
        no_worker: bool,

        /// Disable http(s) URL imports
        #[arg(long)]
        no_remote: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine working directory
    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::new(cwd.clone())
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    logging::init(config.verbosity, config.json_logs);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(cli.json),
        Some(Commands::Bundle {
            entry,
            outfile,
            format,
            minify,
            sourcemap,
            external,
            banner,
            no_worker,
            no_remote,
        }) => {
            let Ok(format) = format.parse::<BundleFormat>() else {
                eprintln!("error: invalid format '{}'. Use: esm, cjs, or iife", format);
                std::process::exit(2);
            };
            let action = commands::bundle::BundleAction {
                entry,
                cwd: config.cwd.clone(),
                outfile,
                format,
                minify,
                sourcemap,
                external,
                banner,
                plugins: PluginSet {
                    worker: (!no_worker).then(WorkerPluginOptions::default),
                    remote: (!no_remote).then(|| Duration::from_secs(15)),
                },
            };
            commands::bundle::run(action, cli.json)
        }
        Some(Commands::Build {
            config: config_file,
            clean,
            no_worker,
            no_remote,
        }) => {
            let action = commands::build::BuildAction {
                cwd: config.cwd.clone(),
                config: config_file,
                clean,
                no_worker,
                no_remote,
            };
            commands::build::run(action, cli.json)
        }
    }
}
