#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod bundler;
pub mod config;
pub mod error;
pub mod fetch;
pub mod imports;
pub mod version;

pub use bundler::{
    BuildOptions, BuildOutput, BundleError, BundleFormat, BundleOptions, BundleResult, Bundler,
    NestedBuilder,
};
pub use config::{Config, SiteConfig};
pub use error::Error;
pub use fetch::{FetchError, HttpFetcher, RemoteFetcher, RemoteModule};
pub use imports::{scan_imports, ImportSpecCore};
pub use version::VERSION;
