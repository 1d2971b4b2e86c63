//! Built-in bundler plugins.
//!
//! - [`WorkerPlugin`]: `worker:` imports become separately built worker scripts
//! - [`RemoteModulePlugin`]: `http(s)://` imports are fetched and bundled

mod remote;
mod worker;

pub use remote::{RemoteModulePlugin, REMOTE_NAMESPACE};
pub use worker::{WorkerBuildDescriptor, WorkerPlugin, WorkerPluginOptions, WORKER_NAMESPACE};
