//! Remote module plugin.
//!
//! Imports written as absolute `http://` or `https://` URLs are fetched and
//! bundled like local modules. Everything imported from inside a remote
//! module stays in the `http-url` namespace and is resolved against the URL
//! the module was actually served from.

use crate::bundler::{
    HookResult, LoadRequest, LoadResult, Loader, Plugin, PluginContext, PluginError,
    ResolveRequest, ResolveResult,
};
use crate::fetch::RemoteFetcher;
use futures::future::BoxFuture;
use std::sync::Arc;
use url::Url;

/// Namespace owned by [`RemoteModulePlugin`].
pub const REMOTE_NAMESPACE: &str = "http-url";

/// Fetches `http(s)://` imports.
pub struct RemoteModulePlugin {
    fetcher: Arc<dyn RemoteFetcher>,
}

impl RemoteModulePlugin {
    pub fn new(fetcher: Arc<dyn RemoteFetcher>) -> Self {
        Self { fetcher }
    }
}

/// Only lowercase schemes are intercepted.
fn is_http_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// A remote module's resolve directory is `/` followed by its URL.
fn directory_url(resolve_dir: &str) -> Option<Url> {
    Url::parse(resolve_dir.strip_prefix('/').unwrap_or(resolve_dir)).ok()
}

impl Plugin for RemoteModulePlugin {
    fn name(&self) -> &str {
        "remote"
    }

    fn namespace(&self) -> &str {
        REMOTE_NAMESPACE
    }

    fn try_resolve(&self, request: &ResolveRequest, _ctx: &PluginContext) -> Option<ResolveResult> {
        let url = if request.namespace == REMOTE_NAMESPACE {
            let base = directory_url(&request.resolve_directory)
                .or_else(|| Url::parse(&request.importer_path).ok())?;
            base.join(&request.import_path).ok()?
        } else if is_http_url(&request.import_path) {
            directory_url(&request.resolve_directory)
                .and_then(|base| base.join(&request.import_path).ok())
                .or_else(|| Url::parse(&request.import_path).ok())?
        } else {
            return None;
        };
        Some(ResolveResult::new(url.as_str(), REMOTE_NAMESPACE))
    }

    fn try_load<'a>(
        &'a self,
        request: &'a LoadRequest,
        _ctx: &'a PluginContext,
    ) -> BoxFuture<'a, HookResult<Option<LoadResult>>> {
        Box::pin(async move {
            let url = Url::parse(&request.path)
                .map_err(|e| PluginError::new(self.name(), "load", format!("{}: {e}", request.path)))?;
            let module = self
                .fetcher
                .fetch(&url)
                .await
                .map_err(|e| PluginError::new(self.name(), "load", e.to_string()))?;

            tracing::debug!(url = %url, served_from = %module.url, "loaded remote module");
            Ok(Some(
                LoadResult::new(module.content, Loader::Ts)
                    .with_resolve_directory(format!("/{}", module.url)),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchError, RemoteModule};
    use std::collections::HashMap;
    use std::path::PathBuf;

    /// Serves a fixed set of URLs; `(requested, served_from, body)`.
    struct StaticFetcher {
        routes: HashMap<String, (String, String)>,
    }

    impl StaticFetcher {
        fn new(routes: &[(&str, &str, &str)]) -> Self {
            Self {
                routes: routes
                    .iter()
                    .map(|(req, served, body)| (req.to_string(), (served.to_string(), body.to_string())))
                    .collect(),
            }
        }
    }

    impl RemoteFetcher for StaticFetcher {
        fn fetch<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<RemoteModule, FetchError>> {
            Box::pin(async move {
                match self.routes.get(url.as_str()) {
                    Some((served, body)) => Ok(RemoteModule {
                        url: Url::parse(served).unwrap(),
                        content: body.clone(),
                    }),
                    None => Err(FetchError::Status {
                        url: url.clone(),
                        status: 404,
                    }),
                }
            })
        }
    }

    fn plugin(routes: &[(&str, &str, &str)]) -> RemoteModulePlugin {
        RemoteModulePlugin::new(Arc::new(StaticFetcher::new(routes)))
    }

    fn ctx() -> PluginContext {
        PluginContext::new(PathBuf::from("/project"))
    }

    #[test]
    fn test_local_paths_fall_through() {
        let p = plugin(&[]);
        for path in [
            "./util",
            "../a.ts",
            "preact",
            "/abs/a.ts",
            "worker:./w.ts",
            "ftp://x/y",
            "HTTP://cdn.example/a.ts",
            "Https://cdn.example/a.ts",
        ] {
            let req = ResolveRequest::new(path, "/project/src/a.ts", "file", "/project/src");
            assert!(p.try_resolve(&req, &ctx()).is_none(), "{path}");
        }
    }

    #[test]
    fn test_absolute_url_is_normalized() {
        let p = plugin(&[]);
        let req = ResolveRequest::new(
            "https://cdn.example/lib/../pkg.ts",
            "/project/src/a.ts",
            "file",
            "/project/src",
        );
        let result = p.try_resolve(&req, &ctx()).unwrap();
        assert_eq!(result.path, "https://cdn.example/pkg.ts");
        assert_eq!(result.namespace, REMOTE_NAMESPACE);
    }

    #[test]
    fn test_relative_import_inside_remote_module() {
        let p = plugin(&[]);
        let req = ResolveRequest::new(
            "./util",
            "https://cdn.example/pkg.ts",
            REMOTE_NAMESPACE,
            "/https://cdn.example/pkg.ts",
        );
        assert_eq!(
            p.try_resolve(&req, &ctx()).unwrap().path,
            "https://cdn.example/util"
        );

        // Without a resolve directory the importer URL is the base.
        let req = ResolveRequest::new("../x/y.ts", "https://cdn.example/a/b/pkg.ts", REMOTE_NAMESPACE, "");
        assert_eq!(
            p.try_resolve(&req, &ctx()).unwrap().path,
            "https://cdn.example/a/x/y.ts"
        );
    }

    #[tokio::test]
    async fn test_load_uses_final_url_as_resolve_directory() {
        let p = plugin(&[(
            "https://cdn.example/pkg.ts",
            "https://cdn.example/v2/pkg.ts",
            "export * from './util';",
        )]);
        let req = LoadRequest::from_resolved(
            &ResolveResult::new("https://cdn.example/pkg.ts", REMOTE_NAMESPACE),
            "/project/src/a.ts",
        );
        let result = p.try_load(&req, &ctx()).await.unwrap().unwrap();
        assert_eq!(result.contents, "export * from './util';");
        assert_eq!(result.loader, Loader::Ts);
        assert_eq!(
            result.resolve_directory.as_deref(),
            Some("/https://cdn.example/v2/pkg.ts")
        );

        let nested = ResolveRequest::new(
            "./util",
            "https://cdn.example/pkg.ts",
            REMOTE_NAMESPACE,
            result.resolve_directory.unwrap(),
        );
        assert_eq!(
            p.try_resolve(&nested, &ctx()).unwrap().path,
            "https://cdn.example/v2/util"
        );
    }

    #[tokio::test]
    async fn test_load_failure_propagates() {
        let p = plugin(&[]);
        let req = LoadRequest::from_resolved(
            &ResolveResult::new("https://cdn.example/missing.ts", REMOTE_NAMESPACE),
            "",
        );
        let err = p.try_load(&req, &ctx()).await.unwrap_err();
        assert_eq!(err.plugin, "remote");
        assert_eq!(err.hook, "load");
        assert!(err.message.contains("404"));
    }
}
