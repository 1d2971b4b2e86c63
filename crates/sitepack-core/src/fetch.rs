//! Remote module fetching.
//!
//! Every call goes to the network: nothing is cached between requests or
//! between builds.

use futures::future::BoxFuture;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// A module fetched over HTTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteModule {
    /// Final URL after redirects.
    pub url: Url,
    /// Response body.
    pub content: String,
}

/// Error fetching a remote module.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("GET {url} returned status {status}")]
    Status { url: Url, status: u16 },

    #[error("GET {url} failed: {source}")]
    Request {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Something that can fetch a URL.
///
/// The remote module plugin only talks to this trait, so tests and embedders
/// can serve modules without a network.
pub trait RemoteFetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<RemoteModule, FetchError>>;
}

/// HTTP fetcher backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    /// Create a fetcher with default timeouts.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeouts(Duration::from_secs(5), Duration::from_secs(15))
    }

    /// Create a fetcher with explicit connect and overall timeouts.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeouts(connect: Duration, total: Duration) -> Result<Self, FetchError> {
        let http = Client::builder()
            .connect_timeout(connect)
            .timeout(total)
            .user_agent(crate::version::user_agent())
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { http })
    }

    /// Fetch `url`, following redirects.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-2xx status.
    pub async fn get(&self, url: &Url) -> Result<RemoteModule, FetchError> {
        tracing::debug!(%url, "fetching remote module");

        let request_error = |source| FetchError::Request {
            url: url.clone(),
            source,
        };

        let response = self
            .http
            .get(url.as_str())
            .send()
            .await
            .map_err(request_error)?;

        let final_url = response.url().clone();
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: final_url,
                status: status.as_u16(),
            });
        }

        let content = response.text().await.map_err(request_error)?;
        tracing::trace!(url = %final_url, bytes = content.len(), "fetched remote module");

        Ok(RemoteModule {
            url: final_url,
            content,
        })
    }
}

impl RemoteFetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<RemoteModule, FetchError>> {
        Box::pin(self.get(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::Redirect;
    use axum::routing::get;
    use axum::Router;

    async fn serve(app: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_follows_redirects() {
        let app = Router::new()
            .route("/old.ts", get(|| async { Redirect::temporary("/v2/mod.ts") }))
            .route("/v2/mod.ts", get(|| async { "export const v = 2;" }));
        let base = serve(app).await;

        let fetcher = HttpFetcher::new().unwrap();
        let module = fetcher.get(&base.join("old.ts").unwrap()).await.unwrap();
        assert_eq!(module.content, "export const v = 2;");
        assert_eq!(module.url.path(), "/v2/mod.ts");
    }

    #[tokio::test]
    async fn test_fetch_reports_status() {
        let base = serve(Router::new()).await;

        let fetcher = HttpFetcher::new().unwrap();
        let err = fetcher.get(&base.join("missing.ts").unwrap()).await.unwrap_err();
        match err {
            FetchError::Status { status, url } => {
                assert_eq!(status, 404);
                assert_eq!(url.path(), "/missing.ts");
            }
            other => panic!("expected status error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let fetcher = HttpFetcher::new().unwrap();
        let url = Url::parse(&format!("http://127.0.0.1:{port}/x.ts")).unwrap();
        assert!(matches!(
            fetcher.get(&url).await,
            Err(FetchError::Request { .. })
        ));
    }
}
