//! HTTP client for the upstream gem registry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{AppError, AppResult};

/// Fetches files from an upstream registry such as rubygems.org.
///
/// Bodies are streamed chunk by chunk into a `.partial` file beside the
/// destination and renamed over it once complete, so an interrupted fetch
/// never leaves a truncated file where the cache looks for it.
pub struct UpstreamClient {
    client: Client,
    base: Url,
}

impl UpstreamClient {
    pub fn new(base: &str, timeout: Duration) -> AppResult<Self> {
        let base = Url::parse(base)
            .map_err(|e| AppError::BadRequest(format!("invalid upstream url {base:?}: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("gem-registry/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Absolute upstream URL for `path_and_query` (leading `/` optional).
    pub fn url_for(&self, path_and_query: &str) -> AppResult<Url> {
        let base = self.base.as_str().trim_end_matches('/');
        let path = path_and_query.trim_start_matches('/');
        Url::parse(&format!("{base}/{path}"))
            .map_err(|e| AppError::BadRequest(format!("cannot build upstream url for {path:?}: {e}")))
    }

    /// Stream `path` into `dest`. Returns the number of bytes written.
    ///
    /// A non-success status surfaces as [`AppError::UpstreamFailure`] carrying
    /// that status; a transport error carries none.
    pub async fn download_to(&self, path: &str, dest: &Path) -> AppResult<u64> {
        let url = self.url_for(path)?;
        debug!(url = %url, "fetching from upstream");

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "failed to connect to upstream");
            AppError::UpstreamFailure {
                status: None,
                message: format!("failed to connect to upstream: {e}"),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            info!(url = %url, status = status.as_u16(), "upstream returned a non-success status");
            return Err(AppError::UpstreamFailure {
                status: Some(status.as_u16()),
                message: format!("upstream returned {status} for {path}"),
            });
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(dest);
        match stream_into(response, &partial).await {
            Ok(written) => {
                fs::rename(&partial, dest).await?;
                info!(url = %url, dest = %dest.display(), bytes = written, "downloaded from upstream");
                Ok(written)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    debug!(path = %partial.display(), error = %cleanup, "no partial download to remove");
                }
                Err(e)
            }
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    dest.with_file_name(name)
}

async fn stream_into(response: reqwest::Response, path: &Path) -> AppResult<u64> {
    let mut file = File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AppError::UpstreamFailure {
            status: None,
            message: format!("upstream body interrupted: {e}"),
        })?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    #[test]
    fn test_url_for_joins_paths() {
        let client = UpstreamClient::new("https://rubygems.org/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.url_for("/gems/rack-3.0.0.gem").unwrap().as_str(),
            "https://rubygems.org/gems/rack-3.0.0.gem"
        );
        assert_eq!(
            client.url_for("api/v1/dependencies?gems=rack").unwrap().as_str(),
            "https://rubygems.org/api/v1/dependencies?gems=rack"
        );
    }

    #[tokio::test]
    async fn test_download_streams_to_destination() {
        let base = serve(Router::new().route("/gems/a.gem", get(|| async { "archive bytes" }))).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("a/a.gem");

        let client = UpstreamClient::new(&base, Duration::from_secs(5)).unwrap();
        assert_eq!(client.download_to("gems/a.gem", &dest).await.unwrap(), 13);
        assert_eq!(std::fs::read(&dest).unwrap(), b"archive bytes");
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_error_status_propagates_and_leaves_nothing() {
        let base = serve(Router::new().route(
            "/gems/gone.gem",
            get(|| async { (StatusCode::GONE, "gone") }),
        ))
        .await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("gone.gem");

        let client = UpstreamClient::new(&base, Duration::from_secs(5)).unwrap();
        let err = client.download_to("gems/gone.gem", &dest).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::UpstreamFailure {
                status: Some(410),
                ..
            }
        ));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_unreachable_upstream_has_no_status() {
        let client = UpstreamClient::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let dir = TempDir::new().unwrap();
        let err = client
            .download_to("gems/x.gem", &dir.path().join("x.gem"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UpstreamFailure { status: None, .. }));
    }
}
