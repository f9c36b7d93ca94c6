use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use tokio::io::AsyncWriteExt;

use crate::error::UpdateError;
use crate::settings::UpdaterSettings;

/// Fetches remote manifests and artifacts.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// The full body at `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, UpdateError>;

    /// Stream `url` into `dest`, returning the bytes written. `dest` only
    /// appears once the transfer has completed. `on_bytes` receives the
    /// running byte count of the current attempt after every chunk.
    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        on_bytes: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<u64, UpdateError>;
}

/// [`Downloader`] over `reqwest`, retrying transient failures with the
/// configured delays.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
    retry_delays_secs: Vec<u64>,
}

impl HttpDownloader {
    pub fn new(settings: &UpdaterSettings) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.http_timeout_secs))
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .user_agent(format!("molt/{}/updater", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| UpdateError::http("failed to build HTTP client", error))?;

        Ok(Self::with_client(client, settings.retry_delays_secs.clone()))
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, retry_delays_secs: Vec<u64>) -> Self {
        Self {
            client,
            retry_delays_secs,
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, UpdateError> {
        let response = self.send(url).await?;
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|error| UpdateError::http("failed to read response body", error))
    }

    async fn download_once(
        &self,
        url: &str,
        dest: &Path,
        on_bytes: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<u64, UpdateError> {
        use futures_util::StreamExt;

        let response = self.send(url).await?;
        let partial = partial_path(dest);
        let mut file = tokio::fs::File::create(&partial).await.map_err(|error| {
            UpdateError::io_with_path("failed to create download file", &partial, &error)
        })?;

        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|error| UpdateError::http("download stream error", error))?;
            file.write_all(&chunk).await.map_err(|error| {
                UpdateError::io_with_path("failed to write download data", &partial, &error)
            })?;
            downloaded += chunk.len() as u64;
            on_bytes(downloaded);
        }

        file.flush().await.map_err(|error| {
            UpdateError::io_with_path("failed to flush download file", &partial, &error)
        })?;
        drop(file);

        tokio::fs::rename(&partial, dest).await.map_err(|error| {
            UpdateError::io_with_path("failed to move download into place", dest, &error)
        })?;

        info!("Downloaded {url}: {downloaded} bytes");
        Ok(downloaded)
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, UpdateError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| UpdateError::http("download request failed", error))?;

        if !response.status().is_success() {
            return Err(UpdateError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, UpdateError> {
        retry_with_delays("fetch", &self.retry_delays_secs, || self.fetch_once(url)).await
    }

    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        on_bytes: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<u64, UpdateError> {
        let result = retry_with_delays("download", &self.retry_delays_secs, || {
            self.download_once(url, dest, on_bytes)
        })
        .await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(partial_path(dest)).await;
        }
        result
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    dest.with_file_name(name)
}

/// Run `operation` once per entry of `retry_delays_secs`, sleeping that many
/// seconds first, until it succeeds or fails with an error that is not
/// [transient](UpdateError::is_transient). An empty schedule still runs once.
pub(crate) async fn retry_with_delays<T, Op, Fut>(
    operation_name: &'static str,
    retry_delays_secs: &[u64],
    mut operation: Op,
) -> Result<T, UpdateError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpdateError>>,
{
    let delays = if retry_delays_secs.is_empty() {
        &[0][..]
    } else {
        retry_delays_secs
    };
    let mut last_err = None;

    for (attempt, &delay_secs) in delays.iter().enumerate() {
        if delay_secs > 0 {
            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_transient() => {
                debug!("{operation_name} failed permanently: {error}");
                return Err(error);
            }
            Err(error) => {
                debug!(
                    "{} attempt {} failed: {}",
                    operation_name,
                    attempt + 1,
                    error
                );
                last_err = Some(error);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| UpdateError::Invalid(format!("{operation_name} never ran"))))
}
