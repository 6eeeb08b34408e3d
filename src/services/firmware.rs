//! Firmware discovery and download.
//!
//! A background poller asks the upstream release endpoint what exists,
//! records versions, and keeps the single `is_latest` flag on the newest
//! release. In download mode the latest release's binary is pulled to
//! local storage with progress tracked in the row; in proxy mode devices
//! are streamed the upstream bytes on demand by the files handler.

use futures_util::StreamExt;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, FirmwareMode};
use crate::error::StoreError;
use crate::models::{DownloadStatus, Version};
use crate::store::Store;

/// Firmware binaries can be large; transfers get a generous deadline.
pub const FIRMWARE_TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

/// One release as reported by the upstream endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamRelease {
    pub version: String,
    pub url: String,
}

/// Upstream answers either a single release or a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UpstreamResponse {
    One(UpstreamRelease),
    Many(Vec<UpstreamRelease>),
}

pub struct FirmwareService {
    store: Arc<Store>,
    config: Arc<Config>,
    client: reqwest::Client,
}

impl FirmwareService {
    pub fn new(store: Arc<Store>, config: Arc<Config>) -> Self {
        Self {
            store,
            config,
            client: reqwest::Client::new(),
        }
    }

    /// One discovery pass: fetch releases, record them, flip is_latest to
    /// the numerically newest, and in download mode fetch its binary.
    pub async fn poll_once(&self) -> anyhow::Result<()> {
        let upstream = match &self.config.firmware_upstream_url {
            Some(url) => url,
            None => {
                tracing::debug!("No firmware upstream configured, skipping discovery");
                return Ok(());
            }
        };

        let response: UpstreamResponse = self
            .client
            .get(upstream)
            .timeout(Duration::from_secs(30))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let releases = match response {
            UpstreamResponse::One(release) => vec![release],
            UpstreamResponse::Many(releases) => releases,
        };
        if releases.is_empty() {
            return Ok(());
        }

        let mut newest: Option<Version> = None;
        for release in &releases {
            let version = Version::new(&release.version);
            self.store
                .upsert_firmware(&version, Some(&release.url))?;
            newest = Some(match newest {
                Some(current) if current >= version => current,
                _ => version,
            });
        }
        if let Some(version) = newest {
            self.store.set_latest_firmware(&version)?;
            tracing::info!(version = %version, "Latest firmware recorded");

            if self.config.firmware_mode == FirmwareMode::Download {
                self.ensure_downloaded(&version).await?;
            }
        }
        Ok(())
    }

    /// Download the release binary unless it is already on disk.
    /// `failed → pending` happens implicitly: a failed row is retried on
    /// the next poll.
    pub async fn ensure_downloaded(&self, version: &Version) -> anyhow::Result<()> {
        let firmware = self
            .store
            .get_firmware(version)?
            .ok_or_else(|| anyhow::anyhow!("unknown firmware version {version}"))?;

        if firmware.download_status == DownloadStatus::Downloaded {
            if let Some(path) = &firmware.file_path {
                if PathBuf::from(path).exists() {
                    return Ok(());
                }
                tracing::warn!(version = %version, path, "Downloaded firmware missing on disk, refetching");
            }
        }
        let url = firmware
            .download_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("firmware {version} has no download URL"))?;

        let target = self
            .config
            .firmware_storage_dir
            .join(format!("firmware_{version}.bin"));
        tokio::fs::create_dir_all(&self.config.firmware_storage_dir).await?;

        self.store
            .set_firmware_download(version, DownloadStatus::Downloading, 0, None)?;

        match self.stream_to_file(url, &target, version).await {
            Ok(()) => {
                self.store.set_firmware_download(
                    version,
                    DownloadStatus::Downloaded,
                    100,
                    Some(&target.to_string_lossy()),
                )?;
                tracing::info!(version = %version, path = %target.display(), "Firmware downloaded");
                Ok(())
            }
            Err(e) => {
                self.store
                    .set_firmware_download(version, DownloadStatus::Failed, 0, None)?;
                let _ = tokio::fs::remove_file(&target).await;
                Err(e)
            }
        }
    }

    /// Stream the binary to a temp file, updating progress as bytes land,
    /// then rename into place.
    async fn stream_to_file(
        &self,
        url: &str,
        target: &std::path::Path,
        version: &Version,
    ) -> anyhow::Result<()> {
        let response = self
            .client
            .get(url)
            .timeout(FIRMWARE_TRANSFER_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let total = response.content_length();

        let part = target.with_extension("bin.part");
        let mut file = tokio::fs::File::create(&part).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let mut last_percent: u8 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if let Some(total) = total {
                let percent = ((written * 100) / total.max(1)).min(99) as u8;
                if percent != last_percent {
                    last_percent = percent;
                    self.store.set_firmware_download(
                        version,
                        DownloadStatus::Downloading,
                        percent,
                        None,
                    )?;
                }
            }
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&part, target).await?;
        Ok(())
    }

    /// Resolve where the bytes for a version come from in the current mode.
    pub fn payload_location(&self, version: &Version) -> Result<Option<FirmwareLocation>, StoreError> {
        let firmware = match self.store.get_firmware(version)? {
            Some(fw) => fw,
            None => return Ok(None),
        };
        let location = match self.config.firmware_mode {
            FirmwareMode::Proxy => firmware.download_url.map(FirmwareLocation::Upstream),
            FirmwareMode::Download => firmware
                .file_path
                .map(PathBuf::from)
                .filter(|p| p.exists())
                .map(FirmwareLocation::Local),
        };
        Ok(location)
    }
}

#[derive(Debug, Clone)]
pub enum FirmwareLocation {
    Upstream(String),
    Local(PathBuf),
}

/// Periodic discovery loop.
pub struct FirmwarePoller;

impl FirmwarePoller {
    pub fn spawn(
        service: Arc<FirmwareService>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = service.poll_once().await {
                            tracing::warn!(error = %e, "Firmware discovery failed");
                        }
                    }
                }
            }
            tracing::debug!("Firmware poller stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service_with(config: Config) -> (Arc<FirmwareService>, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let service = Arc::new(FirmwareService::new(
            Arc::clone(&store),
            Arc::new(config),
        ));
        (service, store)
    }

    #[tokio::test]
    async fn discovery_records_newest_as_latest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/releases"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"version": "1.9.0", "url": "https://fw/1.9.0.bin"},
                {"version": "1.10.0", "url": "https://fw/1.10.0.bin"},
            ])))
            .mount(&server)
            .await;

        let config = Config {
            firmware_upstream_url: Some(format!("{}/releases", server.uri())),
            ..Config::default()
        };
        let (service, store) = service_with(config);
        service.poll_once().await.unwrap();

        // Numeric compare: 1.10.0 beats 1.9.0.
        let latest = store.latest_firmware().unwrap().unwrap();
        assert_eq!(latest.version.as_str(), "1.10.0");
    }

    #[tokio::test]
    async fn single_object_response_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/releases"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"version": "1.7.1", "url": "https://fw/1.7.1.bin"}),
            ))
            .mount(&server)
            .await;

        let config = Config {
            firmware_upstream_url: Some(format!("{}/releases", server.uri())),
            ..Config::default()
        };
        let (service, store) = service_with(config);
        service.poll_once().await.unwrap();
        assert!(store.latest_firmware().unwrap().unwrap().is_latest);
    }

    #[tokio::test]
    async fn download_mode_fetches_binary_with_progress() {
        let server = MockServer::start().await;
        let body = vec![0xABu8; 4096];
        Mock::given(method("GET"))
            .and(path("/fw.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            firmware_mode: FirmwareMode::Download,
            firmware_storage_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let (service, store) = service_with(config);
        let version = Version::new("1.7.1");
        store
            .upsert_firmware(&version, Some(&format!("{}/fw.bin", server.uri())))
            .unwrap();

        service.ensure_downloaded(&version).await.unwrap();

        let fw = store.get_firmware(&version).unwrap().unwrap();
        assert_eq!(fw.download_status, DownloadStatus::Downloaded);
        assert_eq!(fw.progress, 100);
        let on_disk = std::fs::read(fw.file_path.unwrap()).unwrap();
        assert_eq!(on_disk, body);
    }

    #[tokio::test]
    async fn failed_download_marks_row_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fw.bin"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            firmware_mode: FirmwareMode::Download,
            firmware_storage_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let (service, store) = service_with(config);
        let version = Version::new("1.7.1");
        store
            .upsert_firmware(&version, Some(&format!("{}/fw.bin", server.uri())))
            .unwrap();

        assert!(service.ensure_downloaded(&version).await.is_err());
        let fw = store.get_firmware(&version).unwrap().unwrap();
        assert_eq!(fw.download_status, DownloadStatus::Failed);
    }

    #[tokio::test]
    async fn proxy_mode_location_is_the_upstream_url() {
        let (service, store) = service_with(Config::default());
        let version = Version::new("1.7.1");
        store
            .upsert_firmware(&version, Some("https://fw/1.7.1.bin"))
            .unwrap();

        match service.payload_location(&version).unwrap() {
            Some(FirmwareLocation::Upstream(url)) => assert_eq!(url, "https://fw/1.7.1.bin"),
            other => panic!("expected upstream location, got {other:?}"),
        }
        assert!(service
            .payload_location(&Version::new("9.9.9"))
            .unwrap()
            .is_none());
    }
}
