use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Dotted-numeric firmware version ("1.10.0").
///
/// Plain string comparison gets `1.10.0` vs `1.9.0` wrong, so ordering is
/// segment-wise numeric. Missing segments count as zero; non-numeric
/// segments also count as zero so malformed upstream strings order low
/// instead of failing. Equality follows the ordering, so "1.2" == "1.2.0".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version(String);

impl Version {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segments(&self) -> impl Iterator<Item = u64> + '_ {
        self.0
            .trim_start_matches(['v', 'V'])
            .split('.')
            .map(|part| part.trim().parse::<u64>().unwrap_or(0))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut a = self.segments();
        let mut b = other.segments();
        loop {
            match (a.next(), b.next()) {
                (None, None) => return Ordering::Equal,
                (x, y) => {
                    let (x, y) = (x.unwrap_or(0), y.unwrap_or(0));
                    match x.cmp(&y) {
                        Ordering::Equal => continue,
                        ord => return ord,
                    }
                }
            }
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a firmware file in download mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Downloaded,
    Failed,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Downloaded => "downloaded",
            DownloadStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "downloading" => DownloadStatus::Downloading,
            "downloaded" => DownloadStatus::Downloaded,
            "failed" => DownloadStatus::Failed,
            _ => DownloadStatus::Pending,
        }
    }
}

/// One discovered firmware release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub id: i64,
    pub version: Version,
    pub download_url: Option<String>,
    /// Local file (download mode only).
    pub file_path: Option<String>,
    /// At most one row is latest.
    pub is_latest: bool,
    pub download_status: DownloadStatus,
    pub progress: u8,
}

impl FirmwareVersion {
    /// Filename devices request: `firmware_<version>.bin`.
    pub fn filename(&self) -> String {
        format!("firmware_{}.bin", self.version)
    }
}
