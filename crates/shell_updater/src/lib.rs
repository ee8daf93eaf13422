//! Update coordination for casement apps.
//!
//! One update session per run: check a release feed, compare versions,
//! download the matching platform asset, verify it, and hold it ready to
//! install. Supports GitHub Releases and custom JSON manifest feeds. The
//! session never installs anything; restart/apply is a user action.
//!
//! Error codes: 5000-5099

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use futures_util::StreamExt;
use reqwest::Client;
use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use shell_log::{LogLevel, LogSink};

// ============================================================================
// Error Types (Error codes: 5000-5099)
// ============================================================================

/// Error codes for update operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum UpdaterErrorCode {
    /// Generic updater error (5000)
    Generic = 5000,
    /// Failed to check for updates (5001)
    CheckFailed = 5001,
    /// Failed to download update (5002)
    DownloadFailed = 5002,
    /// Package verification failed (5003)
    VerificationFailed = 5003,
    /// Network error during update operation (5004)
    NetworkError = 5004,
    /// Invalid feed format (5005)
    InvalidManifest = 5005,
    /// Invalid version format (5006)
    InvalidVersion = 5006,
}

/// Updater error type.
#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("[{code}] {message}")]
    Generic { code: u32, message: String },

    #[error("[{code}] Update check failed: {message}")]
    CheckFailed { code: u32, message: String },

    #[error("[{code}] Download failed: {message}")]
    DownloadFailed { code: u32, message: String },

    #[error("[{code}] Verification failed: {message}")]
    VerificationFailed { code: u32, message: String },

    #[error("[{code}] Network error: {message}")]
    NetworkError { code: u32, message: String },

    #[error("[{code}] Invalid manifest: {message}")]
    InvalidManifest { code: u32, message: String },

    #[error("[{code}] Invalid version: {message}")]
    InvalidVersion { code: u32, message: String },
}

impl UpdaterError {
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            code: UpdaterErrorCode::Generic as u32,
            message: message.into(),
        }
    }

    pub fn check_failed(message: impl Into<String>) -> Self {
        Self::CheckFailed {
            code: UpdaterErrorCode::CheckFailed as u32,
            message: message.into(),
        }
    }

    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            code: UpdaterErrorCode::DownloadFailed as u32,
            message: message.into(),
        }
    }

    pub fn verification_failed(message: impl Into<String>) -> Self {
        Self::VerificationFailed {
            code: UpdaterErrorCode::VerificationFailed as u32,
            message: message.into(),
        }
    }

    pub fn network_error(message: impl Into<String>) -> Self {
        Self::NetworkError {
            code: UpdaterErrorCode::NetworkError as u32,
            message: message.into(),
        }
    }

    pub fn invalid_manifest(message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            code: UpdaterErrorCode::InvalidManifest as u32,
            message: message.into(),
        }
    }

    pub fn invalid_version(message: impl Into<String>) -> Self {
        Self::InvalidVersion {
            code: UpdaterErrorCode::InvalidVersion as u32,
            message: message.into(),
        }
    }
}

// ============================================================================
// Data Types
// ============================================================================

/// Update feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UpdateSource {
    /// GitHub Releases source
    Github { owner: String, repo: String },
    /// Custom JSON manifest URL
    Custom { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Update source (GitHub or Custom)
    pub source: UpdateSource,
    /// Current application version
    pub current_version: String,
    /// Whether to include prereleases
    #[serde(default)]
    pub include_prereleases: bool,
}

/// GitHub release API response structure.
#[derive(Debug, Clone, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    body: Option<String>,
    prerelease: bool,
    published_at: Option<String>,
    assets: Vec<GitHubAsset>,
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
    size: u64,
}

/// Custom manifest feed format.
#[derive(Debug, Clone, Deserialize)]
struct FeedManifest {
    version: String,
    platforms: HashMap<String, PlatformAsset>,
    release_notes: Option<String>,
    publish_date: Option<String>,
}

/// Platform-specific asset in a manifest feed.
#[derive(Debug, Clone, Deserialize)]
struct PlatformAsset {
    url: String,
    sha256: Option<String>,
    size: Option<u64>,
}

/// Information about an available update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateInfo {
    /// New version string
    pub version: String,
    /// Download URL for the current platform
    pub download_url: String,
    /// Release notes (if available)
    pub release_notes: Option<String>,
    /// Download size in bytes
    pub size_bytes: u64,
    /// SHA256 checksum (if available)
    pub sha256: Option<String>,
    /// Publish date (if available)
    pub publish_date: Option<String>,
    /// Whether this is a prerelease
    pub is_prerelease: bool,
}

/// Download progress information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateProgress {
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub percent: f64,
}

/// Downloaded update held for a later restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingUpdate {
    pub info: UpdateInfo,
    pub local_path: PathBuf,
    pub verified: bool,
}

// ============================================================================
// Update Session
// ============================================================================

/// Phase of the one update cycle this session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    /// No cycle started
    Idle,
    /// Feed check in flight
    Checking,
    /// A newer version exists
    Available,
    /// Current version is up to date; terminal
    NotAvailable,
    /// Asset download in flight
    Downloading,
    /// Asset downloaded and verified; terminal until restart
    ReadyToInstall,
    /// Check or download failed; terminal, no retry
    Error,
}

impl UpdatePhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UpdatePhase::NotAvailable | UpdatePhase::ReadyToInstall | UpdatePhase::Error
        )
    }
}

/// Outcome notifications from the updater delegate, consumed on the
/// control thread via [`UpdateSession::apply`].
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    Available(UpdateInfo),
    NotAvailable,
    DownloadStarted,
    Progress(UpdateProgress),
    Downloaded(PendingUpdate),
    Failed(String),
}

/// Serializable view of the session for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateSnapshot {
    pub phase: UpdatePhase,
    pub available: Option<UpdateInfo>,
    pub progress: Option<UpdateProgress>,
    pub pending: Option<PendingUpdate>,
    pub error: Option<String>,
}

#[derive(Debug)]
struct SessionInner {
    phase: UpdatePhase,
    available: Option<UpdateInfo>,
    progress: Option<UpdateProgress>,
    pending: Option<PendingUpdate>,
    error: Option<String>,
}

/// One run's update-check lifecycle. Cloneable observer handle; all phase
/// writes happen on the control thread through [`UpdateSession::apply`].
#[derive(Clone)]
pub struct UpdateSession {
    inner: Arc<RwLock<SessionInner>>,
    sink: Arc<LogSink>,
}

impl UpdateSession {
    fn new(sink: Arc<LogSink>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(SessionInner {
                phase: UpdatePhase::Checking,
                available: None,
                progress: None,
                pending: None,
                error: None,
            })),
            sink,
        }
    }

    pub fn phase(&self) -> UpdatePhase {
        self.inner.read().unwrap().phase
    }

    pub fn available_update(&self) -> Option<UpdateInfo> {
        self.inner.read().unwrap().available.clone()
    }

    pub fn pending_update(&self) -> Option<PendingUpdate> {
        self.inner.read().unwrap().pending.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.read().unwrap().error.clone()
    }

    pub fn snapshot(&self) -> UpdateSnapshot {
        let inner = self.inner.read().unwrap();
        UpdateSnapshot {
            phase: inner.phase,
            available: inner.available.clone(),
            progress: inner.progress.clone(),
            pending: inner.pending.clone(),
            error: inner.error.clone(),
        }
    }

    /// Advance the session with one delegate event. Events that are not
    /// legal in the current phase are logged and ignored.
    pub fn apply(&self, event: UpdateEvent) {
        let mut inner = self.inner.write().unwrap();
        match (inner.phase, event) {
            (UpdatePhase::Checking, UpdateEvent::Available(update)) => {
                self.sink.info(&format!("Update available: {}", update.version));
                inner.available = Some(update);
                inner.phase = UpdatePhase::Available;
            }
            (UpdatePhase::Checking, UpdateEvent::NotAvailable) => {
                self.sink.info("No update available");
                inner.phase = UpdatePhase::NotAvailable;
            }
            (UpdatePhase::Available, UpdateEvent::DownloadStarted) => {
                inner.phase = UpdatePhase::Downloading;
            }
            (UpdatePhase::Downloading, UpdateEvent::Progress(progress)) => {
                inner.progress = Some(progress);
            }
            (UpdatePhase::Downloading, UpdateEvent::Downloaded(pending)) => {
                self.sink.info(&format!(
                    "Update {} downloaded, ready to install on restart",
                    pending.info.version
                ));
                inner.pending = Some(pending);
                inner.phase = UpdatePhase::ReadyToInstall;
            }
            (
                UpdatePhase::Checking | UpdatePhase::Available | UpdatePhase::Downloading,
                UpdateEvent::Failed(message),
            ) => {
                self.sink.error(&format!("Update cycle failed: {message}"));
                inner.error = Some(message);
                inner.phase = UpdatePhase::Error;
            }
            (phase, event) => {
                warn!(phase = ?phase, event = ?event, "Ignoring update event in this phase");
            }
        }
    }
}

/// Updater collaborator behind the session. Implementations perform the
/// whole check-and-notify cycle on their own tasks and report through the
/// event queue; retry policy, if any, is theirs.
pub trait UpdateDelegate: Send + Sync + 'static {
    fn check_and_notify(self: Arc<Self>, events: mpsc::Sender<UpdateEvent>);
}

/// Begin the run's single update cycle.
///
/// Raises the sink to informational so the cycle's records are visible,
/// then hands off to the delegate. Callers invoke this once, after the
/// primary window has been presented.
pub fn start_update_check(
    sink: Arc<LogSink>,
    delegate: Arc<dyn UpdateDelegate>,
    events: mpsc::Sender<UpdateEvent>,
) -> UpdateSession {
    sink.set_min_level(LogLevel::Info);
    sink.info("Checking for updates");
    let session = UpdateSession::new(sink);
    delegate.check_and_notify(events);
    session
}

// ============================================================================
// Platform Detection
// ============================================================================

/// Current platform identifier for asset matching.
fn platform_identifier() -> String {
    let os_name = match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        "linux" => "linux",
        other => other,
    };
    let arch_name = match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "aarch64",
        "x86" => "x86",
        "arm" => "arm",
        other => other,
    };
    format!("{}-{}", os_name, arch_name)
}

/// File extension expected for the current platform's package.
fn platform_extension() -> &'static str {
    match std::env::consts::OS {
        "macos" => "dmg",
        "windows" => "exe",
        "linux" => "AppImage",
        _ => "tar.gz",
    }
}

/// Check if an asset name matches the current platform.
fn asset_matches_platform(name: &str) -> bool {
    let platform = platform_identifier();
    let ext = platform_extension();
    let name_lower = name.to_lowercase();

    let has_platform = name_lower.contains(&platform.to_lowercase())
        || (name_lower.contains("darwin") && std::env::consts::OS == "macos")
        || (name_lower.contains("macos") && std::env::consts::OS == "macos")
        || (name_lower.contains("win") && std::env::consts::OS == "windows")
        || (name_lower.contains("linux") && std::env::consts::OS == "linux");

    let has_arch = name_lower.contains("x64")
        || name_lower.contains("x86_64")
        || name_lower.contains("amd64")
        || name_lower.contains("aarch64")
        || name_lower.contains("arm64")
        || name_lower.contains(std::env::consts::ARCH);

    let has_ext = name_lower.ends_with(&ext.to_lowercase())
        || name_lower.ends_with(".zip")
        || name_lower.ends_with(".tar.gz")
        || name_lower.ends_with(".msi");

    has_platform && has_arch && has_ext
}

/// Is `candidate` (possibly `v`-prefixed) newer than `current`?
fn is_newer_version(current: &str, candidate: &str) -> Result<bool, UpdaterError> {
    let candidate_version = Version::parse(candidate.trim_start_matches('v')).map_err(|e| {
        UpdaterError::invalid_version(format!("Invalid candidate version '{candidate}': {e}"))
    })?;
    let current_version = Version::parse(current.trim_start_matches('v')).map_err(|e| {
        UpdaterError::invalid_version(format!("Invalid current version '{current}': {e}"))
    })?;
    Ok(candidate_version > current_version)
}

// ============================================================================
// Feed Updater
// ============================================================================

/// Release-feed updater: the shipped [`UpdateDelegate`].
pub struct FeedUpdater {
    config: UpdateConfig,
    client: Client,
}

impl FeedUpdater {
    pub fn new(config: UpdateConfig) -> Result<Self, UpdaterError> {
        if let UpdateSource::Custom { url } = &config.source {
            url::Url::parse(url)
                .map_err(|e| UpdaterError::invalid_manifest(format!("Invalid feed URL: {e}")))?;
        }
        let client = Client::builder()
            .user_agent(concat!("casement-updater/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpdaterError::generic(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// Query the feed once. `None` means the current version is up to date.
    pub async fn check(&self) -> Result<Option<UpdateInfo>, UpdaterError> {
        match &self.config.source {
            UpdateSource::Github { owner, repo } => self.check_github_releases(owner, repo).await,
            UpdateSource::Custom { url } => self.check_feed_manifest(url).await,
        }
    }

    async fn check_github_releases(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Option<UpdateInfo>, UpdaterError> {
        let url = format!("https://api.github.com/repos/{owner}/{repo}/releases/latest");
        debug!("Fetching GitHub release from: {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|e| UpdaterError::network_error(format!("Failed to fetch releases: {e}")))?;

        if !response.status().is_success() {
            return Err(UpdaterError::check_failed(format!(
                "GitHub API returned status {}",
                response.status()
            )));
        }

        let release: GitHubRelease = response.json().await.map_err(|e| {
            UpdaterError::invalid_manifest(format!("Failed to parse GitHub release: {e}"))
        })?;

        if release.prerelease && !self.config.include_prereleases {
            debug!("Skipping prerelease: {}", release.tag_name);
            return Ok(None);
        }

        if !is_newer_version(&self.config.current_version, &release.tag_name)? {
            debug!(
                "Current version {} is up to date (latest: {})",
                self.config.current_version, release.tag_name
            );
            return Ok(None);
        }

        let matching = release
            .assets
            .iter()
            .find(|a| asset_matches_platform(&a.name))
            .ok_or_else(|| {
                UpdaterError::check_failed(format!(
                    "No compatible asset found for platform {}",
                    platform_identifier()
                ))
            })?;

        Ok(Some(UpdateInfo {
            version: release.tag_name.trim_start_matches('v').to_string(),
            download_url: matching.browser_download_url.clone(),
            release_notes: release.body,
            size_bytes: matching.size,
            // GitHub releases don't provide checksums directly
            sha256: None,
            publish_date: release.published_at,
            is_prerelease: release.prerelease,
        }))
    }

    async fn check_feed_manifest(&self, url: &str) -> Result<Option<UpdateInfo>, UpdaterError> {
        debug!("Fetching update manifest from: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| UpdaterError::network_error(format!("Failed to fetch manifest: {e}")))?;

        if !response.status().is_success() {
            return Err(UpdaterError::check_failed(format!(
                "Manifest server returned status {}",
                response.status()
            )));
        }

        let manifest: FeedManifest = response
            .json()
            .await
            .map_err(|e| UpdaterError::invalid_manifest(format!("Failed to parse manifest: {e}")))?;

        if !is_newer_version(&self.config.current_version, &manifest.version)? {
            debug!(
                "Current version {} is up to date (latest: {})",
                self.config.current_version, manifest.version
            );
            return Ok(None);
        }

        let platform = platform_identifier();
        let asset = manifest.platforms.get(&platform).ok_or_else(|| {
            UpdaterError::check_failed(format!("No asset for platform '{platform}' in manifest"))
        })?;

        Ok(Some(UpdateInfo {
            version: manifest.version.trim_start_matches('v').to_string(),
            download_url: asset.url.clone(),
            release_notes: manifest.release_notes,
            size_bytes: asset.size.unwrap_or(0),
            sha256: asset.sha256.clone(),
            publish_date: manifest.publish_date,
            is_prerelease: false,
        }))
    }

    /// Stream the asset to a temp location, reporting progress, and verify
    /// it against the feed checksum when one was provided.
    async fn download(
        &self,
        update: &UpdateInfo,
        events: &mpsc::Sender<UpdateEvent>,
    ) -> Result<PendingUpdate, UpdaterError> {
        info!("Starting download from: {}", update.download_url);

        let temp_dir = tempfile::tempdir()
            .map_err(|e| UpdaterError::download_failed(format!("Failed to create temp dir: {e}")))?;
        let file_name = update.download_url.split('/').next_back().unwrap_or("update");
        let file_path = temp_dir.path().join(file_name);

        let response = self
            .client
            .get(&update.download_url)
            .send()
            .await
            .map_err(|e| UpdaterError::network_error(format!("Failed to start download: {e}")))?;

        if !response.status().is_success() {
            return Err(UpdaterError::download_failed(format!(
                "Server returned status {}",
                response.status()
            )));
        }

        let total_bytes = response.content_length().unwrap_or(update.size_bytes);
        let mut file = tokio::fs::File::create(&file_path)
            .await
            .map_err(|e| UpdaterError::download_failed(format!("Failed to create file: {e}")))?;

        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| UpdaterError::network_error(format!("Download stream error: {e}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| UpdaterError::download_failed(format!("Failed to write chunk: {e}")))?;
            downloaded += chunk.len() as u64;

            let percent = if total_bytes > 0 {
                (downloaded as f64 / total_bytes as f64) * 100.0
            } else {
                0.0
            };
            let _ = events
                .send(UpdateEvent::Progress(UpdateProgress {
                    downloaded_bytes: downloaded,
                    total_bytes,
                    percent,
                }))
                .await;
        }
        file.flush()
            .await
            .map_err(|e| UpdaterError::download_failed(format!("Failed to flush file: {e}")))?;

        let verified = match &update.sha256 {
            Some(expected) => {
                verify_sha256(&file_path, expected).await?;
                true
            }
            None => false,
        };

        // Keep the downloaded file past this call
        let local_path = file_path.clone();
        std::mem::forget(temp_dir);

        info!("Download complete: {}", local_path.display());
        Ok(PendingUpdate {
            info: update.clone(),
            local_path,
            verified,
        })
    }

    async fn run_cycle(&self, events: &mpsc::Sender<UpdateEvent>) -> Result<(), UpdaterError> {
        let update = match self.check().await? {
            Some(update) => update,
            None => {
                let _ = events.send(UpdateEvent::NotAvailable).await;
                return Ok(());
            }
        };
        let _ = events.send(UpdateEvent::Available(update.clone())).await;
        let _ = events.send(UpdateEvent::DownloadStarted).await;
        let pending = self.download(&update, events).await?;
        let _ = events.send(UpdateEvent::Downloaded(pending)).await;
        Ok(())
    }
}

impl UpdateDelegate for FeedUpdater {
    fn check_and_notify(self: Arc<Self>, events: mpsc::Sender<UpdateEvent>) {
        tokio::spawn(async move {
            if let Err(e) = self.run_cycle(&events).await {
                error!("Update cycle failed: {}", e);
                let _ = events.send(UpdateEvent::Failed(e.to_string())).await;
            }
        });
    }
}

/// Compare a file's SHA-256 digest against the expected hex string.
async fn verify_sha256(path: &std::path::Path, expected: &str) -> Result<(), UpdaterError> {
    let contents = tokio::fs::read(path)
        .await
        .map_err(|e| UpdaterError::verification_failed(format!("Failed to read package: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    let actual = format!("{:x}", hasher.finalize());
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(UpdaterError::verification_failed(format!(
            "Checksum mismatch: expected {expected}, got {actual}"
        )))
    }
}

// ============================================================================
// Tests
// ============================================================================
