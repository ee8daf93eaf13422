//! Run configuration loaded from `manifest.app.toml` in the app directory.
//!
//! The manifest carries app identity, window preferences, the content entry
//! URL, the optional update feed, and lifecycle policy. Everything except
//! `[app]` and `[content]` is optional and defaulted.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use shell_updater::UpdateSource;
use std::path::Path;

/// Application manifest (manifest.app.toml)
///
/// Loaded once at host startup and never reread.
#[derive(Debug, Deserialize, Clone)]
pub struct Manifest {
    /// App metadata (name, identifier, version)
    pub app: App,
    /// Window preferences (optional)
    #[serde(default)]
    pub window: WindowPrefs,
    /// Content entry point
    pub content: Content,
    /// Update feed configuration (optional, updates disabled when absent)
    pub update: Option<Update>,
    /// Lifecycle policy (optional)
    #[serde(default)]
    pub lifecycle: Lifecycle,
}

/// Application metadata
#[derive(Debug, Deserialize, Clone)]
pub struct App {
    /// Display name of the application
    pub name: String,
    /// Unique identifier (reverse-DNS format, e.g., "com.example.myapp")
    pub identifier: String,
    /// Semantic version (e.g., "1.0.0")
    pub version: String,
    /// Refuse to start while another instance holds the lock (default: true)
    #[serde(default = "default_true")]
    pub single_instance: bool,
}

/// Window preferences
///
/// Settings applied to the primary window. Missing dimensions fall back to
/// the window manager defaults.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WindowPrefs {
    /// Window width in pixels
    pub width: Option<f64>,
    /// Window height in pixels
    pub height: Option<f64>,
    /// Window title (default: app name)
    pub title: Option<String>,
    /// First presentation minimizes instead of showing (default: false)
    #[serde(default)]
    pub start_minimized: bool,
    /// Path to the window icon, relative to the app directory
    pub icon: Option<String>,
}

/// Content entry point
#[derive(Debug, Deserialize, Clone)]
pub struct Content {
    /// Entry URL loaded into every window (required, non-empty)
    pub url: String,
}

/// Update feed configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Update {
    /// Whether the update check runs at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Feed source, tagged by `type` ("github" or "custom")
    #[serde(flatten)]
    pub source: UpdateSource,
    /// Whether prerelease versions count as updates (default: false)
    #[serde(default)]
    pub include_prereleases: bool,
}

/// Lifecycle policy
#[derive(Debug, Deserialize, Clone)]
pub struct Lifecycle {
    /// Quit when the last window closes (default: platform convention)
    #[serde(default = "default_quit_on_all_closed")]
    pub quit_on_all_closed: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            quit_on_all_closed: default_quit_on_all_closed(),
        }
    }
}

fn default_true() -> bool {
    true
}

// macOS apps conventionally stay resident with no windows open.
fn default_quit_on_all_closed() -> bool {
    !cfg!(target_os = "macos")
}

/// Read and validate `manifest.app.toml` from `app_dir`.
pub async fn load_manifest(app_dir: &Path) -> Result<Manifest> {
    let manifest_path = app_dir.join("manifest.app.toml");
    let manifest_txt = tokio::fs::read_to_string(&manifest_path)
        .await
        .with_context(|| format!("reading manifest at {}", manifest_path.display()))?;
    let manifest: Manifest = toml::from_str(&manifest_txt).context("parsing manifest")?;

    if manifest.content.url.trim().is_empty() {
        bail!("manifest [content].url must not be empty");
    }

    Ok(manifest)
}

// ============================================================================
// Tests
// ============================================================================
