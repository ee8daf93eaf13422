//! Window lifecycle types and the platform surface seam.
//!
//! The shell never talks to an OS windowing toolkit directly. It drives an
//! opaque [`SurfaceHost`] that creates hidden surfaces, presents them, and
//! reports their lifecycle back as [`SurfaceEvent`]s. The manager in
//! [`manager`] layers window handles, bus wiring, and the show/release
//! discipline on top of that seam.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use shell_ipc::Endpoint;

pub mod manager;

pub use manager::{WindowManager, WindowManagerConfig};

// ============================================================================
// Error Types (6000+ range)
// ============================================================================

/// Error codes for window operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WindowErrorCode {
    /// Window creation failed
    CreationFailed = 6000,
    /// Window not found
    WindowNotFound = 6001,
    /// Handle used after release
    HandleReleased = 6002,
    /// Invalid window configuration
    InvalidConfig = 6003,
}

/// Custom error type for window operations
#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error("[{code}] Window creation failed: {message}")]
    CreationFailed { code: u32, message: String },

    #[error("[{code}] Window not found: {window_id}")]
    WindowNotFound { code: u32, window_id: String },

    #[error("[{code}] Handle used after release: {message}")]
    HandleReleased { code: u32, message: String },

    #[error("[{code}] Invalid window configuration: {message}")]
    InvalidConfig { code: u32, message: String },
}

impl WindowError {
    pub fn creation_failed(message: impl Into<String>) -> Self {
        Self::CreationFailed {
            code: WindowErrorCode::CreationFailed as u32,
            message: message.into(),
        }
    }

    pub fn window_not_found(window_id: impl Into<String>) -> Self {
        Self::WindowNotFound {
            code: WindowErrorCode::WindowNotFound as u32,
            window_id: window_id.into(),
        }
    }

    pub fn handle_released(message: impl Into<String>) -> Self {
        Self::HandleReleased {
            code: WindowErrorCode::HandleReleased as u32,
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            code: WindowErrorCode::InvalidConfig as u32,
            message: message.into(),
        }
    }

    /// A broken lifecycle invariant rather than a recoverable failure.
    /// Callers abort the run loop instead of continuing with a handle that
    /// no longer exists.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::HandleReleased { .. })
    }
}

// ============================================================================
// Surface Seam
// ============================================================================

/// Platform-assigned key for one presentation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceKey(pub u64);

/// Creation request handed to the platform. Surfaces always start hidden;
/// presentation happens once the surface reports it is visually ready.
pub struct SurfaceDesc {
    pub window_id: String,
    pub title: String,
    pub url: String,
    pub width: f64,
    pub height: f64,
    pub icon_path: Option<PathBuf>,
    /// Content side of the window's bus pair; the platform delivers it to
    /// the content process it hosts in this surface.
    pub content_bus: Endpoint,
}

/// Lifecycle notifications flowing from the platform into the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// The surface finished its first paint and can be presented.
    Ready(SurfaceKey),
    /// The surface is gone.
    Closed(SurfaceKey),
    /// Loaded content asked for a new top-level surface.
    PopupRequested { key: SurfaceKey, url: String },
}

/// Minimal windowing primitive the shell requires from a platform.
pub trait SurfaceHost {
    fn create_surface(&mut self, desc: SurfaceDesc) -> Result<SurfaceKey, WindowError>;
    fn show_surface(&mut self, key: SurfaceKey) -> Result<(), WindowError>;
    fn minimize_surface(&mut self, key: SurfaceKey) -> Result<(), WindowError>;
    fn close_surface(&mut self, key: SurfaceKey) -> Result<(), WindowError>;
}

// ============================================================================
// Window State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Hidden,
    Shown,
    Minimized,
}

/// Whether the primary window handle currently exists. Owned by the
/// application controller and written here by the closed observer; the
/// controller's reactivate handling reads it. Both run on the control
/// thread.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PrimaryState {
    #[default]
    Absent,
    /// A creation request is in flight; no duplicate may be spawned.
    Creating,
    Open(String),
}

impl PrimaryState {
    pub fn exists(&self) -> bool {
        !matches!(self, PrimaryState::Absent)
    }

    pub fn window_id(&self) -> Option<&str> {
        match self {
            PrimaryState::Open(id) => Some(id),
            _ => None,
        }
    }
}

/// One presentation surface's lifecycle state. Owned exclusively by the
/// manager and removed from its map when the surface closes.
pub struct WindowHandle {
    pub id: String,
    pub surface: SurfaceKey,
    pub visibility: Visibility,
    pub primary: bool,
    /// Latch for the at-most-once show/minimize action.
    pub presented: bool,
    pub bus: Endpoint,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(WindowErrorCode::CreationFailed as u32, 6000);
        assert_eq!(WindowErrorCode::WindowNotFound as u32, 6001);
        assert_eq!(WindowErrorCode::HandleReleased as u32, 6002);
        assert_eq!(WindowErrorCode::InvalidConfig as u32, 6003);
    }

    #[test]
    fn test_error_display() {
        let err = WindowError::creation_failed("no display");
        assert!(err.to_string().contains("6000"));
        assert!(err.to_string().contains("no display"));

        let err = WindowError::window_not_found("win-9");
        assert!(err.to_string().contains("6001"));
        assert!(err.to_string().contains("win-9"));
    }

    #[test]
    fn test_only_handle_released_is_fatal() {
        assert!(WindowError::handle_released("ready for win-1").is_fatal());
        assert!(!WindowError::creation_failed("x").is_fatal());
        assert!(!WindowError::window_not_found("win-1").is_fatal());
        assert!(!WindowError::invalid_config("x").is_fatal());
    }

    #[test]
    fn test_visibility_serialization() {
        let json = serde_json::to_string(&Visibility::Minimized).unwrap();
        assert_eq!(json, "\"minimized\"");
        let parsed: Visibility = serde_json::from_str("\"shown\"").unwrap();
        assert_eq!(parsed, Visibility::Shown);
    }

    #[test]
    fn test_primary_state() {
        let mut state = PrimaryState::default();
        assert!(!state.exists());
        assert_eq!(state.window_id(), None);

        state = PrimaryState::Creating;
        assert!(state.exists());
        assert_eq!(state.window_id(), None);

        state = PrimaryState::Open("win-1".to_string());
        assert!(state.exists());
        assert_eq!(state.window_id(), Some("win-1"));
    }
}
