//! Hands addresses to the user's default browser or mail client.

use tracing::{debug, error};

// ============================================================================
// Error Types (8200+ range)
// ============================================================================

/// Error codes for external-open operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OpenerErrorCode {
    /// Failed to hand the URL to the platform opener
    OpenFailed = 8200,
    /// URL scheme is not allowed
    SchemeNotAllowed = 8201,
}

#[derive(Debug, thiserror::Error)]
pub enum OpenerError {
    #[error("[{code}] Failed to open externally: {message}")]
    OpenFailed { code: u32, message: String },

    #[error("[{code}] Scheme not allowed: {url}")]
    SchemeNotAllowed { code: u32, url: String },
}

impl OpenerError {
    pub fn open_failed(message: impl Into<String>) -> Self {
        Self::OpenFailed {
            code: OpenerErrorCode::OpenFailed as u32,
            message: message.into(),
        }
    }

    pub fn scheme_not_allowed(url: impl Into<String>) -> Self {
        Self::SchemeNotAllowed {
            code: OpenerErrorCode::SchemeNotAllowed as u32,
            url: url.into(),
        }
    }
}

// ============================================================================
// Opener
// ============================================================================

/// External-link handler. Window code routes denied popup navigations here
/// instead of creating in-app surfaces.
pub trait ExternalOpener: Send + Sync + 'static {
    fn open_external(&self, url: &str) -> Result<(), OpenerError>;
}

/// Only web and mail addresses may leave the app.
pub fn validate_url(url: &str) -> Result<(), OpenerError> {
    if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("mailto:") {
        Ok(())
    } else {
        Err(OpenerError::scheme_not_allowed(url))
    }
}

/// Opener backed by the platform's default handler.
pub struct SystemOpener;

impl ExternalOpener for SystemOpener {
    fn open_external(&self, url: &str) -> Result<(), OpenerError> {
        validate_url(url)?;
        debug!("Opening external URL: {}", url);
        open::that(url).map_err(|e| {
            error!("Failed to open URL {}: {}", url, e);
            OpenerError::open_failed(e.to_string())
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
