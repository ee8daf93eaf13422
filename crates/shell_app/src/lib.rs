//! Application controller for casement shells
//!
//! Binds platform lifecycle signals to the rest of the shell:
//! - "ready" creates the primary window through the lifecycle manager
//! - "reactivate" re-creates it once no window is left
//! - "all windows closed" terminates or stays resident per configuration
//! - the primary window's first presentation starts the run's single
//!   update check
//! - single instance locking
//!
//! Error codes: 8300-8319

pub mod controller;
pub mod instance;

pub use controller::{
    channel, forward_ipc_events, forward_update_events, Controller, ControllerConfig, UpdateWiring,
};
pub use instance::InstanceLock;

use shell_ipc::IpcEvent;
use shell_updater::UpdateEvent;
use shell_window::{PrimaryState, SurfaceEvent};

// ============================================================================
// Error Types
// ============================================================================

/// Error codes for application lifecycle operations (8300-8319)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorCode {
    /// Single instance lock failed (8300)
    LockFailed = 8300,
    /// Another instance already holds the lock (8301)
    AlreadyRunning = 8301,
    /// A window lifecycle invariant broke at run time (8302)
    LifecycleFatal = 8302,
}

impl std::fmt::Display for AppErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as i32)
    }
}

/// Errors that can occur during application lifecycle handling
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("[{code}] Single instance lock failed: {message}")]
    LockFailed { code: AppErrorCode, message: String },

    #[error("[{code}] Another instance is already running: {message}")]
    AlreadyRunning { code: AppErrorCode, message: String },

    #[error("[{code}] Window lifecycle invariant broken: {message}")]
    LifecycleFatal { code: AppErrorCode, message: String },
}

impl AppError {
    pub fn lock_failed(message: impl Into<String>) -> Self {
        Self::LockFailed {
            code: AppErrorCode::LockFailed,
            message: message.into(),
        }
    }

    pub fn already_running(message: impl Into<String>) -> Self {
        Self::AlreadyRunning {
            code: AppErrorCode::AlreadyRunning,
            message: message.into(),
        }
    }

    pub fn lifecycle_fatal(message: impl Into<String>) -> Self {
        Self::LifecycleFatal {
            code: AppErrorCode::LifecycleFatal,
            message: message.into(),
        }
    }
}

// ============================================================================
// Run State
// ============================================================================

/// Platform lifecycle signals delivered by the host adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Platform initialization finished; windows may now be created.
    Ready,
    /// The user re-engaged the application (dock click, second launch).
    Reactivated,
}

/// Top-level phase of one application run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    /// Before the platform ready signal. Reactivation is ignored here.
    #[default]
    NotReady,
    /// Ready handled; zero or more windows may exist.
    Ready,
    /// Shutting down; the event loop ends after the current event.
    Terminating,
}

/// Run state owned by the controller.
///
/// The primary reference is passed by mutable borrow into window lifecycle
/// handling, so the closed observer clears it synchronously and the next
/// reactivate check reads the cleared value. Both run on the control
/// thread.
#[derive(Debug, Default)]
pub struct RunState {
    pub phase: RunPhase,
    pub primary: PrimaryState,
}

// ============================================================================
// Shell Events
// ============================================================================

/// Events merged into the single control-loop queue.
///
/// Every producer (surface host adapter, bus forwarders, update tasks, the
/// signal handler) sends into one queue, and the controller consumes it on
/// one thread, so no two handlers ever run concurrently.
#[derive(Debug)]
pub enum ShellEvent {
    /// Platform lifecycle signal
    Lifecycle(LifecycleSignal),
    /// Surface lifecycle notification from the windowing host
    Surface(SurfaceEvent),
    /// Inbound bus message, tagged with its window id
    Ipc(IpcEvent),
    /// Progress from the update cycle
    Update(UpdateEvent),
    /// SIGINT/SIGTERM or a host-requested stop
    Shutdown,
}

// ============================================================================
// Tests
// ============================================================================
