//! WindowManager - lifecycle logic on top of the platform surface seam.
//!
//! The application controller creates a WindowManager and calls its
//! methods from the control loop. The manager owns every window handle,
//! wires a fresh bus pair into each created window, and enforces the
//! show-once/release-once discipline.

use crate::{
    PrimaryState, SurfaceDesc, SurfaceHost, SurfaceKey, Visibility, WindowError, WindowHandle,
};
use shell_ipc::{Endpoint, IpcError, IpcEvent, DEFAULT_CAPACITY};
use shell_opener::ExternalOpener;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const DEFAULT_WIDTH: f64 = 1024.0;
pub const DEFAULT_HEIGHT: f64 = 728.0;

/// Configuration for WindowManager
#[derive(Clone)]
pub struct WindowManagerConfig {
    pub app_name: String,
    /// Content entry point loaded into every window. Required.
    pub entry_url: String,
    pub width: f64,
    pub height: f64,
    pub icon_path: Option<PathBuf>,
    /// Present new windows minimized instead of shown.
    pub start_minimized: bool,
    /// Host-side channel wiring applied to each new window's endpoint.
    pub wire_bus: Option<Arc<dyn Fn(&mut Endpoint) + Send + Sync>>,
}

impl Default for WindowManagerConfig {
    fn default() -> Self {
        Self {
            app_name: "casement".to_string(),
            entry_url: String::new(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            icon_path: None,
            start_minimized: false,
            wire_bus: None,
        }
    }
}

/// WindowManager owns window handles and drives surface lifecycle.
pub struct WindowManager {
    window_counter: u64,
    windows: HashMap<String, WindowHandle>,
    by_surface: HashMap<SurfaceKey, String>,

    config: WindowManagerConfig,

    // Inbound bus traffic, tagged per window, into the control loop
    ipc_tx: mpsc::Sender<IpcEvent>,

    // Denied popup navigations are dispatched here
    opener: Arc<dyn ExternalOpener>,
}

impl WindowManager {
    /// Create a new WindowManager
    pub fn new(
        config: WindowManagerConfig,
        ipc_tx: mpsc::Sender<IpcEvent>,
        opener: Arc<dyn ExternalOpener>,
    ) -> Self {
        Self {
            window_counter: 0,
            windows: HashMap::new(),
            by_surface: HashMap::new(),
            config,
            ipc_tx,
            opener,
        }
    }

    /// Check if all windows are closed
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn visibility(&self, window_id: &str) -> Option<Visibility> {
        self.windows.get(window_id).map(|h| h.visibility)
    }

    // =========================================================================
    // Window Lifecycle
    // =========================================================================

    /// Create the primary window: a hidden surface with a fresh bus pair.
    ///
    /// The content side of the pair travels to the platform inside the
    /// surface description; the host side stays on the handle, with a
    /// forwarder task draining its inbound queue into the control loop.
    pub fn create_window(
        &mut self,
        host: &mut dyn SurfaceHost,
        primary: &mut PrimaryState,
    ) -> Result<String, WindowError> {
        if self.config.entry_url.is_empty() {
            return Err(WindowError::invalid_config("entry_url must be set"));
        }
        if primary.exists() {
            warn!("Primary window already exists, refusing to create another");
            return Err(WindowError::creation_failed(
                "primary window already exists",
            ));
        }

        *primary = PrimaryState::Creating;

        self.window_counter += 1;
        let win_id = format!("win-{}", self.window_counter);

        let (mut host_end, content_end) = Endpoint::pair(DEFAULT_CAPACITY);
        if let Some(wire) = &self.config.wire_bus {
            wire(&mut host_end);
        }

        let desc = SurfaceDesc {
            window_id: win_id.clone(),
            title: self.config.app_name.clone(),
            url: self.config.entry_url.clone(),
            width: self.config.width,
            height: self.config.height,
            icon_path: self.config.icon_path.clone(),
            content_bus: content_end,
        };

        let key = match host.create_surface(desc) {
            Ok(key) => key,
            Err(e) => {
                *primary = PrimaryState::Absent;
                warn!(window_id = %win_id, error = %e, "Window creation rejected by platform");
                return Err(e);
            }
        };

        // Tag inbound envelopes with the window id and hand them to the
        // control loop; the task ends when the content side goes away.
        if let Some(mut rx) = host_end.take_receiver() {
            let ipc_tx = self.ipc_tx.clone();
            let window_id = win_id.clone();
            tokio::spawn(async move {
                while let Some(envelope) = rx.recv().await {
                    if ipc_tx
                        .send(IpcEvent {
                            window_id: window_id.clone(),
                            envelope,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });
        }

        self.by_surface.insert(key, win_id.clone());
        self.windows.insert(
            win_id.clone(),
            WindowHandle {
                id: win_id.clone(),
                surface: key,
                visibility: Visibility::Hidden,
                primary: true,
                presented: false,
                bus: host_end,
            },
        );

        *primary = PrimaryState::Open(win_id.clone());
        info!(window_id = %win_id, url = %self.config.entry_url, "Created window (hidden)");
        Ok(win_id)
    }

    /// Close every live surface. Called at shutdown; the platform's
    /// closed events then release the handles.
    pub fn close_all(&self, host: &mut dyn SurfaceHost) {
        for handle in self.windows.values() {
            debug!(window_id = %handle.id, "Closing window");
            if let Err(e) = host.close_surface(handle.surface) {
                warn!(window_id = %handle.id, error = %e, "Close failed");
            }
        }
    }

    // =========================================================================
    // Surface Events (called from the control loop)
    // =========================================================================

    /// Handle the surface's visually-ready signal.
    ///
    /// First signal presents the window (shown, or minimized when the run
    /// configuration says to start minimized) and returns the resulting
    /// visibility. Repeats while the handle exists are ignored. A signal
    /// for a released handle is a broken invariant and comes back as the
    /// fatal [`WindowError::HandleReleased`].
    pub fn handle_surface_ready(
        &mut self,
        host: &mut dyn SurfaceHost,
        key: SurfaceKey,
    ) -> Result<Option<Visibility>, WindowError> {
        let win_id = match self.by_surface.get(&key) {
            Some(id) => id.clone(),
            None => {
                return Err(WindowError::handle_released(format!(
                    "visually-ready for released surface {}",
                    key.0
                )));
            }
        };
        let start_minimized = self.config.start_minimized;
        let handle = match self.windows.get_mut(&win_id) {
            Some(handle) => handle,
            None => {
                return Err(WindowError::handle_released(format!(
                    "visually-ready for released window {win_id}"
                )));
            }
        };

        if handle.presented {
            debug!(window_id = %win_id, "Duplicate visually-ready signal, ignoring");
            return Ok(None);
        }
        handle.presented = true;

        let visibility = if start_minimized {
            host.minimize_surface(key)?;
            Visibility::Minimized
        } else {
            host.show_surface(key)?;
            Visibility::Shown
        };
        handle.visibility = visibility;
        info!(window_id = %win_id, visibility = ?visibility, "Window presented");
        Ok(Some(visibility))
    }

    /// Release the handle for a closed surface.
    ///
    /// Clears the primary reference and drops the handle (and with it the
    /// host side of the bus pair). Safe to call again for the same surface;
    /// the repeat is a no-op. Returns the released window id, if any.
    pub fn handle_surface_closed(
        &mut self,
        key: SurfaceKey,
        primary: &mut PrimaryState,
    ) -> Option<String> {
        let win_id = match self.by_surface.remove(&key) {
            Some(id) => id,
            None => {
                debug!(surface = key.0, "Close for unknown surface, ignoring");
                return None;
            }
        };

        if let Some(handle) = self.windows.remove(&win_id) {
            if handle.primary {
                *primary = PrimaryState::Absent;
            }
        }
        info!(window_id = %win_id, "Window closed, handle released");
        Some(win_id)
    }

    /// Content asked for a new top-level surface: deny it and send the
    /// address to the external opener instead.
    pub fn handle_popup_requested(&self, key: SurfaceKey, url: &str) {
        let window_id = self.by_surface.get(&key).cloned();
        info!(
            window_id = ?window_id,
            url = %url,
            "Denying in-app surface, dispatching URL externally"
        );
        if let Err(e) = self.opener.open_external(url) {
            error!(url = %url, error = %e, "External open failed");
        }
    }

    // =========================================================================
    // Bus Plumbing
    // =========================================================================

    /// Run the registered host-side handler for an inbound envelope.
    /// Envelopes for released windows are dropped.
    pub fn dispatch_inbound(&mut self, event: IpcEvent) -> bool {
        match self.windows.get_mut(&event.window_id) {
            Some(handle) => handle.bus.dispatch(event.envelope),
            None => {
                debug!(
                    window_id = %event.window_id,
                    channel = %event.envelope.channel,
                    "Message for released window, dropping"
                );
                false
            }
        }
    }

    /// Send to one window's content process.
    pub fn send_to_window(
        &self,
        window_id: &str,
        channel: &str,
        payload: serde_json::Value,
    ) -> Result<(), IpcError> {
        match self.windows.get(window_id) {
            Some(handle) => handle.bus.send(channel, payload),
            None => Err(IpcError::window_not_found(window_id)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
