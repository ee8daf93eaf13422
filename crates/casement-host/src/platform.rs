//! Loopback surface host: an in-process stand-in for a native windowing
//! backend.
//!
//! Surfaces have no pixels here. Creation is immediate, "visually ready"
//! fires right after it through the shell event queue, and the content side
//! of each window bus is driven by a spawned harness task that plays the
//! content process: it greets the host once, answers `app:echo` requests on
//! the same channel, and turns `app:open-docs` requests into popup events so
//! the external-navigation guard has something to catch.

use shell_app::ShellEvent;
use shell_ipc::Endpoint;
use shell_window::{
    SurfaceDesc, SurfaceEvent, SurfaceHost, SurfaceKey, Visibility, WindowError,
};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Request/reply demonstration channel. Replies echo the request payload.
pub const ECHO_CHANNEL: &str = "app:echo";
/// One-way hello the harness sends after startup.
pub const GREETING_CHANNEL: &str = "app:greeting";
/// Asks for a URL to be opened outside the app.
pub const OPEN_DOCS_CHANNEL: &str = "app:open-docs";

struct SurfaceState {
    window_id: String,
    visibility: Visibility,
}

/// In-process [`SurfaceHost`]. Keyed surfaces carry only an id and a
/// visibility; lifecycle events go out through the shell event queue the
/// same way a native backend would post them.
pub struct LoopbackSurfaces {
    next_key: u64,
    surfaces: HashMap<SurfaceKey, SurfaceState>,
    shell_tx: mpsc::Sender<ShellEvent>,
}

impl LoopbackSurfaces {
    pub fn new(shell_tx: mpsc::Sender<ShellEvent>) -> Self {
        Self {
            next_key: 0,
            surfaces: HashMap::new(),
            shell_tx,
        }
    }

    /// Wire the content harness onto the content-side endpoint and hand the
    /// endpoint to a pump task. The harness holds the endpoint alive for the
    /// surface's lifetime; dropping it ends the window's bus.
    fn spawn_content_harness(&self, key: SurfaceKey, mut content: Endpoint, window_id: &str) {
        content.listen(ECHO_CHANNEL, |ctx, payload| {
            if let Err(e) = ctx.reply(payload) {
                debug!(error = %e, "Echo reply dropped");
            }
        });

        let popup_tx = self.shell_tx.clone();
        content.listen(OPEN_DOCS_CHANNEL, move |_ctx, payload| {
            let Some(url) = payload.get("url").and_then(|v| v.as_str()) else {
                debug!("Open request without a url field, dropping");
                return;
            };
            let _ = popup_tx.try_send(ShellEvent::Surface(SurfaceEvent::PopupRequested {
                key,
                url: url.to_string(),
            }));
        });

        if let Err(e) = content.send(
            GREETING_CHANNEL,
            serde_json::json!({ "window": window_id }),
        ) {
            debug!(window_id = %window_id, error = %e, "Greeting dropped");
        }

        tokio::spawn(async move {
            content.pump().await;
        });
    }

    fn state_mut(&mut self, key: SurfaceKey) -> Result<&mut SurfaceState, WindowError> {
        self.surfaces
            .get_mut(&key)
            .ok_or_else(|| WindowError::window_not_found(format!("surface {}", key.0)))
    }
}

impl SurfaceHost for LoopbackSurfaces {
    fn create_surface(&mut self, desc: SurfaceDesc) -> Result<SurfaceKey, WindowError> {
        self.next_key += 1;
        let key = SurfaceKey(self.next_key);

        self.spawn_content_harness(key, desc.content_bus, &desc.window_id);
        info!(window_id = %desc.window_id, url = %desc.url, "Loopback surface created");

        self.surfaces.insert(
            key,
            SurfaceState {
                window_id: desc.window_id,
                visibility: Visibility::Hidden,
            },
        );

        // First paint is immediate for a loopback surface; the event still
        // goes through the queue so presentation happens on the control loop.
        let _ = self
            .shell_tx
            .try_send(ShellEvent::Surface(SurfaceEvent::Ready(key)));
        Ok(key)
    }

    fn show_surface(&mut self, key: SurfaceKey) -> Result<(), WindowError> {
        let state = self.state_mut(key)?;
        state.visibility = Visibility::Shown;
        debug!(window_id = %state.window_id, "Loopback surface shown");
        Ok(())
    }

    fn minimize_surface(&mut self, key: SurfaceKey) -> Result<(), WindowError> {
        let state = self.state_mut(key)?;
        state.visibility = Visibility::Minimized;
        debug!(window_id = %state.window_id, "Loopback surface minimized");
        Ok(())
    }

    fn close_surface(&mut self, key: SurfaceKey) -> Result<(), WindowError> {
        let state = self
            .surfaces
            .remove(&key)
            .ok_or_else(|| WindowError::window_not_found(format!("surface {}", key.0)))?;
        debug!(window_id = %state.window_id, "Loopback surface closed");
        let _ = self
            .shell_tx
            .try_send(ShellEvent::Surface(SurfaceEvent::Closed(key)));
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
