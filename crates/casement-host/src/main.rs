//! Casement Host - Desktop shell host over a loopback surface backend
//!
//! The host binary wires the shell crates into a runnable process: it loads
//! `manifest.app.toml`, takes the single-instance lock, builds the window
//! manager over an in-process surface host, and drives everything from one
//! control loop on a current-thread tokio runtime.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌───────────────────────────────┐
//!                 │      Controller::run loop     │
//!                 │   (current-thread tokio rt)   │
//!                 └───────────────▲───────────────┘
//!                                 │ ShellEvent queue
//!        ┌───────────────┬────────┴───────┬───────────────┐
//!        │               │                │               │
//! ┌──────┴───────┐ ┌─────┴──────┐ ┌───────┴──────┐ ┌──────┴───────┐
//! │   Loopback   │ │ Window bus │ │  FeedUpdater │ │    Signal    │
//! │   surfaces   │ │ forwarders │ │    events    │ │   watchers   │
//! │ (ready/close)│ │   (ipc)    │ │              │ │ (INT / TERM) │
//! └──────────────┘ └────────────┘ └──────────────┘ └──────────────┘
//! ```
//!
//! # Startup Flow
//!
//! 1. **Parse manifest.app.toml** - App identity, window prefs, update feed
//! 2. **Acquire instance lock** - A second instance exits cleanly
//! 3. **Wire the bus** - Inbound window traffic forwards into the loop
//! 4. **Build the updater** - `FeedUpdater` when `[update]` is enabled
//! 5. **Spawn signal watchers** - SIGINT/SIGTERM become Shutdown events
//! 6. **Send Ready** - The platform-ready signal creates the primary window
//! 7. **Run the control loop** - Until shutdown or a fatal lifecycle error
//!
//! # Environment Variables
//!
//! - `CASEMENT_LOG` - Log level (default: "info")
//! - `RUST_BACKTRACE` - Enable backtraces on panic

use anyhow::{Context, Result};
use shell_app::{
    channel, forward_ipc_events, forward_update_events, instance, AppError, Controller,
    ControllerConfig, LifecycleSignal, ShellEvent, UpdateWiring,
};
use shell_ipc::{Endpoint, IpcEvent, DEFAULT_CAPACITY};
use shell_log::{LogLevel, LogSink};
use shell_opener::SystemOpener;
use shell_updater::{FeedUpdater, UpdateConfig, UpdateEvent};
use shell_window::manager::{DEFAULT_HEIGHT, DEFAULT_WIDTH};
use shell_window::{WindowManager, WindowManagerConfig};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

mod config;
mod platform;

use config::Manifest;
use platform::{LoopbackSurfaces, GREETING_CHANNEL};

/// Translate manifest preferences into the window manager's config. Missing
/// dimensions fall back to the manager defaults, the title falls back to the
/// app name, and the host-side bus wiring greets every new window's content.
fn window_config(app_dir: &Path, manifest: &Manifest, start_minimized: bool) -> WindowManagerConfig {
    let wire_bus: Arc<dyn Fn(&mut Endpoint) + Send + Sync> = Arc::new(|bus: &mut Endpoint| {
        bus.listen(GREETING_CHANNEL, |_ctx, payload| {
            tracing::info!("Content connected: {}", payload);
        });
    });

    WindowManagerConfig {
        app_name: manifest
            .window
            .title
            .clone()
            .unwrap_or_else(|| manifest.app.name.clone()),
        entry_url: manifest.content.url.clone(),
        width: manifest.window.width.unwrap_or(DEFAULT_WIDTH),
        height: manifest.window.height.unwrap_or(DEFAULT_HEIGHT),
        icon_path: manifest.window.icon.as_ref().map(|p| app_dir.join(p)),
        start_minimized: start_minimized || manifest.window.start_minimized,
        wire_bus: Some(wire_bus),
    }
}

/// Build the update delegate and its event path when the manifest enables
/// updates. The returned wiring is consumed by the controller on the primary
/// window's first presentation.
fn update_wiring(
    manifest: &Manifest,
    shell_tx: &mpsc::Sender<ShellEvent>,
) -> Result<Option<UpdateWiring>> {
    let Some(update) = manifest.update.as_ref().filter(|u| u.enabled) else {
        return Ok(None);
    };

    let updater = FeedUpdater::new(UpdateConfig {
        source: update.source.clone(),
        current_version: manifest.app.version.clone(),
        include_prereleases: update.include_prereleases,
    })
    .context("building the update feed client")?;

    let (update_tx, update_rx) = tokio::sync::mpsc::channel::<UpdateEvent>(16);
    tokio::spawn(forward_update_events(update_rx, shell_tx.clone()));

    Ok(Some(UpdateWiring {
        delegate: Arc::new(updater),
        events: update_tx,
    }))
}

/// SIGINT and SIGTERM become shutdown events on the shell queue.
#[cfg(unix)]
fn spawn_signal_watchers(shell_tx: mpsc::Sender<ShellEvent>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    for kind in [SignalKind::interrupt(), SignalKind::terminate()] {
        let mut stream = signal(kind).context("installing signal handler")?;
        let tx = shell_tx.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                if tx.send(ShellEvent::Shutdown).await.is_err() {
                    break;
                }
            }
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_watchers(shell_tx: mpsc::Sender<ShellEvent>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shell_tx.send(ShellEvent::Shutdown).await;
        }
    });
    Ok(())
}

fn main() -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create tokio runtime");

    let _guard = rt.enter();

    sync_main(rt)
}

fn sync_main(rt: tokio::runtime::Runtime) -> Result<()> {
    // Initialize tracing with env-filter support
    // Use CASEMENT_LOG env var for log level configuration, default to "info"
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("CASEMENT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    // Parse args: --app-dir <dir> --start-minimized
    let mut args = env::args().skip(1);
    let mut app_dir: Option<PathBuf> = None;
    let mut start_minimized = false;
    while let Some(a) = args.next() {
        match a.as_str() {
            "--app-dir" => {
                app_dir = Some(PathBuf::from(
                    args.next().expect("--app-dir requires a path"),
                ));
            }
            "--start-minimized" => {
                start_minimized = true;
            }
            _ => {}
        }
    }

    let Some(app_dir) = app_dir else {
        anyhow::bail!("Usage: casement-host --app-dir <path> [--start-minimized]");
    };

    let manifest = rt.block_on(config::load_manifest(&app_dir))?;

    tracing::info!(
        "Starting app: {} v{}",
        manifest.app.name,
        manifest.app.version
    );

    // Held for the whole run; dropping it removes the lock file.
    let _instance_lock = if manifest.app.single_instance {
        match instance::acquire(&manifest.app.identifier) {
            Ok(lock) => Some(lock),
            Err(AppError::AlreadyRunning { message, .. }) => {
                tracing::info!("Another instance is already running, exiting: {}", message);
                return Ok(());
            }
            Err(e) => return Err(e).context("acquiring the single instance lock"),
        }
    } else {
        None
    };

    // One queue drives the control loop; every producer below feeds it.
    let (shell_tx, shell_rx) = channel();

    // Inbound window bus traffic, tagged with window ids by the per-window
    // forwarders, merges into the queue here.
    let (ipc_tx, ipc_rx) = tokio::sync::mpsc::channel::<IpcEvent>(DEFAULT_CAPACITY);
    tokio::spawn(forward_ipc_events(ipc_rx, shell_tx.clone()));

    let manager = WindowManager::new(
        window_config(&app_dir, &manifest, start_minimized),
        ipc_tx,
        Arc::new(SystemOpener),
    );

    let updates = update_wiring(&manifest, &shell_tx)?;
    if updates.is_none() {
        tracing::debug!("Updates disabled or not configured");
    }

    let host = LoopbackSurfaces::new(shell_tx.clone());
    let sink = Arc::new(LogSink::new(LogLevel::Warn));

    spawn_signal_watchers(shell_tx.clone())?;

    let mut controller = Controller::new(
        ControllerConfig {
            quit_on_all_closed: manifest.lifecycle.quit_on_all_closed,
        },
        Box::new(host),
        manager,
        sink,
        updates,
        shell_rx,
    );

    // The loopback platform is ready as soon as it exists.
    let _ = shell_tx.try_send(ShellEvent::Lifecycle(LifecycleSignal::Ready));

    rt.block_on(controller.run())
        .context("running the shell control loop")?;

    tracing::info!("Host exiting");
    Ok(())
}
