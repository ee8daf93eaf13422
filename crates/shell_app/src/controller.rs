//! Top-level control loop.
//!
//! One merged event queue, one consumer. [`Controller::run`] dequeues
//! shell events and drives the window lifecycle manager, the bus and the
//! update session from a single thread.

use std::sync::Arc;

use shell_ipc::IpcEvent;
use shell_log::LogSink;
use shell_updater::{start_update_check, UpdateDelegate, UpdateEvent, UpdateSession};
use shell_window::{SurfaceEvent, SurfaceHost, WindowManager};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{AppError, LifecycleSignal, RunPhase, RunState, ShellEvent};

/// Capacity of the merged shell event queue
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Create the shell event channel consumed by [`Controller::run`].
pub fn channel() -> (mpsc::Sender<ShellEvent>, mpsc::Receiver<ShellEvent>) {
    mpsc::channel(DEFAULT_EVENT_CAPACITY)
}

/// Forward tagged bus messages into the shell queue.
///
/// Hosts spawn this next to the controller; it ends when either side of
/// the pipe goes away.
pub async fn forward_ipc_events(
    mut inbound: mpsc::Receiver<IpcEvent>,
    shell_tx: mpsc::Sender<ShellEvent>,
) {
    while let Some(event) = inbound.recv().await {
        if shell_tx.send(ShellEvent::Ipc(event)).await.is_err() {
            break;
        }
    }
}

/// Forward update-cycle events into the shell queue.
pub async fn forward_update_events(
    mut updates: mpsc::Receiver<UpdateEvent>,
    shell_tx: mpsc::Sender<ShellEvent>,
) {
    while let Some(event) = updates.recv().await {
        if shell_tx.send(ShellEvent::Update(event)).await.is_err() {
            break;
        }
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Update wiring handed to the controller at construction: the delegate
/// that runs the cycle plus the queue its events enter the loop through.
/// Consumed when the check starts, which is what bounds it to once per
/// run.
pub struct UpdateWiring {
    pub delegate: Arc<dyn UpdateDelegate>,
    pub events: mpsc::Sender<UpdateEvent>,
}

/// Configuration for the application controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Quit once the last window closes; false keeps the process resident
    /// awaiting reactivation.
    pub quit_on_all_closed: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            quit_on_all_closed: true,
        }
    }
}

/// Application controller: binds lifecycle signals to windows, bus and
/// updates. Owns the run state and at most one update session per run.
pub struct Controller {
    config: ControllerConfig,
    host: Box<dyn SurfaceHost>,
    manager: WindowManager,
    state: RunState,
    sink: Arc<LogSink>,
    updates: Option<UpdateWiring>,
    session: Option<UpdateSession>,
    events: mpsc::Receiver<ShellEvent>,
}

impl Controller {
    pub fn new(
        config: ControllerConfig,
        host: Box<dyn SurfaceHost>,
        manager: WindowManager,
        sink: Arc<LogSink>,
        updates: Option<UpdateWiring>,
        events: mpsc::Receiver<ShellEvent>,
    ) -> Self {
        Self {
            config,
            host,
            manager,
            state: RunState::default(),
            sink,
            updates,
            session: None,
            events,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn window_count(&self) -> usize {
        self.manager.window_count()
    }

    /// Observer handle for the run's update session, once one has started.
    pub fn update_session(&self) -> Option<&UpdateSession> {
        self.session.as_ref()
    }

    // =========================================================================
    // Event Loop
    // =========================================================================

    /// Consume the shell queue until shutdown.
    ///
    /// Returns when a shutdown event arrives, when every producer is gone,
    /// or with the fatal lifecycle error.
    pub async fn run(&mut self) -> Result<(), AppError> {
        info!("Control loop started");
        while let Some(event) = self.events.recv().await {
            self.handle_event(event)?;
            if self.state.phase == RunPhase::Terminating {
                break;
            }
        }
        info!("Control loop ended");
        Ok(())
    }

    /// Handle one shell event. [`Controller::run`] calls this for every
    /// dequeued event; hosts embedding the controller in an existing loop
    /// can call it directly.
    pub fn handle_event(&mut self, event: ShellEvent) -> Result<(), AppError> {
        match event {
            ShellEvent::Lifecycle(signal) => self.handle_lifecycle(signal),
            ShellEvent::Surface(event) => self.handle_surface(event)?,
            ShellEvent::Ipc(event) => {
                self.manager.dispatch_inbound(event);
            }
            ShellEvent::Update(event) => self.handle_update(event),
            ShellEvent::Shutdown => {
                info!("Shutdown requested");
                self.manager.close_all(self.host.as_mut());
                self.state.phase = RunPhase::Terminating;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Lifecycle Signals
    // =========================================================================

    fn handle_lifecycle(&mut self, signal: LifecycleSignal) {
        match signal {
            LifecycleSignal::Ready => {
                if self.state.phase != RunPhase::NotReady {
                    debug!("Duplicate ready signal, ignoring");
                    return;
                }
                self.state.phase = RunPhase::Ready;
                info!("Platform ready");
                self.create_primary();
            }
            LifecycleSignal::Reactivated => {
                if self.state.phase != RunPhase::Ready {
                    debug!("Reactivation outside the ready phase, ignoring");
                    return;
                }
                if self.state.primary.exists() {
                    debug!("Reactivated with a live primary window, nothing to do");
                    return;
                }
                info!("Reactivated with no windows, creating the primary window");
                self.create_primary();
            }
        }
    }

    /// Ask the manager for the primary window. A platform rejection is
    /// recorded and absorbed; the run continues without a window.
    fn create_primary(&mut self) {
        match self
            .manager
            .create_window(self.host.as_mut(), &mut self.state.primary)
        {
            Ok(window_id) => {
                debug!(window_id = %window_id, "Primary window requested");
            }
            Err(e) => {
                self.sink.error(&format!("Window creation failed: {}", e));
                warn!(error = %e, "Window creation failed, continuing without a window");
            }
        }
    }

    // =========================================================================
    // Surface Events
    // =========================================================================

    fn handle_surface(&mut self, event: SurfaceEvent) -> Result<(), AppError> {
        match event {
            SurfaceEvent::Ready(key) => {
                match self.manager.handle_surface_ready(self.host.as_mut(), key) {
                    Ok(Some(_)) => self.maybe_start_update_check(),
                    Ok(None) => {}
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "Broken window lifecycle invariant, aborting run");
                        return Err(AppError::lifecycle_fatal(e.to_string()));
                    }
                    Err(e) => {
                        warn!(error = %e, "Could not present window");
                    }
                }
            }
            SurfaceEvent::Closed(key) => {
                self.manager
                    .handle_surface_closed(key, &mut self.state.primary);
                if self.manager.is_empty() {
                    self.handle_all_closed();
                }
            }
            SurfaceEvent::PopupRequested { key, url } => {
                self.manager.handle_popup_requested(key, &url);
            }
        }
        Ok(())
    }

    fn handle_all_closed(&mut self) {
        if self.config.quit_on_all_closed {
            info!("All windows closed, terminating");
            self.state.phase = RunPhase::Terminating;
        } else {
            info!("All windows closed, staying resident");
        }
    }

    // =========================================================================
    // Updates
    // =========================================================================

    /// Start the run's single update check on the primary window's first
    /// presentation. Later presentations find the wiring consumed.
    fn maybe_start_update_check(&mut self) {
        if self.session.is_some() {
            return;
        }
        let Some(wiring) = self.updates.take() else {
            debug!("No updater configured, skipping update check");
            return;
        };
        self.session = Some(start_update_check(
            self.sink.clone(),
            wiring.delegate,
            wiring.events,
        ));
    }

    fn handle_update(&mut self, event: UpdateEvent) {
        match &self.session {
            Some(session) => session.apply(event),
            None => warn!(event = ?event, "Update event without an active session, dropping"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shell_ipc::{Endpoint, Envelope};
    use shell_log::{LogLevel, LogSink};
    use shell_opener::{ExternalOpener, OpenerError};
    use shell_updater::UpdatePhase;
    use shell_window::{SurfaceDesc, SurfaceKey, WindowError, WindowManagerConfig};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SurfaceLog {
        created: Arc<Mutex<Vec<String>>>,
        shows: Arc<Mutex<Vec<u64>>>,
        minimizes: Arc<Mutex<Vec<u64>>>,
        closes: Arc<Mutex<Vec<u64>>>,
        fail_creation: Arc<AtomicBool>,
    }

    #[derive(Default)]
    struct FakeSurfaces {
        next_key: u64,
        log: SurfaceLog,
        // Keeps the content sides alive so the bus pairs stay open.
        content_ends: Vec<Endpoint>,
    }

    impl SurfaceHost for FakeSurfaces {
        fn create_surface(&mut self, desc: SurfaceDesc) -> Result<SurfaceKey, WindowError> {
            if self.log.fail_creation.load(Ordering::SeqCst) {
                return Err(WindowError::creation_failed("platform refused"));
            }
            self.next_key += 1;
            self.log.created.lock().unwrap().push(desc.window_id);
            self.content_ends.push(desc.content_bus);
            Ok(SurfaceKey(self.next_key))
        }

        fn show_surface(&mut self, key: SurfaceKey) -> Result<(), WindowError> {
            self.log.shows.lock().unwrap().push(key.0);
            Ok(())
        }

        fn minimize_surface(&mut self, key: SurfaceKey) -> Result<(), WindowError> {
            self.log.minimizes.lock().unwrap().push(key.0);
            Ok(())
        }

        fn close_surface(&mut self, key: SurfaceKey) -> Result<(), WindowError> {
            self.log.closes.lock().unwrap().push(key.0);
            Ok(())
        }
    }

    struct RecordingOpener {
        opened: Arc<Mutex<Vec<String>>>,
    }

    impl ExternalOpener for RecordingOpener {
        fn open_external(&self, url: &str) -> Result<(), OpenerError> {
            self.opened.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    struct StubDelegate {
        calls: Arc<AtomicUsize>,
        outcome: Mutex<Option<UpdateEvent>>,
    }

    impl UpdateDelegate for StubDelegate {
        fn check_and_notify(self: Arc<Self>, events: mpsc::Sender<UpdateEvent>) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(event) = self.outcome.lock().unwrap().take() {
                let _ = events.try_send(event);
            }
        }
    }

    struct TestShell {
        controller: Controller,
        tx: mpsc::Sender<ShellEvent>,
        #[allow(dead_code)]
        ipc_rx: mpsc::Receiver<IpcEvent>,
        log: SurfaceLog,
        opened: Arc<Mutex<Vec<String>>>,
    }

    fn build_shell(
        quit_on_all_closed: bool,
        updates: Option<UpdateWiring>,
        wire_bus: Option<Arc<dyn Fn(&mut Endpoint) + Send + Sync>>,
    ) -> TestShell {
        let log = SurfaceLog::default();
        let host = FakeSurfaces {
            log: log.clone(),
            ..FakeSurfaces::default()
        };
        let opened = Arc::new(Mutex::new(Vec::new()));
        let opener = Arc::new(RecordingOpener {
            opened: opened.clone(),
        });
        let (ipc_tx, ipc_rx) = mpsc::channel(16);
        let manager = WindowManager::new(
            WindowManagerConfig {
                entry_url: "app://index.html".to_string(),
                wire_bus,
                ..WindowManagerConfig::default()
            },
            ipc_tx,
            opener,
        );
        let (tx, rx) = channel();
        let controller = Controller::new(
            ControllerConfig { quit_on_all_closed },
            Box::new(host),
            manager,
            Arc::new(LogSink::new(LogLevel::Warn)),
            updates,
            rx,
        );
        TestShell {
            controller,
            tx,
            ipc_rx,
            log,
            opened,
        }
    }

    fn ready() -> ShellEvent {
        ShellEvent::Lifecycle(LifecycleSignal::Ready)
    }

    fn reactivated() -> ShellEvent {
        ShellEvent::Lifecycle(LifecycleSignal::Reactivated)
    }

    #[test]
    fn test_controller_config_defaults() {
        let config = ControllerConfig::default();
        assert!(config.quit_on_all_closed);
    }

    #[tokio::test]
    async fn ready_creates_the_primary_window() {
        let mut shell = build_shell(true, None, None);
        shell.controller.handle_event(ready()).unwrap();

        assert_eq!(*shell.log.created.lock().unwrap(), vec!["win-1"]);
        assert_eq!(shell.controller.state().phase, RunPhase::Ready);
        assert!(shell.controller.state().primary.exists());
        assert_eq!(shell.controller.window_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_ready_is_ignored() {
        let mut shell = build_shell(true, None, None);
        shell.controller.handle_event(ready()).unwrap();
        shell.controller.handle_event(ready()).unwrap();

        assert_eq!(shell.log.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reactivation_before_ready_is_ignored() {
        let mut shell = build_shell(true, None, None);
        shell.controller.handle_event(reactivated()).unwrap();

        assert!(shell.log.created.lock().unwrap().is_empty());
        assert_eq!(shell.controller.state().phase, RunPhase::NotReady);
    }

    #[tokio::test]
    async fn reactivation_with_live_window_creates_nothing() {
        let mut shell = build_shell(true, None, None);
        shell.controller.handle_event(ready()).unwrap();
        shell.controller.handle_event(reactivated()).unwrap();

        assert_eq!(shell.log.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reactivation_after_close_creates_exactly_one_window() {
        let mut shell = build_shell(false, None, None);
        shell.controller.handle_event(ready()).unwrap();
        shell
            .controller
            .handle_event(ShellEvent::Surface(SurfaceEvent::Ready(SurfaceKey(1))))
            .unwrap();
        shell
            .controller
            .handle_event(ShellEvent::Surface(SurfaceEvent::Closed(SurfaceKey(1))))
            .unwrap();

        assert_eq!(shell.controller.window_count(), 0);
        assert!(!shell.controller.state().primary.exists());
        assert_eq!(shell.controller.state().phase, RunPhase::Ready);

        shell.controller.handle_event(reactivated()).unwrap();
        shell.controller.handle_event(reactivated()).unwrap();

        assert_eq!(*shell.log.created.lock().unwrap(), vec!["win-1", "win-2"]);
    }

    #[tokio::test]
    async fn window_creation_failure_is_absorbed() {
        let mut shell = build_shell(true, None, None);
        shell.log.fail_creation.store(true, Ordering::SeqCst);
        shell.controller.handle_event(ready()).unwrap();

        assert!(shell.log.created.lock().unwrap().is_empty());
        assert_eq!(shell.controller.state().phase, RunPhase::Ready);
        assert!(!shell.controller.state().primary.exists());

        // The platform recovers; reactivation gets a window up.
        shell.log.fail_creation.store(false, Ordering::SeqCst);
        shell.controller.handle_event(reactivated()).unwrap();
        assert_eq!(shell.log.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeated_ready_signals_show_the_window_once() {
        let mut shell = build_shell(true, None, None);
        shell.controller.handle_event(ready()).unwrap();
        shell
            .controller
            .handle_event(ShellEvent::Surface(SurfaceEvent::Ready(SurfaceKey(1))))
            .unwrap();
        shell
            .controller
            .handle_event(ShellEvent::Surface(SurfaceEvent::Ready(SurfaceKey(1))))
            .unwrap();

        assert_eq!(*shell.log.shows.lock().unwrap(), vec![1]);
        assert!(shell.log.minimizes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn all_closed_terminates_when_configured() {
        let mut shell = build_shell(true, None, None);
        shell.controller.handle_event(ready()).unwrap();
        shell
            .controller
            .handle_event(ShellEvent::Surface(SurfaceEvent::Closed(SurfaceKey(1))))
            .unwrap();

        assert_eq!(shell.controller.state().phase, RunPhase::Terminating);
    }

    #[tokio::test]
    async fn all_closed_stays_resident_when_configured() {
        let mut shell = build_shell(false, None, None);
        shell.controller.handle_event(ready()).unwrap();
        shell
            .controller
            .handle_event(ShellEvent::Surface(SurfaceEvent::Closed(SurfaceKey(1))))
            .unwrap();

        assert_eq!(shell.controller.state().phase, RunPhase::Ready);
    }

    #[tokio::test]
    async fn ready_after_release_is_fatal() {
        let mut shell = build_shell(false, None, None);
        shell.controller.handle_event(ready()).unwrap();
        shell
            .controller
            .handle_event(ShellEvent::Surface(SurfaceEvent::Closed(SurfaceKey(1))))
            .unwrap();

        let err = shell
            .controller
            .handle_event(ShellEvent::Surface(SurfaceEvent::Ready(SurfaceKey(1))))
            .unwrap_err();
        assert!(matches!(err, AppError::LifecycleFatal { .. }));
        assert!(err.to_string().contains("8302"));
    }

    #[tokio::test]
    async fn popup_requests_open_externally() {
        let mut shell = build_shell(true, None, None);
        shell.controller.handle_event(ready()).unwrap();
        shell
            .controller
            .handle_event(ShellEvent::Surface(SurfaceEvent::PopupRequested {
                key: SurfaceKey(1),
                url: "https://example.com/docs".to_string(),
            }))
            .unwrap();

        assert_eq!(
            *shell.opened.lock().unwrap(),
            vec!["https://example.com/docs"]
        );
        // The in-app surface was never created.
        assert_eq!(shell.controller.window_count(), 1);
    }

    #[tokio::test]
    async fn first_presentation_starts_one_update_check() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (update_tx, _update_rx) = mpsc::channel(16);
        let wiring = UpdateWiring {
            delegate: Arc::new(StubDelegate {
                calls: calls.clone(),
                outcome: Mutex::new(None),
            }),
            events: update_tx,
        };
        let mut shell = build_shell(false, Some(wiring), None);
        shell.controller.handle_event(ready()).unwrap();
        shell
            .controller
            .handle_event(ShellEvent::Surface(SurfaceEvent::Ready(SurfaceKey(1))))
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            shell.controller.update_session().unwrap().phase(),
            UpdatePhase::Checking
        );

        // A second window later in the run does not start another check.
        shell
            .controller
            .handle_event(ShellEvent::Surface(SurfaceEvent::Closed(SurfaceKey(1))))
            .unwrap();
        shell.controller.handle_event(reactivated()).unwrap();
        shell
            .controller
            .handle_event(ShellEvent::Surface(SurfaceEvent::Ready(SurfaceKey(2))))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn update_events_advance_the_session() {
        let (update_tx, _update_rx) = mpsc::channel(16);
        let wiring = UpdateWiring {
            delegate: Arc::new(StubDelegate {
                calls: Arc::new(AtomicUsize::new(0)),
                outcome: Mutex::new(None),
            }),
            events: update_tx,
        };
        let mut shell = build_shell(true, Some(wiring), None);
        shell.controller.handle_event(ready()).unwrap();
        shell
            .controller
            .handle_event(ShellEvent::Surface(SurfaceEvent::Ready(SurfaceKey(1))))
            .unwrap();
        shell
            .controller
            .handle_event(ShellEvent::Update(UpdateEvent::NotAvailable))
            .unwrap();

        assert_eq!(
            shell.controller.update_session().unwrap().phase(),
            UpdatePhase::NotAvailable
        );
    }

    #[tokio::test]
    async fn update_event_without_session_is_dropped() {
        let mut shell = build_shell(true, None, None);
        shell
            .controller
            .handle_event(ShellEvent::Update(UpdateEvent::NotAvailable))
            .unwrap();

        assert!(shell.controller.update_session().is_none());
    }

    #[tokio::test]
    async fn inbound_bus_messages_reach_the_window_listener() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_handler = seen.clone();
        let wire: Arc<dyn Fn(&mut Endpoint) + Send + Sync> = Arc::new(move |endpoint| {
            let seen = seen_in_handler.clone();
            endpoint.listen("app:ping", move |_ctx, payload| {
                seen.lock().unwrap().push(payload);
            });
        });
        let mut shell = build_shell(true, None, Some(wire));
        shell.controller.handle_event(ready()).unwrap();
        shell
            .controller
            .handle_event(ShellEvent::Ipc(IpcEvent {
                window_id: "win-1".to_string(),
                envelope: Envelope::new("app:ping", json!({ "n": 1 })),
            }))
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![json!({ "n": 1 })]);
    }

    #[tokio::test]
    async fn run_ends_on_shutdown() {
        let mut shell = build_shell(true, None, None);
        shell.tx.send(ready()).await.unwrap();
        shell.tx.send(ShellEvent::Shutdown).await.unwrap();

        shell.controller.run().await.unwrap();

        assert_eq!(shell.controller.state().phase, RunPhase::Terminating);
        assert_eq!(shell.log.created.lock().unwrap().len(), 1);
        assert_eq!(*shell.log.closes.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn run_ends_when_producers_are_gone() {
        let mut shell = build_shell(true, None, None);
        shell.tx.send(ready()).await.unwrap();
        drop(shell.tx);

        shell.controller.run().await.unwrap();

        assert_eq!(shell.controller.state().phase, RunPhase::Ready);
        assert_eq!(shell.log.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_aborts_on_broken_lifecycle_invariant() {
        let mut shell = build_shell(true, None, None);
        shell.tx.send(ready()).await.unwrap();
        shell
            .tx
            .send(ShellEvent::Surface(SurfaceEvent::Ready(SurfaceKey(99))))
            .await
            .unwrap();
        drop(shell.tx);

        let err = shell.controller.run().await.unwrap_err();
        assert!(matches!(err, AppError::LifecycleFatal { .. }));
    }

    // Full path: delegate events travel the update queue, the forwarder,
    // and the shell queue before they land in the session.
    #[tokio::test]
    async fn update_cycle_events_reach_the_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (update_tx, update_rx) = mpsc::channel(16);
        let wiring = UpdateWiring {
            delegate: Arc::new(StubDelegate {
                calls: calls.clone(),
                outcome: Mutex::new(Some(UpdateEvent::NotAvailable)),
            }),
            events: update_tx,
        };
        let mut shell = build_shell(false, Some(wiring), None);
        tokio::spawn(forward_update_events(update_rx, shell.tx.clone()));

        shell.tx.send(ready()).await.unwrap();
        shell
            .tx
            .send(ShellEvent::Surface(SurfaceEvent::Ready(SurfaceKey(1))))
            .await
            .unwrap();
        drop(shell.tx);

        shell.controller.run().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            shell.controller.update_session().unwrap().phase(),
            UpdatePhase::NotAvailable
        );
        assert_eq!(shell.log.shows.lock().unwrap().len(), 1);
    }
}
