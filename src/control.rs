// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The control side of the service: client sessions, the command protocol, the show
//! sequencer and the fan-out of state changes to every connected client.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    dmx::Transmitter,
    playsync::CancelHandle,
    project::Project,
    storage::ProjectStore,
};

mod broadcast;
mod error;
mod handlers;
mod message;
mod monitor;
mod sequencer;
mod session;

pub use error::ControlError;
pub use message::{ChannelState, Command, DmxState, InlineStep, Message, PresetRequest, ShowRequest};
pub use session::{Session, SessionError, SessionRegistry, SessionSink, SessionTiming};

/// Depth of the outbound broadcast queue.
pub const OUTBOUND_QUEUE_DEPTH: usize = 100;

/// How often the monitor publishes `dmx_update`.
pub const MONITOR_INTERVAL: Duration = Duration::from_millis(100);

/// How long a preempted show gets to notice it was cancelled.
pub const SHOW_PREEMPT_GRACE: Duration = Duration::from_millis(50);

/// Pause between passes of a looping show.
pub const SHOW_LOOP_PAUSE: Duration = Duration::from_millis(100);

/// Delay before monitoring restarts after the transmitter is replaced.
pub const MONITOR_RESTART_DELAY: Duration = Duration::from_millis(100);

/// The running show.
struct ShowRun {
    /// Distinguishes this run from any other run, including reruns of the same show.
    generation: u64,
    show_id: String,
    loop_show: bool,
    current_step: usize,
    cancel: CancelHandle,
}

/// Process wide control state: the transmitter, the running show, the active preset and
/// the connected sessions.
pub struct ControlContext {
    transmitter: RwLock<Option<Arc<Transmitter>>>,
    store: Option<Arc<dyn ProjectStore>>,
    show: Mutex<Option<ShowRun>>,
    show_generation: AtomicU64,
    active_preset: RwLock<String>,
    monitor: Mutex<Option<CancelHandle>>,
    sessions: Arc<SessionRegistry>,
    outbound: mpsc::Sender<Message>,
    timing: SessionTiming,
}

impl ControlContext {
    /// Creates the context and starts the broadcaster. Must be called from within a
    /// tokio runtime.
    pub fn new(store: Option<Arc<dyn ProjectStore>>, timing: SessionTiming) -> Arc<ControlContext> {
        let sessions = Arc::new(SessionRegistry::default());
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        broadcast::spawn(sessions.clone(), outbound_rx);

        Arc::new(ControlContext {
            transmitter: RwLock::new(None),
            store,
            show: Mutex::new(None),
            show_generation: AtomicU64::new(0),
            active_preset: RwLock::new(String::new()),
            monitor: Mutex::new(None),
            sessions,
            outbound,
            timing,
        })
    }

    pub fn timing(&self) -> SessionTiming {
        self.timing
    }

    /// The current project, if a store is attached and holds one.
    pub fn project(&self) -> Option<Project> {
        self.store.as_ref().and_then(|store| store.get())
    }

    pub fn transmitter(&self) -> Option<Arc<Transmitter>> {
        self.transmitter.read().clone()
    }

    fn require_transmitter(&self) -> Result<Arc<Transmitter>, ControlError> {
        self.transmitter().ok_or(ControlError::NotInitialized)
    }

    /// Opens the given device, replacing any transmitter already running.
    pub fn initialize_transmitter(self: &Arc<Self>, device: &str) -> Result<(), ControlError> {
        // The old transmitter has to let go of the device before it can be reopened.
        self.close_transmitter();
        let transmitter = Transmitter::open(device).map_err(ControlError::dmx("open device"))?;
        self.install_transmitter(transmitter);
        Ok(())
    }

    /// Installs an already running transmitter, closing the previous one.
    pub fn install_transmitter(self: &Arc<Self>, transmitter: Transmitter) {
        self.close_transmitter();
        info!(device = transmitter.device(), "DMX transmitter installed.");
        *self.transmitter.write() = Some(Arc::new(transmitter));

        if !self.sessions.is_empty() {
            let ctx = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(MONITOR_RESTART_DELAY).await;
                if !ctx.sessions.is_empty() {
                    ctx.start_monitoring();
                }
            });
        }
    }

    /// Stops the show and monitoring, then closes the transmitter.
    pub fn close_transmitter(&self) {
        self.cancel_show();
        self.stop_monitoring();

        let transmitter = self.transmitter.write().take();
        if let Some(transmitter) = transmitter {
            if let Err(e) = transmitter.close() {
                warn!(err = %e, "Error while closing DMX transmitter");
            }
        }
    }

    /// Registers a new client, pushes the current state to it and makes sure monitoring is
    /// running.
    pub async fn connect(self: &Arc<Self>, sink: Box<dyn SessionSink>) -> Arc<Session> {
        let session = self.sessions.register(sink, self.timing.write_timeout);
        info!(session = session.id(), clients = self.sessions.len(), "Client connected.");

        for request in ["get_dmx_state", "get_project_config"] {
            if let Some(reply) = self.handle_message(Message::empty(request)).await {
                if let Err(e) = session.send(&reply).await {
                    warn!(session = session.id(), err = %e, "Error sending initial state");
                }
            }
        }

        // Concurrent connects can both see more than one session here, so any connect
        // starts monitoring. Starting it twice is a no-op.
        self.start_monitoring();
        session
    }

    /// Forgets a client, stopping monitoring when it was the last one.
    pub async fn disconnect(&self, id: u64) {
        if let Some(session) = self.sessions.remove(id) {
            session.close().await;
        }
        info!(session = id, clients = self.sessions.len(), "Client disconnected.");

        if self.sessions.is_empty() {
            self.stop_monitoring();
        }
    }

    pub fn connected_clients(&self) -> usize {
        self.sessions.len()
    }

    /// Handles one inbound text frame and writes any reply back to the session.
    pub async fn handle_text(self: &Arc<Self>, session: &Session, text: &str) {
        let reply = match Message::parse(text) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => Some(e.to_message()),
        };

        if let Some(reply) = reply {
            if let Err(e) = session.send(&reply).await {
                warn!(session = session.id(), err = %e, "Error sending reply");
            }
        }
    }

    /// Runs a message through the command handlers and returns the reply for the
    /// requester, if any. A handler that panics is turned into an `internal_error` reply.
    pub async fn handle_message(self: &Arc<Self>, message: Message) -> Option<Message> {
        let kind = message.kind.clone();
        let ctx = self.clone();
        let result = tokio::spawn(async move {
            let command = Command::decode(message)?;
            ctx.dispatch(command).await
        })
        .await;

        match result {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                debug!(kind, err = %e, "Request failed");
                Some(e.to_message())
            }
            Err(e) => {
                if e.is_panic() {
                    error!(kind, "Handler panicked");
                } else {
                    error!(kind, err = %e, "Handler was cancelled");
                }
                Some(ControlError::Internal(format!("failed to handle {}", kind)).to_message())
            }
        }
    }

    /// Queues a message for every session.
    pub async fn broadcast(&self, message: Message) {
        if self.outbound.send(message).await.is_err() {
            debug!("Broadcaster has stopped");
        }
    }

    /// Queues a message only if there is room right now.
    fn try_broadcast(&self, message: Message) -> bool {
        self.outbound.try_send(message).is_ok()
    }

    fn active_preset(&self) -> String {
        self.active_preset.read().clone()
    }

    fn set_active_preset(&self, id: &str) {
        *self.active_preset.write() = id.to_string();
    }

    /// Cancels the running show, if any. Returns the ID of the cancelled show.
    fn cancel_show(&self) -> Option<String> {
        let run = self.show.lock().take()?;
        run.cancel.cancel();
        info!(show_id = run.show_id, "Show cancelled.");
        Some(run.show_id)
    }

    /// Makes a new run current and returns its generation. A run that slipped in since
    /// the caller preempted is cancelled.
    fn begin_show(&self, show_id: &str, loop_show: bool, cancel: CancelHandle) -> u64 {
        let generation = self.show_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.show.lock().replace(ShowRun {
            generation,
            show_id: show_id.to_string(),
            loop_show,
            current_step: 0,
            cancel,
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        generation
    }

    /// Records the step a run is on. Returns false if the run is no longer current.
    fn set_show_step(&self, generation: u64, step: usize) -> bool {
        match self.show.lock().as_mut() {
            Some(run) if run.generation == generation => {
                run.current_step = step;
                true
            }
            _ => false,
        }
    }

    fn is_current_show(&self, generation: u64) -> bool {
        self.show
            .lock()
            .as_ref()
            .is_some_and(|run| run.generation == generation)
    }

    /// Clears the run state if it still belongs to this run, then announces the end.
    async fn finish_show(&self, generation: u64, show_id: &str) {
        {
            let mut show = self.show.lock();
            if show.as_ref().is_some_and(|run| run.generation == generation) {
                *show = None;
            }
        }
        info!(show_id, "Show stopped.");
        self.broadcast(Message::new(
            "show_stopped",
            serde_json::json!({ "show_id": show_id }),
        ))
        .await;
    }

    /// ID, step and loop flag of the running show.
    fn show_info(&self) -> Option<(String, usize, bool)> {
        self.show
            .lock()
            .as_ref()
            .map(|run| (run.show_id.clone(), run.current_step, run.loop_show))
    }

    /// The current universe and what is driving it.
    fn dmx_state(&self) -> Result<DmxState, ControlError> {
        let transmitter = self.require_transmitter()?;
        let channels = transmitter
            .get_all_channels()
            .map_err(ControlError::dmx("get channels"))?;
        let (active_show_id, show_step, show_loop) = self.show_info().unwrap_or_default();

        Ok(DmxState {
            channels: DmxState::lit_channels(&channels),
            active_preset_id: self.active_preset(),
            active_show_id,
            show_step,
            show_loop,
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Starts the periodic `dmx_update` broadcast. No-op if it's already running.
    pub fn start_monitoring(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock();
        if monitor.is_some() {
            return;
        }
        let cancel = CancelHandle::new();
        monitor::spawn(Arc::downgrade(self), cancel.clone());
        *monitor = Some(cancel);
        debug!("Monitoring started.");
    }

    pub fn stop_monitoring(&self) {
        if let Some(cancel) = self.monitor.lock().take() {
            cancel.cancel();
            debug!("Monitoring stopped.");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.lock().is_some()
    }
}
