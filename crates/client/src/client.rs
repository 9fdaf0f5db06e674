//! The single-task driver: owns the [`Runtime`], reacts to host commands,
//! channel events, request completions and timers.
//!
//! ```text
//! host ──ClientCommand──┐
//! channels ──Transport──┼──> select! ──> Runtime ──ClientUpdate──> host
//! requests ──Completion─┤
//! timers ───────────────┘  (debounce, reconnect, probe, fallback start)
//! ```

use crate::error::{ClientError, Result};
use jrx_dom::{inner_html, NodeId};
use jrx_protocol::{CallResult, OutboundSet};
use jrx_runtime::{
    CallTrigger, ControlKind, EventKind, LifecycleEvent, PreparedCall, Runtime, Toast,
};
use jrx_transport::{
    run_polling, run_push, run_socket, Action, CloseReason, Cursor, Generation, HttpBackend,
    Mode, RequestQueue, ReqwestBackend, SessionMachine, SocketCommand, TransportConfig,
    TransportError, TransportEvent,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const CHANNEL_CAPACITY: usize = 256;

/// Input from the host.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// A DOM event fired on `target`
    Event { target: NodeId, kind: EventKind },
    /// The user typed into, picked or toggled a control
    Edit { target: NodeId, value: String },
    Navigate(String),
    /// Close the channel and start a fresh session on the same route
    Restart,
    Shutdown,
}

/// Output for the host.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientUpdate {
    /// App root markup after a batch, a resync or a navigation
    Rendered { seq: Option<u64>, html: String },
    Navigated { route: String },
    Connection { mode: Mode, open: bool },
    Lifecycle(LifecycleEvent),
    Toast(Toast),
}

enum Completion {
    Call {
        epoch: u64,
        call: PreparedCall,
        result: CallResult,
        /// Issued while no realtime channel was open
        degraded: bool,
    },
    Set {
        epoch: u64,
        result: jrx_transport::Result<()>,
    },
    Resync {
        epoch: u64,
        result: jrx_transport::Result<String>,
    },
}

#[derive(Debug, Default)]
struct Timers {
    /// Pending debounced calls, one per element
    debounce: HashMap<NodeId, (Instant, CallTrigger)>,
    reconnect: Option<Instant>,
    probe: Option<Instant>,
    fallback: Option<(Instant, Mode)>,
}

impl Timers {
    fn next_debounce(&self) -> Option<Instant> {
        self.debounce.values().map(|(at, _)| *at).min()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

pub struct Client {
    runtime: Runtime,
    config: TransportConfig,
    backend: Arc<dyn HttpBackend>,
    queue: RequestQueue,
    machine: SessionMachine,
    route: String,
    /// Bumped on navigation; completions from older routes are dropped
    epoch: u64,
    socket_generation: Generation,
    fallback_generation: Generation,
    cursor: Cursor,
    socket: Option<mpsc::Sender<SocketCommand>>,
    fallback_task: Option<JoinHandle<()>>,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: mpsc::Receiver<TransportEvent>,
    done_tx: mpsc::UnboundedSender<Completion>,
    done_rx: mpsc::UnboundedReceiver<Completion>,
    timers: Timers,
    resync_pending: bool,
    updates: Option<mpsc::UnboundedSender<ClientUpdate>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("route", &self.route)
            .field("state", &self.machine.state())
            .field("degraded", &self.machine.is_degraded())
            .field("cursor", &self.cursor.get())
            .finish()
    }
}

impl Client {
    /// Must be called inside a tokio runtime: the request queue worker is
    /// spawned immediately.
    pub fn new(runtime: Runtime, config: TransportConfig, backend: Arc<dyn HttpBackend>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            queue: RequestQueue::spawn(backend.clone()),
            machine: SessionMachine::new(&config),
            runtime,
            config,
            backend,
            route: "/".to_string(),
            epoch: 0,
            socket_generation: Generation::new(),
            fallback_generation: Generation::new(),
            cursor: Cursor::new(),
            socket: None,
            fallback_task: None,
            events_tx,
            events_rx,
            done_tx,
            done_rx,
            timers: Timers::default(),
            resync_pending: false,
            updates: None,
        }
    }

    /// Client talking to a real server over `reqwest` and `tokio-tungstenite`.
    pub fn with_reqwest(runtime: Runtime, config: TransportConfig) -> Result<Self> {
        let backend = ReqwestBackend::new(config.clone())?;
        Ok(Self::new(runtime, config, Arc::new(backend)))
    }

    /// Receive [`ClientUpdate`]s. A later call replaces the earlier receiver.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ClientUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.updates = Some(tx);
        rx
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.runtime
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn is_realtime(&self) -> bool {
        self.machine.is_realtime()
    }

    /// Start a session for the already hydrated page at `route`.
    pub fn open(&mut self, route: &str) {
        self.route = route.to_string();
        let actions = self.machine.start();
        self.execute(actions);
    }

    /// Drive the client until `Shutdown` or until every command sender is
    /// dropped. Returns the runtime for inspection.
    pub async fn run(mut self, mut commands: mpsc::Receiver<ClientCommand>) -> Result<Runtime> {
        loop {
            let debounce_at = self.timers.next_debounce();
            let reconnect_at = self.timers.reconnect;
            let probe_at = self.timers.probe;
            let fallback_at = self.timers.fallback.map(|(at, _)| at);

            tokio::select! {
                command = commands.recv() => match command {
                    Some(ClientCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.events_rx.recv() => self.handle_transport(event),
                Some(done) = self.done_rx.recv() => self.handle_completion(done),
                _ = sleep_until(debounce_at) => self.fire_debounced(),
                _ = sleep_until(reconnect_at) => {
                    self.timers.reconnect = None;
                    self.spawn_socket();
                }
                _ = sleep_until(probe_at) => {
                    self.timers.probe = None;
                    let actions = self.machine.on_probe();
                    self.execute(actions);
                }
                _ = sleep_until(fallback_at) => {
                    if let Some((_, mode)) = self.timers.fallback.take() {
                        self.spawn_fallback(mode);
                    }
                }
            }
        }
        self.teardown(CloseReason::ManualRestart);
        log::info!("Client stopped");
        Ok(self.runtime)
    }

    async fn handle_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Event { target, kind } => self.dispatch(target, kind),
            ClientCommand::Edit { target, value } => self.edit(target, &value),
            ClientCommand::Navigate(route) => {
                if let Err(e) = self.navigate(&route).await {
                    log::error!("Navigation to {route} failed: {e}");
                }
            }
            ClientCommand::Restart => {
                log::info!("Restarting session on {}", self.route);
                self.close_socket(CloseReason::ManualRestart);
                self.stop_fallback();
                self.timers = Timers::default();
                let route = self.route.clone();
                self.open(&route);
            }
            ClientCommand::Shutdown => {}
        }
    }

    /// Replace the page with the partial at `route` and start a fresh session.
    pub async fn navigate(&mut self, route: &str) -> Result<()> {
        log::info!("Navigating to {route}");
        self.teardown(CloseReason::RouteChange);
        self.epoch += 1;
        let html = self.backend.fetch_partial(route).await?;
        self.runtime.load_partial(&html)?;
        self.route = route.to_string();
        self.notify(ClientUpdate::Navigated {
            route: route.to_string(),
        });
        self.notify_rendered(None);
        self.open(route);
        Ok(())
    }

    /// Stop every channel and timer and forget the page's state.
    fn teardown(&mut self, reason: CloseReason) {
        self.close_socket(reason);
        self.stop_fallback();
        self.machine.stop();
        self.timers = Timers::default();
        self.resync_pending = false;
        self.cursor.reset();
        self.runtime.reset();
        self.runtime.set_realtime(false);
    }

    // ------------------------------------------------------------------
    // Session actions
    // ------------------------------------------------------------------

    fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Connect(Mode::Socket) => self.spawn_socket(),
                Action::Connect(mode) => self.spawn_fallback(mode),
                Action::ReconnectAfter(delay) => {
                    self.timers.reconnect = Some(Instant::now() + delay);
                }
                Action::StartFallback { mode, delay } if delay.is_zero() => {
                    self.spawn_fallback(mode);
                }
                Action::StartFallback { mode, delay } => {
                    self.timers.fallback = Some((Instant::now() + delay, mode));
                }
                Action::StopFallback => self.stop_fallback(),
                Action::ScheduleProbe(delay) => {
                    self.timers.probe = Some(Instant::now() + delay);
                }
                Action::CancelProbe => self.timers.probe = None,
            }
        }
        self.runtime.set_realtime(self.machine.is_realtime());
    }

    fn spawn_socket(&mut self) {
        let token = self.socket_generation.advance();
        let url = match self.config.socket_url(&self.route) {
            Ok(url) => url,
            Err(e) => {
                log::error!("Cannot build socket URL: {e}");
                let closed = TransportEvent::Closed {
                    mode: Mode::Socket,
                    generation: token.id(),
                    clean: false,
                    reason: CloseReason::Other(e.to_string()),
                };
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let _ = events.send(closed).await;
                });
                return;
            }
        };
        log::debug!("Opening socket {url}");
        let (commands, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.socket = Some(commands);
        tokio::spawn(run_socket(url, token, rx, self.events_tx.clone()));
    }

    fn spawn_fallback(&mut self, mode: Mode) {
        self.stop_fallback();
        let token = self.fallback_generation.advance();
        let backend = self.backend.clone();
        let route = self.route.clone();
        let cursor = self.cursor.clone();
        let events = self.events_tx.clone();
        log::info!("Starting {mode} channel for {route}");
        let task = match mode {
            Mode::Push => tokio::spawn(run_push(backend, route, cursor, token, events)),
            Mode::Polling => tokio::spawn(run_polling(
                backend,
                route,
                cursor,
                self.config.poll_interval(),
                token,
                events,
            )),
            Mode::Socket => {
                log::warn!("Socket is not a fallback channel");
                return;
            }
        };
        self.fallback_task = Some(task);
    }

    fn stop_fallback(&mut self) {
        self.fallback_generation.advance();
        self.timers.fallback = None;
        if let Some(task) = self.fallback_task.take() {
            task.abort();
        }
    }

    fn close_socket(&mut self, reason: CloseReason) {
        self.socket_generation.advance();
        self.timers.reconnect = None;
        if let Some(socket) = self.socket.take() {
            if socket.try_send(SocketCommand::Close(reason)).is_err() {
                log::debug!("Socket already gone");
            }
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    fn is_current(&self, event: &TransportEvent) -> bool {
        match event.mode() {
            Mode::Socket => self.socket_generation.is_current(event.generation()),
            Mode::Push | Mode::Polling => self.fallback_generation.is_current(event.generation()),
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        if !self.is_current(&event) {
            log::debug!("Dropping event from a superseded {} loop", event.mode());
            return;
        }
        match event {
            TransportEvent::Opened { mode, .. } => {
                log::info!("{mode} channel open on {}", self.route);
                let actions = self.machine.on_open(mode);
                self.execute(actions);
                self.notify(ClientUpdate::Connection { mode, open: true });
            }
            TransportEvent::Message { raw, .. } => self.apply_raw(&raw),
            TransportEvent::Closed {
                mode,
                clean,
                reason,
                ..
            } => {
                if mode == Mode::Socket {
                    self.socket = None;
                }
                let actions = self.machine.on_close(mode, clean, &reason);
                self.execute(actions);
                self.notify(ClientUpdate::Connection { mode, open: false });
            }
        }
    }

    fn apply_raw(&mut self, raw: &str) {
        match self.runtime.apply_message(raw) {
            Ok(seq) => {
                if let Some(seq) = seq {
                    self.cursor.advance(seq);
                }
                self.forward_runtime_output();
                self.notify_rendered(seq);
            }
            Err(e) => log::warn!("Dropping malformed message: {e}"),
        }
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    fn edit(&mut self, target: NodeId, value: &str) {
        let doc = self.runtime.document_mut();
        let Some(kind) = ControlKind::of(doc, target) else {
            log::debug!("Edit target is not a form control");
            return;
        };
        doc.focus(target);
        let event = if kind.is_checkable() {
            doc.set_checked(target, matches!(value, "true" | "on" | "1"));
            EventKind::Change
        } else if kind.is_discrete() {
            doc.set_value(target, value);
            EventKind::Change
        } else {
            doc.set_value(target, value);
            EventKind::Input
        };
        self.dispatch(target, event);
    }

    fn dispatch(&mut self, target: NodeId, kind: EventKind) {
        let outcome = self.runtime.handle_event(target, kind);
        if let Some(edit) = outcome.edit {
            self.send_edit(edit);
        }
        for trigger in outcome.calls {
            match trigger.debounce {
                Some(delay) => {
                    self.timers
                        .debounce
                        .insert(trigger.element, (Instant::now() + delay, trigger));
                }
                None => self.issue_call(trigger),
            }
        }
    }

    fn fire_debounced(&mut self) {
        let now = Instant::now();
        let due: Vec<NodeId> = self
            .timers
            .debounce
            .iter()
            .filter(|(_, (at, _))| *at <= now)
            .map(|(node, _)| *node)
            .collect();
        for node in due {
            if let Some((_, trigger)) = self.timers.debounce.remove(&node) {
                self.issue_call(trigger);
            }
        }
    }

    fn send_edit(&mut self, edit: OutboundSet) {
        let edit = match (&self.socket, self.machine.is_realtime()) {
            (Some(socket), true) => match socket.try_send(SocketCommand::Send(edit)) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(SocketCommand::Send(edit)))
                | Err(mpsc::error::TrySendError::Closed(SocketCommand::Send(edit))) => {
                    log::debug!("Socket send failed, using HTTP");
                    edit
                }
                Err(_) => return,
            },
            _ => edit,
        };
        self.queue_edit(edit);
    }

    fn queue_edit(&mut self, edit: OutboundSet) {
        let reply = self.queue.submit_set(self.route.clone(), edit);
        let done = self.done_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = reply.await.unwrap_or(Err(TransportError::QueueClosed));
            let _ = done.send(Completion::Set { epoch, result });
        });
    }

    fn issue_call(&mut self, trigger: CallTrigger) {
        let Some(call) = self.runtime.prepare_call(trigger.element, trigger.event) else {
            return;
        };
        if call.is_optimistic() {
            self.notify_rendered(None);
        }
        let done = self.done_tx.clone();
        let epoch = self.epoch;
        let request = call.request();
        let qualified = call.qualified.clone();

        // Calls always go through the FIFO queue; only socket edits skip it.
        let degraded = !self.machine.is_realtime();
        let reply = self.queue.submit_call(qualified, request);
        tokio::spawn(async move {
            let result = reply
                .await
                .unwrap_or_else(|_| CallResult::network_failure("request queue closed"));
            let _ = done.send(Completion::Call {
                epoch,
                call,
                result,
                degraded,
            });
        });
    }

    // ------------------------------------------------------------------
    // Completions
    // ------------------------------------------------------------------

    fn handle_completion(&mut self, done: Completion) {
        let epoch = match &done {
            Completion::Call { epoch, .. }
            | Completion::Set { epoch, .. }
            | Completion::Resync { epoch, .. } => *epoch,
        };
        if epoch != self.epoch {
            log::debug!("Dropping completion from a previous route");
            return;
        }
        match done {
            Completion::Call {
                call,
                result,
                degraded,
                ..
            } => {
                self.runtime.complete_call(call, &result);
                self.forward_runtime_output();
                self.notify_rendered(None);
                if degraded {
                    self.schedule_resync();
                }
            }
            Completion::Set { result, .. } => match result {
                Ok(()) => self.schedule_resync(),
                Err(e) => log::warn!("Edit was not delivered: {e}"),
            },
            Completion::Resync { result, .. } => {
                self.resync_pending = false;
                match result {
                    Ok(html) => self.resync(&html),
                    Err(e) => log::warn!("Resync fetch failed: {e}"),
                }
            }
        }
    }

    /// Fetch the current route's partial once the realtime channel is down,
    /// so HTTP-borne edits show their server-side effects.
    fn schedule_resync(&mut self) {
        if self.machine.is_realtime() || self.resync_pending {
            return;
        }
        self.resync_pending = true;
        let backend = self.backend.clone();
        let route = self.route.clone();
        let done = self.done_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = backend.fetch_partial(&route).await;
            let _ = done.send(Completion::Resync { epoch, result });
        });
    }

    fn resync(&mut self, html: &str) {
        match self.runtime.resync_partial(html) {
            Ok(_) => self.notify_rendered(None),
            Err(e) => log::warn!("Resync of {} failed: {}", self.route, ClientError::from(e)),
        }
    }

    // ------------------------------------------------------------------
    // Host notifications
    // ------------------------------------------------------------------

    fn notify(&mut self, update: ClientUpdate) {
        if let Some(updates) = &self.updates {
            if updates.send(update).is_err() {
                self.updates = None;
            }
        }
    }

    fn notify_rendered(&mut self, seq: Option<u64>) {
        if self.updates.is_none() {
            return;
        }
        let html = inner_html(self.runtime.document(), self.runtime.app_root());
        self.notify(ClientUpdate::Rendered { seq, html });
    }

    fn forward_runtime_output(&mut self) {
        for event in self.runtime.take_events() {
            self.notify(ClientUpdate::Lifecycle(event));
        }
        for toast in self.runtime.take_toasts() {
            log::warn!("{}", toast.message);
            self.notify(ClientUpdate::Toast(toast));
        }
    }
}
