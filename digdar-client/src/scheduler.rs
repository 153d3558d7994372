//! The poll/push loop.
//!
//! [`SyncScheduler`] is the single owner of the session: parameter store,
//! sync state machine, render coordinator and timers. Network requests run as
//! spawned tasks and report back over a completion channel, operator commands
//! arrive over another channel, and everything interesting is broadcast as a
//! [`SyncEvent`].
//!
//! ```text
//!            commands (mpsc)          completions (mpsc)
//!  Console ───────────────┐        ┌──────────── spawned fetch/push tasks
//!                         ▼        ▼                      ▲
//!                  ┌──────────────────────┐               │
//!                  │    SyncScheduler     │───────────────┘
//!                  │  ParamStore          │   Transport
//!                  │  SyncMachine         │
//!                  │  RenderCoordinator   │──► PlotSurface
//!                  │  timers              │
//!                  └──────────┬───────────┘
//!                             │ SyncEvent (broadcast)
//!                             ▼
//!                      UI subscribers
//! ```
//!
//! The loop is single threaded: handlers never await, so no state is shared
//! and nothing needs a lock.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_graceful_shutdown::SubsystemHandle;

use digdar_core::params::{
    default_params, Adoption, AUTO_FLAG, DIGDAR_TRIG_DELAY, EN_AVG_AT_DEC, GUI_RESET_Y_RANGE,
    SAMPLES_PER_UNIT, TIME_RANGE, TIME_RANGE_MAX, TRIG_MODE, TRIG_SOURCE, XMAX, XMIN,
};
use digdar_core::protocol::{self, PollData, PollOutcome, PushOutcome};
use digdar_core::range_step::{round_to, Y_MAX_SPAN};
use digdar_core::sync::{PollFailure, PollTicket, PushDecision};
use digdar_core::view::FULL_X_WINDOW;
use digdar_core::{
    DataResponse, Decimator, ParamStore, ParameterSet, PlotSurface, Readouts, RenderCoordinator,
    SyncMachine, SyncState, TriggerSource,
};

use crate::command::Command;
use crate::config::ClientConfig;
use crate::event::{Notice, SyncEvent};
use crate::storage::{self, ParamFileStore};
use crate::transport::{Transport, TransportError};
use crate::SyncError;

/// Trigger levels are accepted in this range.
const LEVEL_LIMIT: f64 = 1.0;
/// Largest trigger delay in samples.
const MAX_TRIG_DELAY_SAMPLES: f64 = 1e8;
/// Largest trigger latency in samples.
const MAX_LATENCY_SAMPLES: f64 = 125e6;

const EVENT_CAPACITY: usize = 64;

/// Result of a spawned request.
#[derive(Debug)]
enum Completion {
    Poll {
        ticket: PollTicket,
        autorun_before: bool,
        result: Result<DataResponse, TransportError>,
    },
    Push {
        refresh: bool,
        auto: bool,
        result: Result<DataResponse, TransportError>,
    },
    AppStarted(Result<DataResponse, TransportError>),
    DefaultsPosted(Result<DataResponse, TransportError>),
    Stored(Result<(), TransportError>),
    Loaded {
        factory: bool,
        result: Result<ParameterSet, TransportError>,
    },
}

/// What woke the loop.
enum Wake {
    Completion(u64, Completion),
    Command(Option<Command>),
    Timer,
}

#[derive(Debug, Clone, Copy, Default)]
struct Timers {
    poll: Option<Instant>,
    replay: Option<Instant>,
    settle: Option<Instant>,
}

impl Timers {
    fn next(&self) -> Option<Instant> {
        [self.poll, self.replay, self.settle].into_iter().flatten().min()
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

pub struct SyncScheduler<T: Transport> {
    transport: Arc<T>,
    config: ClientConfig,
    store: ParamStore,
    machine: SyncMachine,
    render: RenderCoordinator,
    surface: Box<dyn PlotSurface + Send>,
    events: broadcast::Sender<SyncEvent>,
    completions_tx: mpsc::UnboundedSender<(u64, Completion)>,
    completions_rx: mpsc::UnboundedReceiver<(u64, Completion)>,
    timers: Timers,

    expected_app: String,
    app_started: bool,
    starting: bool,
    autorun: bool,
    user_editing: bool,
    notice: Option<Notice>,
    pending_app: Option<String>,
    refresh_counter: u32,
    /// Bumped on restart; completions from older sessions are dropped
    generation: u64,
    commands_closed: bool,
    last_state: SyncState,
    startup: Vec<Command>,
}

impl<T: Transport> SyncScheduler<T> {
    pub fn new(transport: Arc<T>, config: ClientConfig, surface: Box<dyn PlotSurface + Send>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let machine = SyncMachine::with_timeouts(
            config.request_timeout.as_millis() as u64,
            config.long_timeout.as_millis() as u64,
        );
        let render = RenderCoordinator::new(Decimator::new(config.points_per_px));
        SyncScheduler {
            transport,
            expected_app: config.app_id.clone(),
            config,
            store: ParamStore::new(),
            machine,
            render,
            surface,
            events,
            completions_tx,
            completions_rx,
            timers: Timers::default(),
            app_started: false,
            starting: false,
            autorun: true,
            user_editing: false,
            notice: None,
            pending_app: None,
            refresh_counter: 0,
            generation: 0,
            commands_closed: false,
            last_state: SyncState::Idle,
            startup: Vec::new(),
        }
    }

    /// Commands to run once, right after the first parameter snapshot has
    /// been adopted.
    pub fn with_startup(mut self, commands: Vec<Command>) -> Self {
        self.startup = commands;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn params(&self) -> &ParamStore {
        &self.store
    }

    pub fn state(&self) -> SyncState {
        self.machine.state()
    }

    // =========================================================================
    // Loop
    // =========================================================================

    /// Run until shutdown is requested or a [`Command::Shutdown`] arrives.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        subsys: SubsystemHandle,
    ) -> Result<(), SyncError> {
        log::info!(
            "Sync scheduler started for '{}' at {}",
            self.expected_app,
            self.config.root_url
        );
        self.poll();
        self.publish_state();

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    log::info!("Sync scheduler: shutdown requested");
                    break;
                }
                keep = self.step(&mut commands) => {
                    if !keep {
                        log::info!("Sync scheduler: operator requested shutdown");
                        subsys.request_shutdown();
                        break;
                    }
                }
            }
        }

        self.timers = Timers::default();
        if let Err(e) = self.transport.stop_app().await {
            log::warn!("Could not stop the application: {}", e);
        }
        log::info!("Sync scheduler finished");
        Ok(())
    }

    /// Wait for the next completion, command or timer and handle it.
    /// Returns false when the operator asked to quit.
    async fn step(&mut self, commands: &mut mpsc::Receiver<Command>) -> bool {
        let deadline = self.timers.next();
        let wake = tokio::select! {
            biased;
            Some((generation, completion)) = self.completions_rx.recv() => {
                Wake::Completion(generation, completion)
            }
            command = commands.recv(), if !self.commands_closed => Wake::Command(command),
            _ = sleep_until_opt(deadline) => Wake::Timer,
        };

        match wake {
            Wake::Completion(generation, completion) => {
                if generation == self.generation {
                    self.on_completion(completion);
                } else {
                    log::debug!("Dropping completion from an earlier session");
                }
            }
            Wake::Command(Some(command)) => {
                if !self.handle_command(command) {
                    return false;
                }
            }
            Wake::Command(None) => {
                log::debug!("Command channel closed");
                self.commands_closed = true;
            }
            Wake::Timer => self.fire_timers(),
        }
        self.publish_state();
        true
    }

    fn fire_timers(&mut self) {
        let now = Instant::now();
        let due = |t: Option<Instant>| t.is_some_and(|t| t <= now);

        if due(self.timers.replay) {
            self.timers.replay = None;
            if self.machine.take_replay() {
                log::trace!("Replaying coalesced push");
                self.push(false, true, false);
            }
        }
        if due(self.timers.settle) {
            self.timers.settle = None;
            self.settle_gesture();
        }
        if due(self.timers.poll) {
            self.timers.poll = None;
            self.poll();
        }
    }

    fn spawn<F>(&self, request: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.completions_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let completion = request.await;
            // The receiver lives as long as the scheduler
            let _ = tx.send((generation, completion));
        });
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish_state(&mut self) {
        let state = self.machine.state();
        if state != self.last_state {
            log::trace!("Sync state {} -> {}", self.last_state, state);
            self.last_state = state;
            self.emit(SyncEvent::StateChanged(state));
        }
    }

    // =========================================================================
    // Poll
    // =========================================================================

    fn poll(&mut self) {
        if self.machine.is_polling() {
            return;
        }
        // Unsent edits go out before the read. A clean store must not queue
        // a replay behind a push already on the wire.
        if self.store.is_dirty() {
            self.push(false, false, false);
        }

        let Some(ticket) = self.machine.request_poll() else {
            return;
        };
        self.timers.poll = None;

        let transport = self.transport.clone();
        let autorun_before = self.autorun;
        let timeout = std::time::Duration::from_millis(ticket.timeout_ms);
        if ticket.long {
            log::debug!("Polling with the long timeout");
        }
        self.spawn(async move {
            Completion::Poll {
                ticket,
                autorun_before,
                result: transport.fetch(timeout).await,
            }
        });
    }

    fn schedule_poll(&mut self) {
        if self.notice.is_some() {
            return;
        }
        self.timers.poll = Some(Instant::now() + self.config.update_interval);
    }

    fn on_poll(
        &mut self,
        ticket: PollTicket,
        autorun_before: bool,
        result: Result<DataResponse, TransportError>,
    ) {
        let response = match result {
            Ok(response) => {
                self.machine.poll_succeeded(ticket);
                response
            }
            Err(e) => {
                match self.machine.poll_failed(ticket) {
                    PollFailure::RetryNow => {
                        log::warn!("Poll failed ({}), trying once more", e);
                        self.poll();
                    }
                    PollFailure::Fatal => {
                        log::error!("Poll failed again: {}", e);
                        self.show_notice(Notice::fatal(format!(
                            "Data receiving failed. Error status: {}",
                            e.status_text()
                        )));
                    }
                }
                return;
            }
        };

        match protocol::classify_poll(response, &self.expected_app) {
            PollOutcome::ServerError { reason } => {
                if !self.app_started {
                    log::info!("Server reports an error before start, starting '{}'", self.expected_app);
                    self.start_app();
                } else {
                    let message = reason
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "Application error.".to_string());
                    self.show_notice(Notice::fatal(message));
                }
            }
            PollOutcome::AppMismatch { reported } => {
                if !self.app_started {
                    log::info!(
                        "Server runs {:?} instead of '{}', starting it",
                        reported,
                        self.expected_app
                    );
                    self.start_app();
                } else {
                    self.on_app_mismatch(reported);
                }
            }
            PollOutcome::Data(data) => self.on_poll_data(data, autorun_before),
            PollOutcome::Malformed => {
                self.show_notice(Notice::fatal("Wrong application data received."));
            }
        }
    }

    fn on_app_mismatch(&mut self, reported: Option<String>) {
        let name = reported.clone().unwrap_or_else(|| "unknown".to_string());
        log::warn!(
            "Application '{}' is running on the server, expected '{}'",
            name,
            self.expected_app
        );
        self.pending_app = reported.clone();
        self.emit(SyncEvent::AppMismatch { reported });
        self.show_notice(Notice {
            retry: false,
            switch_app: self.pending_app.is_some(),
            ..Notice::fatal(format!(
                "The server is running application '{}'. Switch to it or restart '{}'.",
                name, self.expected_app
            ))
        });
    }

    fn on_poll_data(&mut self, data: PollData, autorun_before: bool) {
        let PollData {
            params,
            series,
            again,
            force_x,
        } = data;
        self.app_started = true;
        self.render.replace_datasets(series);

        if !self.render.is_initialised() {
            let y_span = params.get(GUI_RESET_Y_RANGE).unwrap_or(Y_MAX_SPAN);
            self.render.initialise(y_span);
            self.adopt(params, false);
            log::info!("First data received, view initialised");
            for command in std::mem::take(&mut self.startup) {
                self.handle_command(command);
            }
        } else {
            let autorun_after = self.autorun;
            self.adopt(params, self.user_editing);
            // The operator changed the mode while the request was out
            if autorun_before != autorun_after {
                self.set_autorun(autorun_after);
            }
            if let Some((min, max)) = force_x {
                if self.x_guarded() {
                    log::trace!("Ignoring server x window while the operator is busy");
                } else {
                    self.render.set_x(min, max);
                }
            }
        }

        self.redraw();
        if self.autorun || again {
            self.schedule_poll();
        }
    }

    // =========================================================================
    // Push
    // =========================================================================

    /// Push the local snapshot. `refresh` polls after a successful push,
    /// `force` sends even when nothing is dirty, `single` requests one
    /// acquisition.
    fn push(&mut self, refresh: bool, force: bool, single: bool) {
        if !self.store.is_ready() {
            return;
        }
        let auto = self.store.auto_requested();
        match self.machine.request_push(force, self.store.is_dirty(), auto) {
            PushDecision::Dispatch { timeout_ms } => {
                let payload = self.store.outbound(single);
                if auto {
                    // One-shot request, already in the payload
                    self.store.set(AUTO_FLAG, 0.0);
                }
                log::debug!(
                    "Pushing parameters (dirty: {:?}, forced: {}, single: {})",
                    self.store.dirty_keys(),
                    force,
                    single
                );
                let transport = self.transport.clone();
                let timeout = std::time::Duration::from_millis(timeout_ms);
                self.spawn(async move {
                    Completion::Push {
                        refresh,
                        auto,
                        result: transport.push(&payload, timeout).await,
                    }
                });
            }
            PushDecision::Coalesced => log::trace!("Push in flight, queued a replay"),
            PushDecision::Skipped => {}
        }
    }

    fn on_push(&mut self, refresh: bool, auto: bool, result: Result<DataResponse, TransportError>) {
        let outcome = result.map(|response| protocol::classify_push(response, auto));
        if let Ok(PushOutcome::ServerError { .. }) = &outcome {
            self.machine.clear_queue();
        }
        if self.machine.push_completed() {
            self.timers.replay = Some(Instant::now() + self.config.replay_delay);
        }

        match outcome {
            Ok(PushOutcome::Accepted(data)) => {
                if let Some(window) = data.autoscale {
                    log::debug!("Applying server autoscale {:?}", window);
                    self.render.apply_autoscale(window.x, window.y);
                }
                if let Some((min, max)) = data.force_x {
                    self.render.set_x(min, max);
                }
                self.adopt(data.params, self.user_editing);
                self.redraw();
                if refresh && !self.machine.is_polling() {
                    self.poll();
                }
            }
            Ok(PushOutcome::ServerError { reason }) => {
                let message = reason
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "Error while sending data (E1).".to_string());
                self.show_notice(Notice::non_fatal(message));
            }
            Ok(PushOutcome::Unexpected) => {
                self.show_notice(Notice::non_fatal("Error while sending data (E2)."));
            }
            Err(e) => {
                log::warn!("Push failed: {}", e);
                self.show_notice(Notice::non_fatal("Error while sending data (E3)."));
            }
        }
    }

    // =========================================================================
    // Application lifecycle
    // =========================================================================

    fn start_app(&mut self) {
        if self.starting {
            return;
        }
        self.starting = true;
        let transport = self.transport.clone();
        let app_id = self.expected_app.clone();
        self.spawn(async move { Completion::AppStarted(transport.start_app(&app_id).await) });
    }

    fn on_app_started(&mut self, result: Result<DataResponse, TransportError>) {
        let failure = match result {
            Ok(response) if response.is_error() => Some(response.reason),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Start request failed: {}", e);
                Some(None)
            }
        };
        if let Some(reason) = failure {
            self.starting = false;
            let message = reason
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "Could not start the application.".to_string());
            self.show_notice(Notice {
                restart: false,
                ..Notice::fatal(message)
            });
            return;
        }

        log::info!("Application '{}' started, posting defaults", self.expected_app);
        let transport = self.transport.clone();
        let timeout = self.config.request_timeout;
        self.spawn(async move {
            Completion::DefaultsPosted(transport.push(&default_params(), timeout).await)
        });
    }

    fn on_defaults_posted(&mut self, result: Result<DataResponse, TransportError>) {
        self.starting = false;
        match result {
            Ok(_) => {
                self.app_started = true;
                self.poll();
            }
            Err(e) => {
                log::warn!("Posting default parameters failed: {}", e);
                self.show_notice(Notice {
                    retry: false,
                    ..Notice::fatal("Could not initialize the application with default parameters.")
                });
            }
        }
    }

    /// Forget the session and start polling from scratch.
    fn restart(&mut self) {
        log::info!("Restarting session for '{}'", self.expected_app);
        self.generation += 1;
        self.machine.reset();
        self.store.reset();
        self.render.clear();
        self.timers = Timers::default();
        self.app_started = false;
        self.starting = false;
        self.user_editing = false;
        self.refresh_counter = 0;
        self.pending_app = None;
        self.clear_notice();
        self.set_autorun(true);
        self.poll();
    }

    // =========================================================================
    // Completions
    // =========================================================================

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Poll {
                ticket,
                autorun_before,
                result,
            } => self.on_poll(ticket, autorun_before, result),
            Completion::Push {
                refresh,
                auto,
                result,
            } => self.on_push(refresh, auto, result),
            Completion::AppStarted(result) => self.on_app_started(result),
            Completion::DefaultsPosted(result) => self.on_defaults_posted(result),
            Completion::Stored(result) => match result {
                Ok(()) => {
                    log::info!("Parameters stored on the server");
                    self.emit(SyncEvent::ParamsStored);
                }
                Err(e) => log::warn!("Storing parameters failed: {}", e),
            },
            Completion::Loaded { factory, result } => match result {
                Ok(params) => {
                    log::info!(
                        "Loaded {} {}parameters",
                        params.len(),
                        if factory { "factory " } else { "" }
                    );
                    self.store.replace_local(params);
                    self.redraw();
                    self.emit(SyncEvent::ParamsLoaded { factory });
                }
                Err(e) => log::warn!("Loading parameters failed: {}", e),
            },
        }
    }

    // =========================================================================
    // Shared helpers
    // =========================================================================

    /// Apply a server snapshot. While the view has an explicit x window the
    /// server's `xmin`/`xmax` are replaced with it.
    fn adopt(&mut self, mut params: ParameterSet, editing: bool) {
        if let Some((min, max)) = self.render.explicit_x() {
            params.set(XMIN, min);
            params.set(XMAX, max);
        }
        let adoption = self.store.adopt(params, editing);
        if adoption == Adoption::Full {
            if let Some(mode) = self.store.local().trigger_mode() {
                self.set_autorun(mode.autorun());
            }
            if self.refresh_counter % self.config.meas_panel_dec.max(1) == 0 {
                self.emit(SyncEvent::Readouts(Readouts::from_params(self.store.local())));
            }
            self.refresh_counter = self.refresh_counter.wrapping_add(1);
        }
        self.emit(SyncEvent::ParamsAdopted {
            adoption,
            dirty: self.store.is_dirty(),
        });
    }

    fn set_autorun(&mut self, running: bool) {
        if self.autorun != running {
            self.autorun = running;
            log::debug!("Continuous run {}", if running { "on" } else { "off" });
            self.emit(SyncEvent::RunState { running });
        }
    }

    /// Server driven x windows are ignored while this is true.
    fn x_guarded(&self) -> bool {
        self.user_editing || self.timers.settle.is_some()
    }

    fn show_notice(&mut self, notice: Notice) {
        if notice.is_fatal() {
            log::error!("{}", notice.message);
        } else {
            log::warn!("{}", notice.message);
        }
        self.timers.poll = None;
        self.notice = Some(notice.clone());
        self.emit(SyncEvent::Notice(notice));
    }

    fn clear_notice(&mut self) {
        if self.notice.take().is_some() {
            self.emit(SyncEvent::NoticeCleared);
        }
    }

    fn redraw(&mut self) {
        if !self.render.is_initialised() {
            return;
        }
        let local = self.store.local();
        self.render.render(local, self.surface.as_mut());
        self.emit(SyncEvent::RangeControls(self.render.range_controls(local)));
    }

    /// Store the visible x window, rounded, in the local snapshot.
    fn set_local_x(&mut self, (min, max): (f64, f64), round: bool) {
        let (min, max) = if round {
            (
                round_to(min, self.config.x_decimals),
                round_to(max, self.config.x_decimals),
            )
        } else {
            (min, max)
        };
        self.store.set(XMIN, min);
        self.store.set(XMAX, max);
    }

    fn settle_gesture(&mut self) {
        if let Some(x) = self.render.visible_x() {
            self.set_local_x(x, true);
        }
        self.push(true, false, false);
    }

    fn trigger_source(&self) -> TriggerSource {
        self.store
            .local()
            .trigger_source()
            .unwrap_or(TriggerSource::Level)
    }

    fn set_source_field(&mut self, field: Option<&'static str>, value: f64, what: &str) {
        match field {
            Some(field) => {
                self.store.set(field, value);
                self.push(false, false, false);
                self.redraw();
            }
            None => log::warn!(
                "Trigger source {:?} has no {} setting",
                self.trigger_source(),
                what
            ),
        }
    }

    fn param_files(&self) -> ParamFileStore {
        ParamFileStore::new(self.config.params_dir.clone())
    }

    fn load_params(&mut self, factory: bool) {
        let transport = self.transport.clone();
        self.spawn(async move {
            let result = if factory {
                transport.load_factory_params().await
            } else {
                transport.load_params().await
            };
            Completion::Loaded { factory, result }
        });
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Returns false on [`Command::Shutdown`].
    fn handle_command(&mut self, command: Command) -> bool {
        if command.requires_params() && !self.store.is_ready() {
            log::debug!("Ignoring {:?} until parameters are known", command);
            return true;
        }
        log::trace!("Command {:?}", command);

        match command {
            Command::Poll => self.poll(),
            Command::Retry => {
                self.clear_notice();
                self.poll();
            }
            Command::Dismiss => {
                self.clear_notice();
                if self.autorun && !self.machine.is_polling() {
                    self.schedule_poll();
                }
            }
            Command::Restart => self.restart(),
            Command::SwitchApp => {
                if let Some(app) = self.pending_app.take() {
                    log::info!("Switching to application '{}'", app);
                    self.expected_app = app;
                }
                self.restart();
            }
            Command::BeginEdit => self.user_editing = true,
            Command::EndEdit => self.user_editing = false,
            Command::Set { key, value } => {
                self.store.set(key, value);
                self.push(false, false, false);
                self.redraw();
            }
            Command::SetTriggerMode(mode) => {
                self.store.set(TRIG_MODE, mode.code());
                self.push(true, false, false);
                self.user_editing = false;
                self.set_autorun(mode.autorun());
                if self.autorun {
                    self.poll();
                } else {
                    self.timers.poll = None;
                }
            }
            Command::SetTriggerSource(source) => {
                self.store.set(TRIG_SOURCE, source.code());
                self.push(false, false, false);
                self.user_editing = false;
                self.redraw();
            }
            Command::SetExciteLevel(level) => {
                let field = self.trigger_source().excite_field();
                self.set_source_field(field, level.clamp(-LEVEL_LIMIT, LEVEL_LIMIT), "excite level");
            }
            Command::SetRelaxLevel(level) => {
                let field = self.trigger_source().relax_field();
                self.set_source_field(field, level.clamp(-LEVEL_LIMIT, LEVEL_LIMIT), "relax level");
            }
            Command::SetTriggerDelay(samples) => {
                let samples = samples.clamp(0.0, MAX_TRIG_DELAY_SAMPLES);
                self.store.set(DIGDAR_TRIG_DELAY, samples / SAMPLES_PER_UNIT);
                self.push(false, false, false);
            }
            Command::SetLatency(samples) => {
                let field = self.trigger_source().latency_field();
                let samples = samples.clamp(0.0, MAX_LATENCY_SAMPLES);
                self.set_source_field(field, samples / SAMPLES_PER_UNIT, "latency");
            }
            Command::ToggleAverage => {
                let enabled = self.store.local().flag(EN_AVG_AT_DEC);
                self.store.set(EN_AVG_AT_DEC, if enabled { 0.0 } else { 1.0 });
                self.push(true, true, false);
            }
            Command::Autoscale => {
                self.store.set(AUTO_FLAG, 1.0);
                self.push(true, true, false);
            }
            Command::AutoscaleY => {
                if self.render.autoscale_y().is_some() {
                    self.redraw();
                }
            }
            Command::ResetZoom => {
                let y_span = self.store.get(GUI_RESET_Y_RANGE).unwrap_or(Y_MAX_SPAN);
                self.render.reset_zoom(y_span);
                self.redraw();
                self.set_local_x(FULL_X_WINDOW, false);
                self.push(true, true, false);
            }
            Command::FitTimeRange => {
                let index = self.store.local().code(TIME_RANGE).unwrap_or(0);
                let Some(xmax) = usize::try_from(index)
                    .ok()
                    .and_then(|i| TIME_RANGE_MAX.get(i).copied())
                else {
                    log::warn!("Unknown time range {}", index);
                    return true;
                };
                if let Some((ymin, ymax)) = self.render.visible_y() {
                    self.render.set_y(ymin, ymax);
                }
                self.render.set_x(0.0, xmax);
                self.set_local_x((0.0, xmax), false);
                self.redraw();
                self.push(true, true, false);
            }
            Command::Single => {
                if self.autorun {
                    log::debug!("Single shot ignored while running continuously");
                } else {
                    self.push(true, true, true);
                }
            }
            Command::ZoomX(step) => {
                if let Some(x) = self.render.zoom_x(self.store.local(), step) {
                    self.set_local_x(x, false);
                    self.redraw();
                    self.push(true, false, false);
                }
            }
            Command::ZoomY(step) => {
                if self.render.zoom_y(self.store.local(), step).is_some() {
                    self.redraw();
                }
            }
            Command::OffsetX(direction) => {
                if let Some(x) = self.render.offset_x(self.config.offset_percent, direction) {
                    self.set_local_x(x, false);
                    self.redraw();
                    self.push(true, false, false);
                }
            }
            Command::OffsetY(direction) => {
                if self
                    .render
                    .offset_y(self.config.offset_percent, direction)
                    .is_some()
                {
                    self.redraw();
                }
            }
            Command::Select { x, y } => {
                let x = self.render.select(x, y);
                self.set_local_x(x, true);
                self.redraw();
                self.push(true, false, false);
            }
            Command::Gesture { x, y } => {
                self.render.set_x(x.0, x.1);
                self.render.set_y(y.0, y.1);
                self.redraw();
                self.timers.settle = Some(Instant::now() + self.config.settle_delay);
            }
            Command::ToggleChannel(channel) => {
                let visible = self.render.toggle_channel(channel);
                log::debug!("{} {}", channel, if visible { "shown" } else { "hidden" });
                self.redraw();
            }
            Command::Redraw => {
                if self.render.is_initialised() {
                    self.redraw();
                } else {
                    self.poll();
                }
            }
            Command::StoreParams => {
                let transport = self.transport.clone();
                let params = self.store.local().clone();
                self.spawn(async move { Completion::Stored(transport.store_params(&params).await) });
            }
            Command::LoadParams => self.load_params(false),
            Command::LoadFactoryParams => self.load_params(true),
            Command::ImportParams(params) => {
                log::info!("Importing {} parameters", params.len());
                self.store.replace_local(params);
                self.redraw();
                self.push(true, false, false);
            }
            Command::ExportParams(path) => match storage::export_to(&path, self.store.local()) {
                Ok(()) => {
                    log::info!("Exported parameters to {}", path.display());
                    self.emit(SyncEvent::Exported(path));
                }
                Err(e) => log::warn!("Export failed: {}", e),
            },
            Command::SaveNamed(name) => match self.param_files().save(&name, self.store.local()) {
                Ok(()) => self.emit(SyncEvent::NamedSaved(name)),
                Err(e) => log::warn!("Saving parameter set '{}' failed: {}", name, e),
            },
            Command::RecallNamed(name) => match self.param_files().load(&name) {
                Ok(Some(params)) => {
                    log::info!("Recalled parameter set '{}'", name);
                    self.store.replace_local(params);
                    self.redraw();
                    self.push(true, false, false);
                    self.emit(SyncEvent::NamedRecalled(name));
                }
                Ok(None) => log::warn!("No parameter set named '{}'", name),
                Err(e) => log::warn!("Recalling parameter set '{}' failed: {}", name, e),
            },
            Command::ListNamed => {
                let names = self.param_files().list();
                self.emit(SyncEvent::NamedSets(names));
            }
            Command::DeleteNamed(name) => match self.param_files().delete(&name) {
                Ok(existed) => self.emit(SyncEvent::NamedDeleted { name, existed }),
                Err(e) => log::warn!("Deleting parameter set '{}' failed: {}", name, e),
            },
            Command::Shutdown => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use digdar_core::{ChannelId, RenderFrame, TriggerMode};
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;
    use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

    use crate::event::Severity;

    type Reply = Result<DataResponse, TransportError>;

    /// Scripted server. An empty fetch script leaves the poll hanging; an
    /// empty push script echoes the pushed parameters.
    #[derive(Default)]
    struct FakeTransport {
        fetches: Mutex<VecDeque<Reply>>,
        pushes: Mutex<VecDeque<Reply>>,
        starts: Mutex<VecDeque<Reply>>,
        pushed: Mutex<Vec<(ParameterSet, Duration)>>,
        fetch_timeouts: Mutex<Vec<Duration>>,
        fetch_count: AtomicUsize,
        start_count: AtomicUsize,
        stop_count: AtomicUsize,
        push_gate: Option<Semaphore>,
    }

    impl FakeTransport {
        fn gated() -> Self {
            FakeTransport {
                push_gate: Some(Semaphore::new(0)),
                ..Default::default()
            }
        }

        fn script_fetch(&self, reply: Reply) {
            self.fetches.lock().unwrap().push_back(reply);
        }

        fn script_push(&self, reply: Reply) {
            self.pushes.lock().unwrap().push_back(reply);
        }

        fn pushed(&self) -> Vec<(ParameterSet, Duration)> {
            self.pushed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn fetch(&self, timeout: Duration) -> Result<DataResponse, TransportError> {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            self.fetch_timeouts.lock().unwrap().push(timeout);
            let reply = self.fetches.lock().unwrap().pop_front();
            match reply {
                Some(reply) => reply,
                None => std::future::pending().await,
            }
        }

        async fn push(
            &self,
            params: &ParameterSet,
            timeout: Duration,
        ) -> Result<DataResponse, TransportError> {
            self.pushed.lock().unwrap().push((params.clone(), timeout));
            if let Some(gate) = &self.push_gate {
                gate.acquire().await.unwrap().forget();
            }
            let reply = self.pushes.lock().unwrap().pop_front();
            reply.unwrap_or_else(|| Ok(response(json!({"status": "OK", "datasets": {"params": params}}))))
        }

        async fn start_app(&self, _app_id: &str) -> Result<DataResponse, TransportError> {
            self.start_count.fetch_add(1, Ordering::SeqCst);
            let reply = self.starts.lock().unwrap().pop_front();
            reply.unwrap_or_else(|| Ok(response(json!({"status": "OK"}))))
        }

        async fn stop_app(&self) -> Result<(), TransportError> {
            self.stop_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn store_params(&self, _params: &ParameterSet) -> Result<(), TransportError> {
            Ok(())
        }

        async fn load_params(&self) -> Result<ParameterSet, TransportError> {
            Ok(ParameterSet::new())
        }

        async fn load_factory_params(&self) -> Result<ParameterSet, TransportError> {
            Ok(default_params())
        }
    }

    struct NullSurface;

    impl PlotSurface for NullSurface {
        fn width_px(&self) -> usize {
            500
        }

        fn draw(&mut self, _frame: &RenderFrame) {}
    }

    fn response(value: serde_json::Value) -> DataResponse {
        DataResponse::from_slice(value.to_string().as_bytes()).unwrap()
    }

    fn data(params: serde_json::Value, app: &str) -> Reply {
        Ok(response(json!({
            "status": "OK",
            "app": {"id": app},
            "datasets": {"params": params, "g1": [[[0.0, 0.1], [1.0, 0.2], [2.0, 0.3]]]}
        })))
    }

    fn confirmed() -> ParameterSet {
        ParameterSet::from_pairs(&[
            (TRIG_MODE, 1.0),
            (TRIG_SOURCE, 3.0),
            ("digdar_trig_excite", 0.5),
            ("digdar_trig_relax", 0.2),
            (XMIN, 0.0),
            (XMAX, 130.0),
            (TIME_RANGE, 0.0),
        ])
    }

    fn scheduler(fake: &Arc<FakeTransport>) -> SyncScheduler<FakeTransport> {
        SyncScheduler::new(fake.clone(), ClientConfig::default(), Box::new(NullSurface))
    }

    /// A scheduler past its first round trip.
    fn running(fake: &Arc<FakeTransport>) -> SyncScheduler<FakeTransport> {
        let mut s = scheduler(fake);
        s.app_started = true;
        s.render.initialise(2.0);
        s.render
            .replace_datasets(vec![vec![(0.0, 0.1), (50.0, 0.2), (130.0, 0.3)].into()]);
        s.store.adopt(confirmed(), false);
        s
    }

    fn commands() -> (mpsc::Sender<Command>, mpsc::Receiver<Command>) {
        mpsc::channel(16)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushes_during_flight_coalesce_into_one_replay() {
        let fake = Arc::new(FakeTransport::gated());
        let mut s = running(&fake);
        let (tx, mut rx) = commands();

        tx.send(Command::BeginEdit).await.unwrap();
        for level in [0.6, 0.7, 0.8] {
            tx.send(Command::SetExciteLevel(level)).await.unwrap();
        }
        for _ in 0..4 {
            assert!(s.step(&mut rx).await);
        }
        // Let the first push reach the gate
        tokio::task::yield_now().await;
        assert_eq!(fake.pushed().len(), 1);
        assert_eq!(s.state(), SyncState::PushPending);

        fake.push_gate.as_ref().unwrap().add_permits(10);
        assert!(s.step(&mut rx).await); // first completion, replay owed
        assert_eq!(s.state(), SyncState::Replaying);
        assert!(s.step(&mut rx).await); // replay timer fires
        assert!(s.step(&mut rx).await); // replay completion

        let pushed = fake.pushed();
        assert_eq!(pushed.len(), 2);
        assert_eq!(pushed[0].0.get("digdar_trig_excite"), Some(0.6));
        assert_eq!(pushed[1].0.get("digdar_trig_excite"), Some(0.8));
        assert_eq!(s.state(), SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_server_error_drops_replay() {
        let fake = Arc::new(FakeTransport::gated());
        fake.script_push(Ok(response(json!({"status": "ERROR", "reason": "busy"}))));
        let mut s = running(&fake);
        let (tx, mut rx) = commands();
        let mut events = s.subscribe();

        tx.send(Command::SetExciteLevel(0.6)).await.unwrap();
        tx.send(Command::SetExciteLevel(0.7)).await.unwrap();
        assert!(s.step(&mut rx).await);
        assert!(s.step(&mut rx).await);
        fake.push_gate.as_ref().unwrap().add_permits(10);
        assert!(s.step(&mut rx).await);

        assert!(!s.machine.replay_pending());
        assert!(s.timers.replay.is_none());
        let notice = s.notice.clone().unwrap();
        assert_eq!(notice.message, "busy");
        assert_eq!(notice.severity, Severity::NonFatal);

        let mut saw_notice = false;
        while let Ok(event) = events.try_recv() {
            saw_notice |= matches!(event, SyncEvent::Notice(_));
        }
        assert!(saw_notice);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_retries_once_then_fails() {
        let fake = Arc::new(FakeTransport::default());
        fake.script_fetch(Err(TransportError::Status(500)));
        fake.script_fetch(Err(TransportError::Status(500)));
        let mut s = running(&fake);
        let (_tx, mut rx) = commands();

        s.poll();
        assert!(s.step(&mut rx).await);
        tokio::task::yield_now().await;
        assert_eq!(fake.fetch_count.load(Ordering::SeqCst), 2);
        assert!(s.notice.is_none());

        assert!(s.step(&mut rx).await);
        assert_eq!(fake.fetch_count.load(Ordering::SeqCst), 2);
        let notice = s.notice.clone().unwrap();
        assert!(notice.is_fatal());
        assert_eq!(notice.message, "Data receiving failed. Error status: error");
        assert!(notice.retry && notice.restart);
        assert!(s.timers.poll.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_start_starts_app_and_posts_defaults() {
        let fake = Arc::new(FakeTransport::default());
        fake.script_fetch(Ok(response(json!({"status": "ERROR"}))));
        fake.script_fetch(data(json!({"trig_mode": 1, "gui_reset_y_range": 1.0}), "digdar"));
        let mut s = scheduler(&fake);
        let (_tx, mut rx) = commands();

        s.poll();
        assert!(s.step(&mut rx).await); // ERROR: start
        assert!(s.step(&mut rx).await); // started: post defaults
        assert!(s.step(&mut rx).await); // defaults accepted: poll
        assert!(s.step(&mut rx).await); // data

        assert_eq!(fake.start_count.load(Ordering::SeqCst), 1);
        assert_eq!(fake.pushed()[0].0, default_params());
        assert!(s.app_started);
        assert!(s.params().is_ready());
        assert!(s.render.is_initialised());
        assert_eq!(s.render.view().y.explicit(), Some((-0.5, 0.5)));
        assert!(s.timers.poll.is_some(), "normal mode keeps polling");
    }

    #[tokio::test(start_paused = true)]
    async fn test_app_mismatch_before_start_starts_app() {
        let fake = Arc::new(FakeTransport::default());
        fake.script_fetch(data(json!({"trig_mode": 1}), "scope"));
        let mut s = scheduler(&fake);
        let (_tx, mut rx) = commands();

        s.poll();
        assert!(s.step(&mut rx).await);
        tokio::task::yield_now().await;
        assert_eq!(fake.start_count.load(Ordering::SeqCst), 1);
        assert!(s.notice.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_app_mismatch_after_start_offers_switch() {
        let fake = Arc::new(FakeTransport::default());
        fake.script_fetch(data(json!({"trig_mode": 1}), "scope"));
        let mut s = running(&fake);
        let (tx, mut rx) = commands();
        let mut events = s.subscribe();

        s.poll();
        assert!(s.step(&mut rx).await);
        assert_eq!(fake.start_count.load(Ordering::SeqCst), 0);
        assert_eq!(s.pending_app.as_deref(), Some("scope"));
        assert!(s.notice.as_ref().unwrap().switch_app);
        let mut saw_mismatch = false;
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::AppMismatch { reported } = event {
                assert_eq!(reported.as_deref(), Some("scope"));
                saw_mismatch = true;
            }
        }
        assert!(saw_mismatch);

        tx.send(Command::SwitchApp).await.unwrap();
        assert!(s.step(&mut rx).await);
        assert_eq!(s.expected_app, "scope");
        assert_eq!(s.generation, 1);
        assert!(!s.params().is_ready());
        assert!(s.notice.is_none());
        tokio::task::yield_now().await;
        assert_eq!(fake.fetch_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_mode_stops_the_loop_unless_again() {
        let fake = Arc::new(FakeTransport::default());
        fake.script_fetch(data(json!({"trig_mode": 2}), "digdar"));
        fake.script_fetch(Ok(response(json!({
            "status": "AGAIN",
            "app": {"id": "digdar"},
            "datasets": {"params": {"trig_mode": 2}}
        }))));
        let mut s = running(&fake);
        let (_tx, mut rx) = commands();

        s.poll();
        assert!(s.step(&mut rx).await);
        assert!(!s.autorun);
        assert!(s.timers.poll.is_none());

        s.poll();
        assert!(s.step(&mut rx).await);
        assert!(s.timers.poll.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_view_overrides_server_x() {
        let fake = Arc::new(FakeTransport::default());
        fake.script_fetch(data(json!({"trig_mode": 1, "xmin": 0.0, "xmax": 130.0}), "digdar"));
        let mut s = running(&fake);
        let (_tx, mut rx) = commands();
        s.render.set_x(10.0, 20.0);

        s.poll();
        assert!(s.step(&mut rx).await);
        assert_eq!(s.params().get(XMIN), Some(10.0));
        assert_eq!(s.params().get(XMAX), Some(20.0));
        assert!(!s.params().is_dirty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_x_is_ignored_while_editing() {
        let fake = Arc::new(FakeTransport::default());
        let forced = json!({"trig_mode": 1, "time_units": 1, "forcex_flag": 1, "xmin": 0.0, "xmax": 8.0});
        fake.script_fetch(data(forced.clone(), "digdar"));
        fake.script_fetch(data(forced, "digdar"));
        let mut s = running(&fake);
        let (tx, mut rx) = commands();

        tx.send(Command::BeginEdit).await.unwrap();
        assert!(s.step(&mut rx).await);
        s.poll();
        assert!(s.step(&mut rx).await);
        assert_eq!(s.render.explicit_x(), None);
        // Units still follow the server while editing
        assert_eq!(s.params().get("time_units"), Some(1.0));

        tx.send(Command::EndEdit).await.unwrap();
        assert!(s.step(&mut rx).await);
        s.poll();
        assert!(s.step(&mut rx).await);
        assert_eq!(s.render.explicit_x(), Some((0.0, 8.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gesture_settles_into_rounded_push() {
        let fake = Arc::new(FakeTransport::default());
        let mut s = running(&fake);
        let (tx, mut rx) = commands();

        tx.send(Command::Gesture {
            x: (0.123456, 5.6789),
            y: (-1.0, 1.0),
        })
        .await
        .unwrap();
        assert!(s.step(&mut rx).await);
        assert!(s.timers.settle.is_some());
        assert!(fake.pushed().is_empty());

        assert!(s.step(&mut rx).await); // settle timer
        assert!(s.timers.settle.is_none());
        tokio::task::yield_now().await;
        let pushed = fake.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].0.get(XMIN), Some(0.12));
        assert_eq!(pushed[0].0.get(XMAX), Some(5.68));
    }

    #[tokio::test(start_paused = true)]
    async fn test_autoscale_uses_long_timeout_and_applies_window() {
        let fake = Arc::new(FakeTransport::default());
        fake.script_push(Ok(response(json!({
            "status": "OK",
            "datasets": {"params": {
                "trig_mode": 1, "auto_flag": 0, "min_y": -0.5, "max_y": 0.5,
                "xmin": 0.0, "xmax": 130.0
            }}
        }))));
        fake.script_fetch(data(json!({"trig_mode": 1}), "digdar"));
        let mut s = running(&fake);
        s.render.toggle_channel(ChannelId::Heading);
        let (tx, mut rx) = commands();

        tx.send(Command::Autoscale).await.unwrap();
        assert!(s.step(&mut rx).await); // dispatch
        assert!(s.step(&mut rx).await); // push completion, then poll
        let pushed = fake.pushed();
        assert_eq!(pushed[0].0.get(AUTO_FLAG), Some(1.0));
        assert_eq!(pushed[0].1, Duration::from_secs(20));
        assert_eq!(s.params().get(AUTO_FLAG), Some(0.0));
        assert_eq!(s.render.explicit_x(), Some((0.0, 130.0)));
        assert_eq!(s.render.view().y.explicit(), Some((-0.5, 0.5)));
        assert!(s.render.is_visible(ChannelId::Heading));

        assert!(s.step(&mut rx).await); // poll completion
        assert_eq!(fake.fetch_timeouts.lock().unwrap()[0], Duration::from_secs(20));
        assert!(!s.machine.long_timeout_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parameter_commands_wait_for_snapshot() {
        let fake = Arc::new(FakeTransport::default());
        let mut s = scheduler(&fake);
        let (tx, mut rx) = commands();

        tx.send(Command::SetExciteLevel(0.3)).await.unwrap();
        tx.send(Command::Shutdown).await.unwrap();
        assert!(s.step(&mut rx).await);
        assert!(s.params().local().is_empty());
        assert!(!s.step(&mut rx).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_settings_use_source_fields() {
        let fake = Arc::new(FakeTransport::gated());
        let mut s = running(&fake);
        let (tx, mut rx) = commands();

        tx.send(Command::SetTriggerSource(TriggerSource::Acp))
            .await
            .unwrap();
        tx.send(Command::SetRelaxLevel(-3.0)).await.unwrap();
        tx.send(Command::SetLatency(800.0)).await.unwrap();
        tx.send(Command::SetTriggerDelay(64.0)).await.unwrap();
        for _ in 0..4 {
            assert!(s.step(&mut rx).await);
        }
        let local = s.params().local();
        assert_eq!(local.get(TRIG_SOURCE), Some(4.0));
        assert_eq!(local.get("digdar_acp_relax"), Some(-1.0));
        assert_eq!(local.get("digdar_acp_latency"), Some(100.0));
        assert_eq!(local.get(DIGDAR_TRIG_DELAY), Some(8.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_shot_only_when_stopped() {
        let fake = Arc::new(FakeTransport::gated());
        let mut s = running(&fake);
        let (tx, mut rx) = commands();

        tx.send(Command::Single).await.unwrap();
        assert!(s.step(&mut rx).await);
        tokio::task::yield_now().await;
        assert!(fake.pushed().is_empty());

        tx.send(Command::SetTriggerMode(TriggerMode::Single))
            .await
            .unwrap();
        assert!(s.step(&mut rx).await);
        assert!(!s.autorun);
        fake.push_gate.as_ref().unwrap().add_permits(10);
        assert!(s.step(&mut rx).await);

        tx.send(Command::Single).await.unwrap();
        assert!(s.step(&mut rx).await);
        tokio::task::yield_now().await;
        let pushed = fake.pushed();
        assert_eq!(pushed.last().unwrap().0.get("single_btn"), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_factory_params_replaces_local_without_push() {
        let fake = Arc::new(FakeTransport::default());
        let mut s = running(&fake);
        let (tx, mut rx) = commands();

        tx.send(Command::LoadFactoryParams).await.unwrap();
        assert!(s.step(&mut rx).await);
        assert!(s.step(&mut rx).await);
        assert_eq!(s.params().get(TRIG_MODE), Some(1.0));
        assert_eq!(s.params().get(EN_AVG_AT_DEC), Some(1.0));
        assert!(fake.pushed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fit_time_range_forces_push() {
        let fake = Arc::new(FakeTransport::gated());
        let mut s = running(&fake);
        let (tx, mut rx) = commands();

        tx.send(Command::FitTimeRange).await.unwrap();
        assert!(s.step(&mut rx).await);
        tokio::task::yield_now().await;
        let pushed = fake.pushed();
        assert_eq!(pushed.len(), 1, "forced even though xmin/xmax did not change");
        assert_eq!(pushed[0].0.get(XMAX), Some(130.0));
        assert_eq!(s.render.explicit_x(), Some((0.0, 130.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_during_forced_push_do_not_queue_replays() {
        let fake = Arc::new(FakeTransport::gated());
        for _ in 0..5 {
            fake.script_fetch(data(json!(confirmed()), "digdar"));
        }
        let mut s = running(&fake);
        let (tx, mut rx) = commands();

        // Forced push with nothing dirty
        tx.send(Command::FitTimeRange).await.unwrap();
        assert!(s.step(&mut rx).await);
        assert!(!s.params().is_dirty());

        for _ in 0..5 {
            s.poll();
            assert!(s.step(&mut rx).await);
            assert!(!s.machine.dispatch().is_queued());
        }
        assert_eq!(s.state(), SyncState::PushPending);

        fake.push_gate.as_ref().unwrap().add_permits(10);
        assert!(s.step(&mut rx).await);
        assert!(s.timers.replay.is_none());
        assert!(!s.machine.replay_pending());
        assert_eq!(fake.pushed().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_fatal_notice_holds_polling_until_dismissed() {
        let fake = Arc::new(FakeTransport::default());
        fake.script_push(Ok(response(json!({"status": "ERROR", "reason": "busy"}))));
        let mut s = running(&fake);
        s.autorun = true;
        s.schedule_poll();
        assert!(s.timers.poll.is_some());
        let (tx, mut rx) = commands();

        tx.send(Command::SetExciteLevel(0.6)).await.unwrap();
        assert!(s.step(&mut rx).await);
        assert!(s.step(&mut rx).await);
        assert_eq!(s.notice.as_ref().map(|n| n.severity), Some(Severity::NonFatal));
        assert!(s.timers.poll.is_none());

        s.schedule_poll();
        assert!(s.timers.poll.is_none());

        tx.send(Command::Dismiss).await.unwrap();
        assert!(s.step(&mut rx).await);
        assert!(s.notice.is_none());
        assert!(s.timers.poll.is_some());
    }

    #[tokio::test]
    async fn test_stop_app_sent_on_teardown_even_before_start() {
        let fake = Arc::new(FakeTransport::default());
        let s = scheduler(&fake);
        let (tx, rx) = commands();
        tx.send(Command::Shutdown).await.unwrap();

        Toplevel::new(move |top| async move {
            top.start(SubsystemBuilder::new("Scheduler", |subsys| s.run(rx, subsys)));
        })
        .handle_shutdown_requests(Duration::from_secs(1))
        .await
        .unwrap();

        assert_eq!(fake.stop_count.load(Ordering::SeqCst), 1);
        assert_eq!(fake.start_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_named_sets_save_list_recall_delete() {
        let temp_dir = TempDir::new().unwrap();
        let fake = Arc::new(FakeTransport::gated());
        let mut s = running(&fake);
        s.config.params_dir = temp_dir.path().to_path_buf();
        let (tx, mut rx) = commands();
        let mut events = s.subscribe();

        tx.send(Command::SaveNamed("harbour".into())).await.unwrap();
        tx.send(Command::ListNamed).await.unwrap();
        for _ in 0..2 {
            assert!(s.step(&mut rx).await);
        }
        let mut listed = None;
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::NamedSets(names) = event {
                listed = Some(names);
            }
        }
        assert_eq!(listed, Some(vec!["harbour".to_string()]));

        // Edit locally, then recall the saved set
        s.store.set("digdar_trig_excite", 0.9);
        tx.send(Command::RecallNamed("harbour".into())).await.unwrap();
        assert!(s.step(&mut rx).await);
        assert_eq!(s.params().get("digdar_trig_excite"), Some(0.5));
        tokio::task::yield_now().await;
        assert_eq!(fake.pushed().len(), 1);

        tx.send(Command::DeleteNamed("harbour".into())).await.unwrap();
        tx.send(Command::DeleteNamed("harbour".into())).await.unwrap();
        assert!(s.step(&mut rx).await);
        assert!(s.step(&mut rx).await);
        let mut deletions = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::NamedDeleted { existed, .. } = event {
                deletions.push(existed);
            }
        }
        assert_eq!(deletions, vec![true, false]);
    }
}
