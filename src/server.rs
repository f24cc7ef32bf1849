// SPDX-License-Identifier: MIT
//! `Server`: the public `ControlSurface` contract and state machine (spec
//! §4.5).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use mio::Registry;

use crate::acceptor;
use crate::config::ServerConfig;
use crate::disconnect::disconnect_slot;
use crate::error::{DisconnectReason, ServerError};
use crate::logger::{Logger, LoggerConfig};
use crate::runtime::{PhaseCell, ServerPhase, Shared};
use crate::slot::Location;
use crate::slot_table::SlotTable;
use crate::sweeper;
use crate::tls::TlsContext;
use crate::worker;

/// Plain in-process counters, exposed to a caller without wiring an HTTP
/// metrics endpoint (spec's Non-goals exclude HTTP/application framing; see
/// `SPEC_FULL.md` §1 on why the teacher's `prometheus`+`hyper` exporter is
/// not carried into the core).
#[derive(Default)]
pub struct ServerMetrics {
    accepted_total: AtomicU64,
    disconnected_total: AtomicU64,
}

impl ServerMetrics {
    pub(crate) fn record_accept(&self) {
        self.accepted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disconnect(&self) {
        self.disconnected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accepted_total(&self) -> u64 {
        self.accepted_total.load(Ordering::Relaxed)
    }

    pub fn disconnected_total(&self) -> u64 {
        self.disconnected_total.load(Ordering::Relaxed)
    }
}

struct RunHandles {
    acceptor: JoinHandle<mio::net::TcpListener>,
    workers: Vec<JoinHandle<()>>,
    sweepers: Vec<JoinHandle<()>>,
    registries: Vec<Registry>,
}

/// The server engine. Owns the slot table, the logger, and (while open) the
/// listening socket and TLS context; spawns the acceptor/worker/sweeper
/// threads on `run` and joins them on `stop`.
pub struct Server {
    config: Arc<ServerConfig>,
    phase: Arc<PhaseCell>,
    slot_table: Option<Arc<SlotTable>>,
    logger: Option<Arc<Logger>>,
    listener: Option<mio::net::TcpListener>,
    tls_ctx: Option<Arc<TlsContext>>,
    handles: Mutex<Option<RunHandles>>,
    pub metrics: Arc<ServerMetrics>,
}

impl Server {
    /// `init`: allocate the `SlotTable`, start the Logger, ignore SIGPIPE
    /// (spec §4.5, §6 "Signals"). Post-condition: `Initialized`.
    pub fn init(config: ServerConfig) -> Result<Self, ServerError> {
        Self::init_with_logger(config, LoggerConfig::default())
    }

    pub fn init_with_logger(config: ServerConfig, logger_config: LoggerConfig) -> Result<Self, ServerError> {
        ignore_sigpipe();
        let config = Arc::new(config);
        let slot_table = Arc::new(SlotTable::new(
            config.workers.workers,
            config.clients.slots_per_worker,
            config.clients.buffer_size,
        ));
        let logger = Arc::new(Logger::start(logger_config));

        Ok(Server {
            config,
            phase: Arc::new(PhaseCell::new(ServerPhase::Initialized)),
            slot_table: Some(slot_table),
            logger: Some(logger),
            listener: None,
            tls_ctx: None,
            handles: Mutex::new(None),
            metrics: Arc::new(ServerMetrics::default()),
        })
    }

    pub fn phase(&self) -> ServerPhase {
        self.phase.get()
    }

    fn require_phase(&self, expected: ServerPhase) -> Result<(), ServerError> {
        if self.phase.get() == expected {
            Ok(())
        } else {
            Err(ServerError::InvalidState("operation not legal in the current server phase"))
        }
    }

    fn require_phase_in(&self, expected: &[ServerPhase]) -> Result<(), ServerError> {
        if expected.contains(&self.phase.get()) {
            Ok(())
        } else {
            Err(ServerError::InvalidState("operation not legal in the current server phase"))
        }
    }

    /// `configure`: legal only in `Initialized` or `Closed`; changes never
    /// alter phase (spec §4.5). Additive, per field group (`SPEC_FULL.md`
    /// §2): call whichever of the four helpers cover the fields you want to
    /// change, the rest of `ServerConfig` is left untouched.
    pub fn configure_listener(&mut self, f: impl FnOnce(&mut crate::config::ListenerConfig)) -> Result<(), ServerError> {
        self.require_phase_in(&[ServerPhase::Initialized, ServerPhase::Closed])?;
        let mut listener = self.config.listener.clone();
        f(&mut listener);
        listener.validate()?;
        self.mutate_config(|c| c.listener = listener);
        Ok(())
    }

    pub fn configure_workers(&mut self, f: impl FnOnce(&mut crate::config::WorkerPoolConfig)) -> Result<(), ServerError> {
        self.require_phase_in(&[ServerPhase::Initialized, ServerPhase::Closed])?;
        let mut workers = self.config.workers;
        f(&mut workers);
        workers.validate()?;
        let worker_count_changed = workers.workers != self.config.workers.workers;
        self.mutate_config(|c| c.workers = workers);
        if worker_count_changed {
            self.slot_table = Some(Arc::new(SlotTable::new(
                workers.workers,
                self.config.clients.slots_per_worker,
                self.config.clients.buffer_size,
            )));
        }
        Ok(())
    }

    /// `configure(clients)` (spec §4.5): per-slot sizing and idle lifetime.
    /// Rebuilds the `SlotTable` when capacity or buffer size actually change.
    pub fn configure_clients(&mut self, f: impl FnOnce(&mut crate::config::ClientLimits)) -> Result<(), ServerError> {
        self.require_phase_in(&[ServerPhase::Initialized, ServerPhase::Closed])?;
        let mut clients = self.config.clients;
        f(&mut clients);
        clients.validate()?;
        let table_changed = clients.slots_per_worker != self.config.clients.slots_per_worker
            || clients.buffer_size != self.config.clients.buffer_size;
        self.mutate_config(|c| c.clients = clients);
        if table_changed {
            self.slot_table = Some(Arc::new(SlotTable::new(
                self.config.workers.workers,
                clients.slots_per_worker,
                clients.buffer_size,
            )));
        }
        Ok(())
    }

    pub fn configure_callbacks(&mut self, callbacks: Arc<dyn crate::callbacks::ServerCallbacks>) -> Result<(), ServerError> {
        self.require_phase_in(&[ServerPhase::Initialized, ServerPhase::Closed])?;
        self.mutate_config(|c| c.callbacks = callbacks);
        Ok(())
    }

    fn mutate_config(&mut self, f: impl FnOnce(&mut ServerConfig)) {
        let mut config = (*self.config).clone();
        f(&mut config);
        self.config = Arc::new(config);
    }

    /// `open`: bind and listen, build the `TlsContext` if enabled. No worker
    /// tasks yet. Post-condition: `Opened`.
    pub fn open(&mut self) -> Result<(), ServerError> {
        self.require_phase_in(&[ServerPhase::Initialized, ServerPhase::Closed])?;

        let tls_ctx = if self.config.listener.tls_enabled {
            Some(Arc::new(TlsContext::new(
                &self.config.listener.cert_path,
                &self.config.listener.key_path,
            )?))
        } else {
            None
        };

        let shared_for_bind = self.shared_snapshot();
        let listener = acceptor::bind_listener(&shared_for_bind)?;

        self.listener = Some(listener);
        self.tls_ctx = tls_ctx;
        self.phase.set(ServerPhase::Opened);
        Ok(())
    }

    fn shared_snapshot(&self) -> Shared {
        Shared {
            slot_table: self.slot_table.clone().expect("slot table allocated at init"),
            tls_ctx: self.tls_ctx.clone(),
            callbacks: self.config.callbacks.clone(),
            logger: self.logger.clone().expect("logger started at init"),
            config: self.config.clone(),
            phase: self.phase.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// `run`: spawn the acceptor, every IoWorker, every TimeoutSweeper.
    /// Legal from `Opened` or `Stopped` (spec §4.5 backward arc `Stopped ->
    /// Running`). Post-condition: `Running`.
    pub fn run(&mut self) -> Result<(), ServerError> {
        self.require_phase_in(&[ServerPhase::Opened, ServerPhase::Stopped])?;

        let listener = self.listener.take().expect("listener bound during open");

        let worker_count = self.config.workers.workers;
        let mut worker_registries_for_acceptor = Vec::with_capacity(worker_count);
        let mut control_registries = Vec::with_capacity(worker_count);
        let mut worker_handles = Vec::with_capacity(worker_count);
        let mut sweeper_handles = Vec::with_capacity(worker_count);

        self.phase.set(ServerPhase::Running);

        for w in 0..worker_count {
            let poll = mio::Poll::new()?;
            let for_acceptor = poll.registry().try_clone()?;
            let for_control = poll.registry().try_clone()?;
            let for_sweeper = poll.registry().try_clone()?;

            let shared = Arc::new(self.shared_snapshot());
            let handle = std::thread::Builder::new()
                .name(format!("io-worker-{w}"))
                .spawn(move || worker::run(w, poll, shared))
                .map_err(|e| ServerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
            worker_handles.push(handle);

            let sweeper_shared = Arc::new(self.shared_snapshot());
            let sweeper_handle = std::thread::Builder::new()
                .name(format!("timeout-sweeper-{w}"))
                .spawn(move || sweeper::run(w, sweeper_shared, for_sweeper))
                .map_err(|e| ServerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
            sweeper_handles.push(sweeper_handle);

            worker_registries_for_acceptor.push(for_acceptor);
            control_registries.push(for_control);
        }

        let acceptor_shared = Arc::new(self.shared_snapshot());
        let acceptor_handle = std::thread::Builder::new()
            .name("acceptor".into())
            .spawn(move || acceptor::run(listener, acceptor_shared, worker_registries_for_acceptor))
            .map_err(|e| ServerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        *self.handles.lock().unwrap() = Some(RunHandles {
            acceptor: acceptor_handle,
            workers: worker_handles,
            sweepers: sweeper_handles,
            registries: control_registries,
        });

        Ok(())
    }

    /// `stop`: transition to `Stopping`, join every task. Post-condition:
    /// `Stopped`.
    pub fn stop(&mut self) -> Result<(), ServerError> {
        self.require_phase(ServerPhase::Running)?;
        self.phase.set(ServerPhase::Stopping);

        if let Some(handles) = self.handles.lock().unwrap().take() {
            // The acceptor's `JoinHandle` return value recovers the listener
            // directly (spec §3 "Lifecycle": its span outlives this run/stop
            // cycle) rather than a side-channel `Receiver`, which would make
            // `Server: !Sync`.
            self.listener = handles.acceptor.join().ok();
            for h in handles.workers {
                let _ = h.join();
            }
            for h in handles.sweepers {
                let _ = h.join();
            }
        }

        self.phase.set(ServerPhase::Stopped);
        Ok(())
    }

    /// `close`: tear down the listening socket and TLS context.
    /// Post-condition: `Closed`.
    pub fn close(&mut self) -> Result<(), ServerError> {
        self.require_phase(ServerPhase::Stopped)?;
        self.listener = None;
        self.tls_ctx = None;
        self.phase.set(ServerPhase::Closed);
        Ok(())
    }

    /// `deinit`: tear down the `SlotTable` and the Logger. The Logger's
    /// lifetime spans `init`..`deinit` (spec §3 "Lifecycle").
    pub fn deinit(&mut self) -> Result<(), ServerError> {
        self.require_phase_in(&[ServerPhase::Initialized, ServerPhase::Closed])?;
        if let Some(logger) = self.logger.take() {
            logger.shutdown();
        }
        self.slot_table = None;
        Ok(())
    }

    /// `broadcast`: reject the whole call up front if `payload` exceeds a
    /// slot's usable buffer capacity (`capacity - 1`, reserving the NUL
    /// terminator); otherwise copy it into every `Established` slot's write
    /// buffer except `exclude`, skipping any slot whose `write_lock` is
    /// contended (spec §4.5, §8 boundary behavior).
    pub fn broadcast(&self, exclude: Option<Location>, payload: &[u8]) -> Result<(), ServerError> {
        self.require_phase(ServerPhase::Running)?;
        let table = self.slot_table.as_ref().expect("slot table allocated at init");
        let usable = self.config.clients.buffer_size.saturating_sub(1);
        if payload.len() > usable {
            return Err(ServerError::InvalidArgument(
                "broadcast payload exceeds slot buffer capacity".into(),
            ));
        }

        let registries = self.control_registries();
        for w in 0..table.workers() {
            for s in 0..table.slots_per_worker() {
                let location = Location::new(w, s);
                if Some(location) == exclude {
                    continue;
                }
                let slot = table.slot(location);
                if !slot.is_established() {
                    continue;
                }
                if let Ok(mut write_buf) = slot.write_buf.try_lock() {
                    write_buf.data[..payload.len()].copy_from_slice(payload);
                    if payload.len() < write_buf.data.len() {
                        write_buf.data[payload.len()] = 0;
                    }
                    write_buf.len = payload.len();
                    drop(write_buf);
                    arm_write(slot, registries.get(w));
                }
            }
        }
        Ok(())
    }

    /// `unicast`: as `broadcast`, but for exactly one slot, rejected if it
    /// is not `Established`.
    pub fn unicast(&self, location: Location, payload: &[u8]) -> Result<(), ServerError> {
        self.require_phase(ServerPhase::Running)?;
        let table = self.slot_table.as_ref().expect("slot table allocated at init");
        if location.worker_index >= table.workers() || location.slot_index >= table.slots_per_worker() {
            return Err(ServerError::InvalidArgument("location out of range".into()));
        }

        let usable = self.config.clients.buffer_size.saturating_sub(1);
        if payload.len() > usable {
            return Err(ServerError::InvalidArgument(
                "unicast payload exceeds slot buffer capacity".into(),
            ));
        }

        let slot = table.slot(location);
        if !slot.is_established() {
            return Err(ServerError::InvalidArgument("slot is not established".into()));
        }

        {
            let mut write_buf = slot.write_buf.lock().unwrap();
            write_buf.data[..payload.len()].copy_from_slice(payload);
            if payload.len() < write_buf.data.len() {
                write_buf.data[payload.len()] = 0;
            }
            write_buf.len = payload.len();
        }

        let registries = self.control_registries();
        arm_write(slot, registries.get(location.worker_index));
        Ok(())
    }

    /// `disconnect`: invoke the shared disconnect routine on the slot.
    /// Idempotent (spec §8): a second call on an already-closed slot is a
    /// no-op, returning failure without side effects.
    pub fn disconnect(&self, location: Location) -> Result<(), ServerError> {
        self.require_phase(ServerPhase::Running)?;
        let table = self.slot_table.as_ref().expect("slot table allocated at init");
        if location.worker_index >= table.workers() || location.slot_index >= table.slots_per_worker() {
            return Err(ServerError::InvalidArgument("location out of range".into()));
        }
        let slot = table.slot(location);
        if !slot.is_established() && slot.state() != crate::slot::SlotState::Establishing {
            return Err(ServerError::InvalidArgument("slot already disconnected".into()));
        }

        let registries = self.control_registries();
        let registry = registries
            .get(location.worker_index)
            .ok_or_else(|| ServerError::InvalidState("server is not running"))?;
        disconnect_slot(&self.shared_snapshot(), registry, slot, DisconnectReason::Requested);
        Ok(())
    }

    fn control_registries(&self) -> Vec<Registry> {
        match &*self.handles.lock().unwrap() {
            Some(handles) => handles
                .registries
                .iter()
                .filter_map(|r| r.try_clone().ok())
                .collect(),
            None => Vec::new(),
        }
    }
}

fn arm_write(slot: &crate::slot::ClientSlot, registry: Option<&Registry>) {
    let registry = match registry {
        Some(r) => r,
        None => return,
    };
    let mut conn = slot.conn.lock().unwrap();
    if let Some(stream) = conn.stream.as_mut() {
        let _ = registry.reregister(stream, slot.location.to_token(), mio::Interest::READABLE | mio::Interest::WRITABLE);
    }
}

#[cfg(unix)]
fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

#[cfg(not(unix))]
fn ignore_sigpipe() {}
