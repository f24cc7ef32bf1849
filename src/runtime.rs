// SPDX-License-Identifier: MIT
//! Shared state and the server-wide lifecycle phase, threaded through the
//! Acceptor, every IoWorker, and every TimeoutSweeper (spec §4.5 "State
//! machine of the server", §5 "Scheduling model").

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::callbacks::ServerCallbacks;
use crate::config::ServerConfig;
use crate::logger::Logger;
use crate::server::ServerMetrics;
use crate::slot_table::SlotTable;
use crate::tls::TlsContext;

/// `Initialized -> Opened -> Running -> Stopping -> Stopped -> Closed`,
/// with backward arcs `Stopped -> Running` (restart) and `Closed ->
/// Opened` (reopen) (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerPhase {
    Initialized = 0,
    Opened = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
    Closed = 5,
}

impl ServerPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ServerPhase::Initialized,
            1 => ServerPhase::Opened,
            2 => ServerPhase::Running,
            3 => ServerPhase::Stopping,
            4 => ServerPhase::Stopped,
            5 => ServerPhase::Closed,
            _ => unreachable!("invalid ServerPhase encoding"),
        }
    }
}

/// Atomic holder for [`ServerPhase`], safe to read from any thread without
/// locking. Transition legality is enforced by `Server` (see `server.rs`);
/// this type only stores and swaps the value.
pub(crate) struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub fn new(initial: ServerPhase) -> Self {
        PhaseCell(AtomicU8::new(initial as u8))
    }

    pub fn get(&self) -> ServerPhase {
        ServerPhase::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, phase: ServerPhase) {
        self.0.store(phase as u8, Ordering::Release);
    }

    /// Used by worker/acceptor tasks on a fatal error to push the server
    /// toward `Stopping` without going through the public control surface
    /// (spec §7 "Run-time fatal errors cause the server's state machine to
    /// move toward `Stopping`"). A no-op if already past `Running`.
    pub fn request_stop_on_fatal(&self) {
        let _ = self.0.compare_exchange(
            ServerPhase::Running as u8,
            ServerPhase::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn is_running(&self) -> bool {
        self.get() == ServerPhase::Running
    }
}

/// Everything the Acceptor, IoWorkers, and TimeoutSweepers need, bundled
/// once per `run()` cycle and handed to each task as an `Arc`.
pub(crate) struct Shared {
    pub slot_table: Arc<SlotTable>,
    pub tls_ctx: Option<Arc<TlsContext>>,
    pub callbacks: Arc<dyn ServerCallbacks>,
    pub logger: Arc<Logger>,
    pub config: Arc<ServerConfig>,
    pub phase: Arc<PhaseCell>,
    pub metrics: Arc<ServerMetrics>,
}
