// SPDX-License-Identifier: MIT
//! A concurrent TCP/TLS server engine: one Acceptor, a fixed pool of
//! IoWorkers multiplexing many client slots, TimeoutSweepers enforcing idle
//! timeouts, and a public control surface for lifecycle, broadcast,
//! unicast, and disconnect.
//!
//! The server never blocks its hot path on application code: callbacks run
//! synchronously from the owning worker, and a non-blocking `Logger`
//! collaborator absorbs diagnostic events off to the side.

mod acceptor;
pub mod callbacks;
pub mod config;
mod disconnect;
pub mod error;
pub mod logger;
mod runtime;
pub mod server;
pub mod slot;
pub mod slot_table;
mod sweeper;
pub mod tls;
mod worker;

pub use callbacks::{NullCallbacks, ServerCallbacks};
pub use config::{AddressFamily, ClientLimits, ListenerConfig, ServerConfig, ServerConfigBuilder, WorkerPoolConfig};
pub use error::{DisconnectReason, ServerError};
pub use logger::{LogLevel, Logger, LoggerConfig, LogOutput, OverflowPolicy, RotationPolicy};
pub use runtime::ServerPhase;
pub use server::{Server, ServerMetrics};
pub use slot::{ClientSlot, Location, PeerAddr, SlotState};
pub use slot_table::SlotTable;
pub use tls::TlsContext;
