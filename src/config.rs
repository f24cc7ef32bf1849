// SPDX-License-Identifier: MIT
//! Server configuration: listener parameters, worker/client sizing, TLS
//! paths, and callback registration, assembled into one [`ServerConfig`].
//!
//! Mirrors the chainable builder in the teacher's `PoolBuilder`
//! (`secure_channel_improved.rs`): a `*Builder` with `with_*` methods and a
//! fallible `build()`.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::callbacks::ServerCallbacks;
use crate::error::ServerError;

/// Minimum and maximum legal TCP port per spec §6.
pub const MIN_PORT: u16 = 1024;
pub const MAX_PORT: u16 = 49151;
const DEFAULT_PORT: u16 = 1024;

/// Address family for the listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// Server-socket parameters (spec §3 `ListenerConfig`).
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub family: AddressFamily,
    pub bind_addr: IpAddr,
    pub port: u16,
    /// When `family == V6`, reject IPv4-mapped peers instead of
    /// canonicalizing them (spec §6).
    pub v6_only: bool,
    pub tls_enabled: bool,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            family: AddressFamily::V4,
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            v6_only: false,
            tls_enabled: false,
            cert_path: PathBuf::from("./certs/server.crt"),
            key_path: PathBuf::from("./certs/server.key"),
        }
    }
}

impl ListenerConfig {
    pub(crate) fn validate(&self) -> Result<(), ServerError> {
        if !(MIN_PORT..=MAX_PORT).contains(&self.port) {
            return Err(ServerError::InvalidArgument(format!(
                "port {} outside legal range {}..={}",
                self.port, MIN_PORT, MAX_PORT
            )));
        }
        if self.tls_enabled {
            if self.cert_path.as_os_str().is_empty() {
                return Err(ServerError::InvalidArgument(
                    "tls enabled but cert_path is empty".into(),
                ));
            }
            if self.key_path.as_os_str().is_empty() {
                return Err(ServerError::InvalidArgument(
                    "tls enabled but key_path is empty".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Worker pool sizing (spec §2 `W`).
#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    /// Number of IoWorkers (`W`).
    pub workers: usize,
    /// Bound on the mio `Events` wait per readiness poll.
    pub poll_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        WorkerPoolConfig {
            workers: 4,
            poll_timeout: Duration::from_millis(100),
        }
    }
}

impl WorkerPoolConfig {
    pub(crate) fn validate(&self) -> Result<(), ServerError> {
        if self.workers == 0 {
            return Err(ServerError::InvalidArgument("workers must be >= 1".into()));
        }
        Ok(())
    }
}

/// Per-slot sizing and lifetime (spec §2 `S`; spec §4.5 `configure(clients)`).
#[derive(Debug, Clone, Copy)]
pub struct ClientLimits {
    /// Slots per worker (`S`).
    pub slots_per_worker: usize,
    /// Size in bytes of each slot's read/write buffers.
    pub buffer_size: usize,
    /// Idle timeout before a slot is force-disconnected.
    pub idle_timeout: Duration,
}

impl Default for ClientLimits {
    fn default() -> Self {
        ClientLimits {
            slots_per_worker: 256,
            buffer_size: 4096,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

impl ClientLimits {
    pub(crate) fn validate(&self) -> Result<(), ServerError> {
        if self.slots_per_worker == 0 {
            return Err(ServerError::InvalidArgument(
                "slots_per_worker must be >= 1".into(),
            ));
        }
        if self.buffer_size < 2 {
            return Err(ServerError::InvalidArgument(
                "buffer_size must reserve at least one data byte plus NUL".into(),
            ));
        }
        Ok(())
    }
}

/// Aggregated, validated configuration. Only constructible via
/// [`ServerConfigBuilder::build`].
#[derive(Clone)]
pub struct ServerConfig {
    pub listener: ListenerConfig,
    pub workers: WorkerPoolConfig,
    pub clients: ClientLimits,
    pub callbacks: Arc<dyn ServerCallbacks>,
}

impl ServerConfig {
    /// Total slot capacity across all workers (`W * S`).
    pub fn capacity(&self) -> usize {
        self.workers.workers * self.clients.slots_per_worker
    }

    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder for [`ServerConfig`], mirroring the teacher's `PoolBuilder`.
pub struct ServerConfigBuilder {
    listener: ListenerConfig,
    workers: WorkerPoolConfig,
    clients: ClientLimits,
    callbacks: Option<Arc<dyn ServerCallbacks>>,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        ServerConfigBuilder {
            listener: ListenerConfig::default(),
            workers: WorkerPoolConfig::default(),
            clients: ClientLimits::default(),
            callbacks: None,
        }
    }
}

impl ServerConfigBuilder {
    pub fn with_port(mut self, port: u16) -> Self {
        self.listener.port = port;
        self
    }

    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.listener.bind_addr = addr;
        self
    }

    pub fn with_family(mut self, family: AddressFamily) -> Self {
        self.listener.family = family;
        self
    }

    pub fn with_v6_only(mut self, v6_only: bool) -> Self {
        self.listener.v6_only = v6_only;
        self
    }

    pub fn with_tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.listener.tls_enabled = true;
        self.listener.cert_path = cert_path.into();
        self.listener.key_path = key_path.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers.workers = workers;
        self
    }

    pub fn with_slots_per_worker(mut self, slots: usize) -> Self {
        self.clients.slots_per_worker = slots;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.clients.buffer_size = size;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.clients.idle_timeout = timeout;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.workers.poll_timeout = timeout;
        self
    }

    pub fn with_callbacks(mut self, callbacks: Arc<dyn ServerCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    pub fn build(self) -> Result<ServerConfig, ServerError> {
        self.listener.validate()?;
        self.workers.validate()?;
        self.clients.validate()?;
        Ok(ServerConfig {
            listener: self.listener,
            workers: self.workers,
            clients: self.clients,
            callbacks: self
                .callbacks
                .unwrap_or_else(|| Arc::new(crate::callbacks::NullCallbacks)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let cfg = ServerConfig::builder().build().unwrap();
        assert_eq!(cfg.listener.port, DEFAULT_PORT);
        assert!(!cfg.listener.tls_enabled);
        assert_eq!(cfg.workers.workers, 4);
        assert_eq!(cfg.clients.slots_per_worker, 256);
    }

    #[test]
    fn rejects_port_out_of_range() {
        let err = ServerConfig::builder().with_port(80).build().unwrap_err();
        assert!(matches!(err, ServerError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_zero_workers() {
        let err = ServerConfig::builder()
            .with_workers(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidArgument(_)));
    }

    #[test]
    fn tls_requires_nonempty_paths() {
        let cfg = ServerConfig::builder()
            .with_tls("certs/a.pem", "certs/b.pem")
            .build()
            .unwrap();
        assert!(cfg.listener.tls_enabled);
    }

    #[test]
    fn capacity_multiplies_workers_by_slots() {
        let cfg = ServerConfig::builder()
            .with_workers(3)
            .with_slots_per_worker(10)
            .build()
            .unwrap();
        assert_eq!(cfg.capacity(), 30);
    }

    #[test]
    fn rejects_zero_slots_per_worker() {
        let err = ServerConfig::builder()
            .with_slots_per_worker(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidArgument(_)));
    }
}
