// SPDX-License-Identifier: MIT
//! The Acceptor task (spec §4.1): one dedicated thread turning completed TCP
//! accepts into occupied slots on the least-loaded worker.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use mio::{Events, Interest, Poll, Registry, Token};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{info, span, warn, Level};

use crate::config::AddressFamily;
use crate::error::ServerError;
use crate::runtime::Shared;
use crate::slot::{Location, PeerAddr, SlotState};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Bind and listen per spec §6: configured family/address/port, IPv6-only
/// toggled via `socket2`, backlog the OS maximum.
pub(crate) fn bind_listener(shared: &Shared) -> Result<mio::net::TcpListener, ServerError> {
    let listener_cfg = &shared.config.listener;
    let domain = match listener_cfg.family {
        AddressFamily::V4 => Domain::IPV4,
        AddressFamily::V6 => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if listener_cfg.family == AddressFamily::V6 {
        socket.set_only_v6(listener_cfg.v6_only)?;
    }
    let addr: SocketAddr = SocketAddr::new(listener_cfg.bind_addr, listener_cfg.port);
    socket.bind(&addr.into())?;
    socket.listen(libc::SOMAXCONN)?;
    socket.set_nonblocking(true)?;

    let std_listener: std::net::TcpListener = socket.into();
    Ok(mio::net::TcpListener::from_std(std_listener))
}

/// Runs until `shared.phase` leaves `Running` (spec §4.1 "until the server's
/// state leaves Running"). Per-connection failures are logged and the loop
/// continues; a broken multiplexer is fatal and pushes the server toward
/// `Stopping`.
///
/// Returns the listener on every exit path: its lifetime spans open->close,
/// outliving any single run->stop cycle (spec §3 "Lifecycle"), so `Server`
/// recovers it by joining this thread's `JoinHandle` rather than through a
/// side channel (a channel `Receiver` would make `Server: !Sync`).
pub(crate) fn run(
    mut listener: mio::net::TcpListener,
    shared: Arc<Shared>,
    worker_registries: Vec<Registry>,
) -> mio::net::TcpListener {
    let mut poll = match Poll::new() {
        Ok(p) => p,
        Err(e) => {
            shared
                .logger
                .log(crate::logger::LogLevel::Error, "acceptor", format!("poll init failed: {e}"));
            shared.phase.request_stop_on_fatal();
            return listener;
        }
    };

    if let Err(e) = poll
        .registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
    {
        shared.logger.log(
            crate::logger::LogLevel::Error,
            "acceptor",
            format!("failed to register listener: {e}"),
        );
        shared.phase.request_stop_on_fatal();
        return listener;
    }

    let mut events = Events::with_capacity(256);
    let poll_timeout = shared.config.workers.poll_timeout;

    while shared.phase.is_running() {
        match poll.poll(&mut events, Some(poll_timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                shared
                    .logger
                    .log(crate::logger::LogLevel::Error, "acceptor", format!("poll failed: {e}"));
                shared.phase.request_stop_on_fatal();
                break;
            }
        }

        for event in events.iter() {
            if event.token() != LISTENER_TOKEN {
                continue;
            }
            loop {
                match listener.accept() {
                    Ok((stream, addr)) => handle_accept(stream, addr, &shared, &worker_registries),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        shared.logger.log(
                            crate::logger::LogLevel::Warn,
                            "acceptor",
                            format!("accept error: {e}"),
                        );
                        break;
                    }
                }
            }
        }
    }

    let _ = poll.registry().deregister(&mut listener);
    listener
}

fn handle_accept(
    mut stream: mio::net::TcpStream,
    addr: SocketAddr,
    shared: &Shared,
    worker_registries: &[Registry],
) {
    let _span = span!(Level::INFO, "accept", peer = %addr);

    let worker_index = shared.slot_table.least_loaded_worker();
    let slot_index = match shared.slot_table.first_standby_slot(worker_index) {
        Some(i) => i,
        None => {
            warn!("server full, dropping accepted connection from {addr}");
            shared.logger.log(
                crate::logger::LogLevel::Warn,
                "acceptor",
                "server full: dropping accepted connection".to_string(),
            );
            drop(stream);
            return;
        }
    };

    let location = Location::new(worker_index, slot_index);
    let slot = shared.slot_table.slot(location);
    let peer = PeerAddr::canonicalize(addr);

    let tls_session = match &shared.tls_ctx {
        Some(ctx) => match ctx.new_session() {
            Ok(session) => Some(session),
            Err(e) => {
                shared
                    .logger
                    .log(crate::logger::LogLevel::Error, "acceptor", format!("tls session alloc failed: {e}"));
                drop(stream);
                return;
            }
        },
        None => None,
    };

    let establishes_tls = tls_session.is_some();

    let registered = {
        let mut conn = slot.conn.lock().unwrap();
        conn.peer = peer;
        conn.last_activity = Some(Instant::now());
        conn.state = if establishes_tls {
            SlotState::Establishing
        } else {
            SlotState::Established
        };
        conn.tls = tls_session;

        let interest = if establishes_tls {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };

        let result = worker_registries[worker_index].register(&mut stream, location.to_token(), interest);
        conn.stream = Some(stream);
        result
    };

    if let Err(e) = registered {
        shared.logger.log(
            crate::logger::LogLevel::Error,
            "acceptor",
            format!("registration failed, resetting slot: {e}"),
        );
        slot.reset();
        return;
    }

    shared.slot_table.increment_live(worker_index);
    shared.metrics.record_accept();
    info!("placed {addr} at {location:?}, tls={establishes_tls}");

    if !establishes_tls {
        shared.callbacks.on_client_connect(slot);
    }
}
