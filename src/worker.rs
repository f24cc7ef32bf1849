// SPDX-License-Identifier: MIT
//! IoWorker (spec §4.2): one thread per worker, owning its own `mio::Poll`
//! and driving handshake progression, reads, writes, and disconnects for
//! its row of the `SlotTable`.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::Instant;

use mio::{Events, Interest, Poll};
use tracing::{span, Level};

use crate::disconnect::disconnect_slot;
use crate::error::DisconnectReason;
use crate::runtime::Shared;
use crate::slot::{ClientSlot, Location, SlotConn, SlotState};
use crate::tls::{drive_handshake, HandshakeStep};

fn is_transient(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

/// Read plaintext into `buf`. For TLS slots this pulls ciphertext off the
/// socket and lets rustls decrypt; for plaintext slots it reads the socket
/// directly. `Ok(0)` means orderly close at either layer.
fn do_read(conn: &mut SlotConn, buf: &mut [u8]) -> io::Result<usize> {
    let stream = conn.stream.as_mut().expect("slot has no stream while Established");
    match conn.tls.as_mut() {
        Some(tls) => {
            match tls.read_tls(stream) {
                Ok(0) => return Ok(0),
                Ok(_) => {
                    if let Err(e) = tls.process_new_packets() {
                        return Err(io::Error::new(io::ErrorKind::Other, e));
                    }
                }
                Err(e) if is_transient(&e) => {}
                Err(e) => return Err(e),
            }
            tls.reader().read(buf)
        }
        None => stream.read(buf),
    }
}

/// Write `data` as plaintext. For TLS slots this buffers into rustls then
/// flushes any resulting ciphertext to the socket. The returned `bool` is
/// `true` when the TLS layer still has encrypted bytes buffered after a
/// `WouldBlock` cut the flush short (`tls.wants_write()`); the caller must
/// keep write-readiness armed in that case rather than treat the write as
/// finished.
fn do_write(conn: &mut SlotConn, data: &[u8]) -> io::Result<(usize, bool)> {
    let stream = conn.stream.as_mut().expect("slot has no stream while Established");
    match conn.tls.as_mut() {
        Some(tls) => {
            let n = tls.writer().write(data)?;
            while tls.wants_write() {
                match tls.write_tls(stream) {
                    Ok(_) => {}
                    Err(e) if is_transient(&e) => break,
                    Err(e) => return Err(e),
                }
            }
            Ok((n, tls.wants_write()))
        }
        None => stream.write(data).map(|n| (n, false)),
    }
}

/// Runs until `shared.phase` leaves `Running`, then disconnects every slot
/// this worker owns before returning (spec §4.2 "Shutdown").
pub(crate) fn run(worker_index: usize, mut poll: Poll, shared: Arc<Shared>) {
    let mut events = Events::with_capacity(shared.slot_table.slots_per_worker().min(1024));
    let poll_timeout = shared.config.workers.poll_timeout;

    while shared.phase.is_running() {
        match poll.poll(&mut events, Some(poll_timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                shared.logger.log(
                    crate::logger::LogLevel::Error,
                    "worker",
                    format!("worker {worker_index} poll failed: {e}"),
                );
                shared.phase.request_stop_on_fatal();
                break;
            }
        }

        for event in events.iter() {
            let slot_index = event.token().0;
            let location = Location::new(worker_index, slot_index);
            let slot = shared.slot_table.slot(location);

            if !progress_handshake(&shared, poll.registry(), location, slot) {
                continue;
            }

            if event.is_readable() {
                handle_read(&shared, poll.registry(), slot);
            }
            if event.is_writable() {
                handle_write(&shared, poll.registry(), slot);
            }
        }
    }

    for slot in shared.slot_table.row(worker_index) {
        disconnect_slot(&shared, poll.registry(), slot, DisconnectReason::ServerStopping);
    }
}

/// Advances a handshake in progress. Returns `false` if the caller should
/// not also process read/write for this readiness event (handshake still in
/// progress, or the slot was just disconnected).
fn progress_handshake(shared: &Shared, registry: &mio::Registry, location: Location, slot: &ClientSlot) -> bool {
    let mut conn = slot.conn.lock().unwrap();
    if conn.state != SlotState::Establishing {
        return true;
    }

    let tls = conn.tls.as_mut().expect("Establishing slot must hold a tls session");
    let stream = conn.stream.as_mut().expect("Establishing slot must hold a stream");
    match drive_handshake(tls, stream) {
        HandshakeStep::Complete => {
            conn.state = SlotState::Established;
            conn.last_activity = Some(Instant::now());
            let stream = conn.stream.as_mut().unwrap();
            let _ = registry.reregister(stream, location.to_token(), Interest::READABLE);
            drop(conn);
            shared.callbacks.on_client_connect(slot);
            false
        }
        HandshakeStep::WantRead | HandshakeStep::WantWrite => false,
        HandshakeStep::Failed => {
            drop(conn);
            disconnect_slot(shared, registry, slot, DisconnectReason::TlsHandshakeFailed);
            false
        }
    }
}

fn handle_read(shared: &Shared, registry: &mio::Registry, slot: &ClientSlot) {
    if !slot.is_established() {
        return;
    }
    let _span = span!(Level::TRACE, "read", location = ?slot.location);

    let mut read_buf = slot.read_buf.lock().unwrap();
    let cap = read_buf.data.len();
    let result = {
        let mut conn = slot.conn.lock().unwrap();
        if conn.state != SlotState::Established {
            return;
        }
        let outcome = do_read(&mut conn, &mut read_buf.data[..cap - 1]);
        if let Ok(n) = outcome {
            if n > 0 {
                conn.last_activity = Some(Instant::now());
            }
        }
        outcome
    };

    match result {
        Ok(0) => {
            drop(read_buf);
            disconnect_slot(shared, registry, slot, DisconnectReason::PeerClosed);
        }
        Ok(n) => {
            read_buf.len = n;
            shared.callbacks.on_client_rcv(slot, &read_buf.data[..n]);
            read_buf.clear();
        }
        Err(e) if is_transient(&e) => {}
        Err(_) => {
            drop(read_buf);
            disconnect_slot(shared, registry, slot, DisconnectReason::PeerProtocol);
        }
    }
}

fn handle_write(shared: &Shared, registry: &mio::Registry, slot: &ClientSlot) {
    let _span = span!(Level::TRACE, "write", location = ?slot.location);
    let mut write_buf = slot.write_buf.lock().unwrap();
    if write_buf.len == 0 {
        return;
    }

    let pending = write_buf.data[..write_buf.len].to_vec();
    let result = {
        let mut conn = slot.conn.lock().unwrap();
        if !matches!(conn.state, SlotState::Established) {
            return;
        }
        do_write(&mut conn, &pending)
    };

    match result {
        Ok((n, tls_wants_write)) if n >= pending.len() => {
            write_buf.clear();
            drop(write_buf);
            {
                let mut conn = slot.conn.lock().unwrap();
                conn.last_activity = Some(Instant::now());
                if let Some(stream) = conn.stream.as_mut() {
                    // All plaintext was consumed, but if rustls still has
                    // ciphertext buffered (WouldBlock cut the flush short),
                    // write-readiness must stay armed so the next writable
                    // event finishes draining it; only then fall back to
                    // read-only interest.
                    let interest = if tls_wants_write {
                        Interest::READABLE | Interest::WRITABLE
                    } else {
                        Interest::READABLE
                    };
                    let _ = registry.reregister(stream, slot.location.to_token(), interest);
                }
            }
            shared.callbacks.on_client_snd(slot);
        }
        Ok((n, _)) => {
            // Partial write: keep the unsent tail pending, write interest
            // stays armed for the next readiness event.
            write_buf.data.copy_within(n..write_buf.len, 0);
            write_buf.len -= n;
        }
        Err(e) if is_transient(&e) => {}
        Err(_) => {
            drop(write_buf);
            disconnect_slot(shared, registry, slot, DisconnectReason::PeerProtocol);
        }
    }
}
