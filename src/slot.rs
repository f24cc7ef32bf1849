// SPDX-License-Identifier: MIT
//! The central entity of the server engine: [`ClientSlot`] and its state
//! machine (spec §3).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Mutex;
use std::time::Instant;

use mio::net::TcpStream;
use rustls::ServerConnection;

/// Public handle to a slot: `(worker_index, slot_index)`, stable for the
/// slot's lifetime (spec §3, §9 "Cyclic reference Worker<->Slot").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub worker_index: usize,
    pub slot_index: usize,
}

impl Location {
    pub fn new(worker_index: usize, slot_index: usize) -> Self {
        Location {
            worker_index,
            slot_index,
        }
    }

    /// Encode as an `mio::Token` for this worker's private poll registry.
    /// Each worker owns its own `mio::Poll`, so only `slot_index` needs to
    /// survive the round trip.
    pub(crate) fn to_token(self) -> mio::Token {
        mio::Token(self.slot_index)
    }
}

/// `ClientSlot` lifecycle states (spec §3 invariant 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Never initialized (should not be observed after `SlotTable::new`).
    Unable,
    /// Free, awaiting a connection.
    Standby,
    /// TCP accepted, TLS handshake not yet complete.
    Establishing,
    /// Ready for application I/O.
    Established,
    /// Drained, awaiting reset to `Standby`.
    Closed,
}

/// Address family plus concrete peer address (spec §3 `peer`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

impl PeerAddr {
    /// IPv4-mapped-IPv6 addresses are canonicalised to IPv4 (spec §4.1 step
    /// 3, §2 "Supplemented features").
    pub fn canonicalize(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V6(v6) => {
                if let Some(v4) = v6.ip().to_ipv4_mapped() {
                    PeerAddr(SocketAddr::new(IpAddr::V4(v4), v6.port()))
                } else {
                    PeerAddr(addr)
                }
            }
            other => PeerAddr(other),
        }
    }

    pub fn unset() -> Self {
        PeerAddr(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
    }
}

/// Everything that transitions together during accept / handshake /
/// disconnect, guarded by one lock so the state machine never observes a
/// torn update (spec §3 invariants 1-4).
pub(crate) struct SlotConn {
    pub state: SlotState,
    pub stream: Option<TcpStream>,
    pub peer: PeerAddr,
    pub tls: Option<ServerConnection>,
    pub last_activity: Option<Instant>,
}

impl SlotConn {
    fn fresh() -> Self {
        SlotConn {
            state: SlotState::Standby,
            stream: None,
            peer: PeerAddr::unset(),
            tls: None,
            last_activity: None,
        }
    }
}

/// A fixed-capacity buffer plus its occupied length, always mutated
/// together under the buffer's own lock (spec §3 `read_buf`/`read_len`,
/// `write_buf`/`write_len`).
pub(crate) struct SlotBuffer {
    pub data: Vec<u8>,
    pub len: usize,
}

impl SlotBuffer {
    fn new(capacity: usize) -> Self {
        SlotBuffer {
            data: vec![0u8; capacity],
            len: 0,
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
        for b in &mut self.data {
            *b = 0;
        }
    }
}

/// Per-connection state (spec §3). Buffers are reserved `NUL`-terminated —
/// `data.len() == capacity` but only `capacity - 1` bytes are ever used for
/// payload (spec §9 "Off-by-one in source buffer").
pub struct ClientSlot {
    pub location: Location,
    pub(crate) conn: Mutex<SlotConn>,
    pub(crate) read_buf: Mutex<SlotBuffer>,
    pub(crate) write_buf: Mutex<SlotBuffer>,
}

impl ClientSlot {
    pub(crate) fn new(location: Location, buffer_capacity: usize) -> Self {
        ClientSlot {
            location,
            conn: Mutex::new(SlotConn::fresh()),
            read_buf: Mutex::new(SlotBuffer::new(buffer_capacity)),
            write_buf: Mutex::new(SlotBuffer::new(buffer_capacity)),
        }
    }

    /// Current lifecycle state. Racy by nature (another thread may
    /// transition it immediately after this returns) — intended for
    /// diagnostics and tests, not for synchronization.
    pub fn state(&self) -> SlotState {
        self.conn.lock().unwrap().state
    }

    /// Peer address, or [`PeerAddr::unset`] outside `Establishing`/
    /// `Established`/`Closed`.
    pub fn peer(&self) -> PeerAddr {
        self.conn.lock().unwrap().peer
    }

    pub fn is_established(&self) -> bool {
        self.state() == SlotState::Established
    }

    /// Reset the slot to `Standby`, clearing buffers, lengths, peer, and
    /// `last_activity` (spec §4.4 step 4). Does not touch the socket or TLS
    /// session — callers must have already torn those down.
    pub(crate) fn reset(&self) {
        {
            let mut conn = self.conn.lock().unwrap();
            conn.state = SlotState::Standby;
            conn.stream = None;
            conn.tls = None;
            conn.peer = PeerAddr::unset();
            conn.last_activity = None;
        }
        self.read_buf.lock().unwrap().clear();
        self.write_buf.lock().unwrap().clear();
    }
}
