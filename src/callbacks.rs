// SPDX-License-Identifier: MIT
//! The five optional hooks (spec §6 "Callbacks"). Callbacks receive a
//! non-owning reference to a [`crate::slot::ClientSlot`] and a handle back
//! to the server for unicast/broadcast/disconnect; they must not retain
//! either past return (spec §3 "Ownership").

use crate::error::DisconnectReason;
use crate::slot::ClientSlot;

/// Capability interface a caller implements to observe connection
/// lifecycle and I/O events. Mirrors the "capability interface... captured
/// with explicit context" resolution spec §9 prescribes in place of the
/// original's raw pointer + opaque user-data pointer.
///
/// Default implementations are no-ops so a caller only overrides the hooks
/// it cares about.
pub trait ServerCallbacks: Send + Sync {
    /// Fires when a slot reaches `Established` (post-TLS, if enabled).
    fn on_client_connect(&self, slot: &ClientSlot) {
        let _ = slot;
    }

    /// Fires when a slot leaves `Establishing`/`Established` for any
    /// reason.
    fn on_client_disconnect(&self, slot: &ClientSlot, reason: DisconnectReason) {
        let _ = (slot, reason);
    }

    /// Fires when the sweeper observes an idle breach, *before* the
    /// disconnect routine runs.
    fn on_client_timeout(&self, slot: &ClientSlot) {
        let _ = slot;
    }

    /// Fires after a successful read populated the read buffer. Invoked
    /// with the slot's read lock held (spec §4.2 step 2) — must not
    /// perform blocking I/O back into the same slot.
    fn on_client_rcv(&self, slot: &ClientSlot, data: &[u8]) {
        let _ = (slot, data);
    }

    /// Fires after a successful write drained the write buffer.
    fn on_client_snd(&self, slot: &ClientSlot) {
        let _ = slot;
    }
}

/// Default callback set: every hook is a no-op.
pub struct NullCallbacks;

impl ServerCallbacks for NullCallbacks {}
