// SPDX-License-Identifier: MIT
//! The shared disconnect routine used by the worker, the sweeper, and
//! external control (spec §4.4). One codepath, three callers, so the
//! idempotence law in spec §8 holds regardless of who triggers it.

use crate::error::DisconnectReason;
use crate::runtime::Shared;
use crate::slot::{ClientSlot, SlotState};

/// Tear a slot down and return it to `Standby`. No-op if the slot is not
/// currently in `Establishing`/`Established` (spec §4.4 "idempotent with
/// respect to already-closed slots").
pub(crate) fn disconnect_slot(
    shared: &Shared,
    registry: &mio::Registry,
    slot: &ClientSlot,
    reason: DisconnectReason,
) {
    let worker_index = slot.location.worker_index;

    {
        let mut conn = slot.conn.lock().unwrap();
        if !matches!(conn.state, SlotState::Establishing | SlotState::Established) {
            return;
        }

        if let Some(stream) = conn.stream.as_mut() {
            let _ = registry.deregister(stream);
        }

        if let Some(mut tls) = conn.tls.take() {
            tls.send_close_notify();
            if let Some(stream) = conn.stream.as_mut() {
                let _ = tls.write_tls(stream);
            }
        }

        conn.stream = None;
        conn.state = SlotState::Closed;
    }

    slot.reset();
    shared.slot_table.decrement_live(worker_index);
    shared.metrics.record_disconnect();
    shared.callbacks.on_client_disconnect(slot, reason);
    shared.logger.log(
        crate::logger::LogLevel::Info,
        "disconnect",
        format!("{:?} closed: {reason}", slot.location),
    );
}
