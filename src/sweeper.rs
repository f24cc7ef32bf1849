// SPDX-License-Identifier: MIT
//! TimeoutSweeper (spec §4.3): one auxiliary thread per worker, periodically
//! disconnecting slots that have been idle past the configured timeout.

use std::sync::Arc;
use std::time::Instant;

use crate::disconnect::disconnect_slot;
use crate::error::DisconnectReason;
use crate::runtime::Shared;
use crate::slot::SlotState;

/// Sleeps `idle_timeout / 8` between passes (spec §4.3), so a breach is
/// observed within one eighth of the configured timeout.
pub(crate) fn run(worker_index: usize, shared: Arc<Shared>, registry: mio::Registry) {
    let idle_timeout = shared.config.clients.idle_timeout;
    let interval = (idle_timeout / 8).max(std::time::Duration::from_millis(1));

    while shared.phase.is_running() {
        std::thread::sleep(interval);
        if !shared.phase.is_running() {
            break;
        }

        for slot in shared.slot_table.row(worker_index) {
            let breached = {
                let conn = slot.conn.lock().unwrap();
                matches!(conn.state, SlotState::Establishing | SlotState::Established)
                    && conn
                        .last_activity
                        .map(|t| Instant::now().duration_since(t) > idle_timeout)
                        .unwrap_or(false)
            };

            if breached {
                shared.callbacks.on_client_timeout(slot);
                disconnect_slot(&shared, &registry, slot, DisconnectReason::TimedOut);
            }
        }
    }
}
