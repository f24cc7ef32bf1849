//! Scenario 4 from spec §8: a connected client that sends nothing is
//! disconnected once the idle timeout elapses, `on_client_timeout` firing
//! before `on_client_disconnect`.

mod common;

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use netforge::{AddressFamily, ClientSlot, DisconnectReason, ServerCallbacks, ServerConfig};

#[derive(Default)]
struct TimeoutTracker {
    timeout_fired: AtomicBool,
    disconnect_after_timeout: AtomicBool,
    timeout_at: std::sync::Mutex<Option<Instant>>,
    disconnects: AtomicUsize,
}

impl ServerCallbacks for TimeoutTracker {
    fn on_client_timeout(&self, _slot: &ClientSlot) {
        self.timeout_fired.store(true, Ordering::SeqCst);
        *self.timeout_at.lock().unwrap() = Some(Instant::now());
    }

    fn on_client_disconnect(&self, _slot: &ClientSlot, reason: DisconnectReason) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if reason == DisconnectReason::TimedOut && self.timeout_fired.load(Ordering::SeqCst) {
            self.disconnect_after_timeout.store(true, Ordering::SeqCst);
        }
    }
}

#[test]
fn idle_client_times_out_and_disconnects() {
    let port = common::free_port();
    let tracker = Arc::new(TimeoutTracker::default());

    let idle_timeout = Duration::from_secs(2);
    let config = ServerConfig::builder()
        .with_family(AddressFamily::V4)
        .with_bind_addr("127.0.0.1".parse().unwrap())
        .with_port(port)
        .with_workers(1)
        .with_slots_per_worker(4)
        .with_buffer_size(256)
        .with_idle_timeout(idle_timeout)
        .with_callbacks(tracker.clone())
        .build()
        .expect("valid config");

    let mut server = netforge::Server::init(config).expect("init");
    server.open().expect("open");
    server.run().expect("run");

    let started = Instant::now();
    let client = TcpStream::connect(("127.0.0.1", port)).expect("connect");

    // Expect on_client_timeout at t in [timeout, timeout + timeout/8] (spec
    // §8 scenario 4), then on_client_disconnect; give generous slack for
    // scheduling jitter in CI.
    let fired = common::wait_until(Duration::from_secs(6), Duration::from_millis(50), || {
        tracker.timeout_fired.load(Ordering::SeqCst)
    });
    assert!(fired, "on_client_timeout never fired");
    let elapsed = started.elapsed();
    assert!(elapsed >= idle_timeout, "timeout fired too early: {elapsed:?}");

    let disconnected = common::wait_until(Duration::from_secs(2), Duration::from_millis(50), || {
        tracker.disconnect_after_timeout.load(Ordering::SeqCst)
    });
    assert!(disconnected, "on_client_disconnect never followed the timeout");
    assert_eq!(tracker.disconnects.load(Ordering::SeqCst), 1);

    drop(client);
    server.stop().expect("stop");
    server.close().expect("close");
    server.deinit().expect("deinit");
}
