//! Scenario 6 from spec §8: with N clients connected, `stop` disconnects
//! every one of them and joins every worker/sweeper/acceptor thread.

mod common;

use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use netforge::{AddressFamily, ClientSlot, DisconnectReason, ServerCallbacks, ServerConfig};

#[derive(Default)]
struct ShutdownTracker {
    connected: AtomicUsize,
    disconnected: AtomicUsize,
}

impl ServerCallbacks for ShutdownTracker {
    fn on_client_connect(&self, _slot: &ClientSlot) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    fn on_client_disconnect(&self, _slot: &ClientSlot, reason: DisconnectReason) {
        if reason == DisconnectReason::ServerStopping {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn stop_disconnects_every_client_and_joins_every_thread() {
    let port = common::free_port();
    let tracker = Arc::new(ShutdownTracker::default());
    let n = 5usize;

    let config = ServerConfig::builder()
        .with_family(AddressFamily::V4)
        .with_bind_addr("127.0.0.1".parse().unwrap())
        .with_port(port)
        .with_workers(2)
        .with_slots_per_worker(8)
        .with_buffer_size(256)
        .with_callbacks(tracker.clone())
        .build()
        .expect("valid config");

    let mut server = netforge::Server::init(config).expect("init");
    server.open().expect("open");
    server.run().expect("run");

    let mut clients: Vec<TcpStream> = Vec::with_capacity(n);
    for _ in 0..n {
        clients.push(TcpStream::connect(("127.0.0.1", port)).expect("connect"));
    }
    let all_connected = common::wait_until(Duration::from_secs(2), Duration::from_millis(20), || {
        tracker.connected.load(Ordering::SeqCst) >= n
    });
    assert!(all_connected, "not all clients reached Established before stop");

    // `stop` joins the acceptor, every worker, and every sweeper before
    // returning, so by the time it returns every slot's disconnect callback
    // must already have fired (spec §4.2 "Shutdown", §8 scenario 6).
    server.stop().expect("stop");
    assert_eq!(tracker.disconnected.load(Ordering::SeqCst), n);

    // Every client observes FIN (plaintext here; a TLS variant would also
    // see close_notify ahead of it, exercised by the TLS echo scenario's
    // handshake teardown path).
    for mut client in clients {
        use std::io::Read;
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).unwrap_or(0);
        assert_eq!(n, 0, "expected orderly FIN from the server");
    }

    server.close().expect("close");
    server.deinit().expect("deinit");
}
