//! Scenarios 1 and 2 from spec §8: a single client round-trips `"ping"`
//! through `on_client_rcv`, with and without TLS.

mod common;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use netforge::{AddressFamily, ServerCallbacks, ServerConfig};

/// Echoes every received payload straight back to its own slot via
/// `unicast`, exactly as spec scenario 1/2's `on_client_rcv` callback does.
struct EchoCallbacks {
    server: common::ServerRef,
}

impl ServerCallbacks for EchoCallbacks {
    fn on_client_rcv(&self, slot: &netforge::ClientSlot, data: &[u8]) {
        let location = slot.location;
        let payload = data.to_vec();
        self.server.with(|server| {
            let _ = server.unicast(location, &payload);
        });
    }
}

fn run_echo_scenario(tls: bool) {
    let port = common::free_port();
    let echo = Arc::new(EchoCallbacks {
        server: common::ServerRef::new(),
    });

    let mut builder = ServerConfig::builder()
        .with_family(AddressFamily::V4)
        .with_bind_addr("127.0.0.1".parse().unwrap())
        .with_port(port)
        .with_workers(1)
        .with_slots_per_worker(4)
        .with_buffer_size(256)
        .with_callbacks(echo.clone());

    let cert_paths = if tls {
        let (cert, key) = common::ephemeral_cert_files();
        builder = builder.with_tls(cert.clone(), key.clone());
        Some((cert, key))
    } else {
        None
    };

    let config = builder.build().expect("valid config");
    let mut server = netforge::Server::init(config).expect("init");
    server.open().expect("open");
    server.run().expect("run");

    let server = Arc::new(std::sync::RwLock::new(server));
    echo.server.bind(&server);

    if tls {
        common::ensure_crypto_provider();
        let (cert_path, _) = cert_paths.unwrap();
        let root_store = common::trust_only(&cert_path);
        let client_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let server_name = rustls::pki_types::ServerName::try_from("localhost".to_string()).unwrap();
        let conn = rustls::ClientConnection::new(Arc::new(client_config), server_name).expect("client conn");
        let tcp = TcpStream::connect(("127.0.0.1", port)).expect("connect");
        tcp.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut stream = rustls::StreamOwned::new(conn, tcp);

        stream.write_all(b"ping").expect("write ping");
        stream.flush().expect("flush");

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).expect("read echo");
        assert_eq!(&buf, b"ping");
    } else {
        let mut tcp = TcpStream::connect(("127.0.0.1", port)).expect("connect");
        tcp.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        tcp.write_all(b"ping").expect("write ping");

        let mut buf = [0u8; 4];
        tcp.read_exact(&mut buf).expect("read echo");
        assert_eq!(&buf, b"ping");
    }

    let mut server = server.write().unwrap();
    server.stop().expect("stop");
    server.close().expect("close");
    server.deinit().expect("deinit");
}

#[test]
fn tls_echo_one_client() {
    run_echo_scenario(true);
}

#[test]
fn non_tls_echo_never_enters_establishing() {
    // The non-TLS path transitions straight Standby -> Established (spec §3
    // invariant 1, "Establishing skipped when TLS disabled"); exercised
    // implicitly by a successful round trip with tls_enabled == false.
    run_echo_scenario(false);
}

