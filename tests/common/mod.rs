//! Shared test fixtures for the end-to-end scenarios in spec §8: an
//! ephemeral self-signed certificate pair (written to temp files, since
//! `TlsContext` only loads from paths) and a free loopback port picker.

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::{SystemTime, UNIX_EPOCH};

static CRYPTO_PROVIDER: Once = Once::new();

/// Installs rustls's default crypto provider once per test process, needed
/// to build a bare `rustls::ClientConfig` in these tests (the server's own
/// `TlsContext` installs it independently on its own `Once`).
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Picks a port the OS currently has free. Tiny race between drop and
/// reuse, acceptable for test purposes.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().unwrap().port()
}

/// Generates a self-signed cert/key pair for `localhost` via `rcgen` and
/// writes both as PEM files under a unique temp directory, returning
/// `(cert_path, key_path)`.
pub fn ephemeral_cert_files() -> (PathBuf, PathBuf) {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let nonce = COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    let dir = std::env::temp_dir().join(format!("netforge-test-{pid}-{unique}-{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp cert dir");

    let certified_key = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .expect("generate self-signed cert");

    let cert_path = dir.join("server.crt");
    let key_path = dir.join("server.key");
    std::fs::write(&cert_path, certified_key.cert.pem()).expect("write cert pem");
    std::fs::write(&key_path, certified_key.key_pair.serialize_pem()).expect("write key pem");

    (cert_path, key_path)
}

/// Root store trusting only the cert at `cert_path`, for building a test
/// `rustls::ClientConfig`.
pub fn trust_only(cert_path: &std::path::Path) -> rustls::RootCertStore {
    let pem = std::fs::read(cert_path).expect("read cert pem for trust store");
    let mut reader = std::io::BufReader::new(pem.as_slice());
    let mut store = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        store.add(cert.expect("parse cert der")).expect("add cert to root store");
    }
    store
}

/// Holds a weak handle to the `Server` under test so a callback (which only
/// ever sees a non-owning `&ClientSlot`, per spec §3 "Ownership") can still
/// reach `broadcast`/`unicast`/`disconnect` on the surrounding server. Bound
/// once, right after `run()`, well before any client connects in these
/// tests.
pub struct ServerRef(std::sync::OnceLock<std::sync::Weak<std::sync::RwLock<netforge::Server>>>);

impl ServerRef {
    pub fn new() -> Self {
        ServerRef(std::sync::OnceLock::new())
    }

    pub fn bind(&self, server: &std::sync::Arc<std::sync::RwLock<netforge::Server>>) {
        let _ = self.0.set(std::sync::Arc::downgrade(server));
    }

    pub fn with<R>(&self, f: impl FnOnce(&netforge::Server) -> R) -> Option<R> {
        let weak = self.0.get()?;
        let arc = weak.upgrade()?;
        let guard = arc.read().unwrap();
        Some(f(&guard))
    }
}

/// Blocks the calling thread until `predicate` is true or `timeout` elapses,
/// polling every `poll_every`. Returns whether the predicate became true.
pub fn wait_until(
    timeout: std::time::Duration,
    poll_every: std::time::Duration,
    mut predicate: impl FnMut() -> bool,
) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(poll_every);
    }
}
