// SPDX-License-Identifier: MIT
//! Process-wide TLS context: certificate/key loading and a forced, single
//! modern TLS version (spec §4.6).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, Once};

use rustls::ServerConfig as RustlsServerConfig;
use rustls::ServerConnection;

use crate::error::ServerError;

static TLS_LIBRARY_INIT: Once = Once::new();

/// Process-wide TLS library init, guarded by a once-primitive (spec §9
/// "Global mutable state": only the TLS init flag is process-wide).
fn ensure_tls_library_initialized() {
    TLS_LIBRARY_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Server-wide TLS context, shared read-only after `open` by the Acceptor
/// (for `ServerConnection::new`) and every IoWorker (spec §3 "Ownership").
pub struct TlsContext {
    config: Arc<RustlsServerConfig>,
}

impl TlsContext {
    /// Load certificate and private key from the given PEM paths, forcing
    /// TLS 1.3 as both the minimum and maximum protocol version (spec §4.6
    /// "eliminate downgrade surface"). Renegotiation is disallowed
    /// implicitly: TLS 1.3 has no renegotiation handshake.
    pub fn new(cert_path: &Path, key_path: &Path) -> Result<Self, ServerError> {
        ensure_tls_library_initialized();
        let certs = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;

        let config = RustlsServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ServerError::TlsConfig(format!("certificate/key mismatch: {e}")))?;

        Ok(TlsContext {
            config: Arc::new(config),
        })
    }

    /// Allocate a fresh TLS session bound to a newly-accepted connection
    /// (spec §4.1 step 4). The returned `ServerConnection` is driven by the
    /// owning IoWorker across subsequent readiness events; there is no
    /// separate BIO object in rustls's sync API — the worker feeds socket
    /// bytes directly via `read_tls`/`write_tls`.
    pub fn new_session(&self) -> Result<ServerConnection, ServerError> {
        ServerConnection::new(self.config.clone())
            .map_err(|e| ServerError::TlsConfig(format!("failed to start session: {e}")))
    }
}

fn load_certs(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, ServerError> {
    let file = File::open(path)
        .map_err(|e| ServerError::TlsConfig(format!("opening cert {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::TlsConfig(format!("parsing cert {}: {e}", path.display())))
}

fn load_private_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>, ServerError> {
    let file = File::open(path)
        .map_err(|e| ServerError::TlsConfig(format!("opening key {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ServerError::TlsConfig(format!("parsing key {}: {e}", path.display())))?
        .ok_or_else(|| ServerError::TlsConfig(format!("no private key found in {}", path.display())))
}

/// Outcome of driving a handshake one step (spec §4.2 step 1).
pub enum HandshakeStep {
    Complete,
    WantRead,
    WantWrite,
    Failed,
}

/// Progress a non-blocking TLS handshake by one readiness event. Reads
/// ciphertext off `stream` into `tls`, lets rustls process it, and writes
/// back any pending handshake bytes. Never blocks: every I/O call on
/// `stream` is on an already-non-blocking socket.
pub fn drive_handshake(
    tls: &mut ServerConnection,
    stream: &mut mio::net::TcpStream,
) -> HandshakeStep {
    use std::io::ErrorKind;

    if tls.wants_read() {
        match tls.read_tls(stream) {
            Ok(0) => return HandshakeStep::Failed,
            Ok(_) => {
                if let Err(e) = tls.process_new_packets() {
                    let _ = e;
                    return HandshakeStep::Failed;
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {}
            Err(_) => return HandshakeStep::Failed,
        }
    }

    if tls.wants_write() {
        match tls.write_tls(stream) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {}
            Err(_) => return HandshakeStep::Failed,
        }
    }

    if !tls.is_handshaking() {
        HandshakeStep::Complete
    } else if tls.wants_write() {
        HandshakeStep::WantWrite
    } else {
        HandshakeStep::WantRead
    }
}
