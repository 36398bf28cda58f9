//! mTLS transport: listener, dialer, and peer identity extraction.
//!
//! A private CA signs both sides. The server requires a client certificate
//! chained to that CA and hands the verified leaf to the state machine; the
//! client verifies the server against the same CA under the fixed name
//! `palioxis-server` (host identity is carried by the certificate, not DNS).

#![allow(missing_docs)]

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{
    ClientConfig, ClientConnection, RootCertStore, ServerConfig, ServerConnection, StreamOwned,
};

use crate::core::errors::{PalioxisError, Result};
use crate::core::settings::CertificatePaths;

/// SNI / verification name both sides agree on.
pub const SERVER_NAME: &str = "palioxis-server";

/// Listen backlog.
const BACKLOG: i32 = 8;

/// Socket read/write timeout on accepted and dialed connections; bounds
/// slow-loris pressure on the serial accept slot.
pub const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity extracted from the verified client certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Subject common name, for audit logging.
    pub common_name: String,
    /// DER-encoded SubjectPublicKeyInfo, for DPoP key binding.
    pub spki_der: Vec<u8>,
}

impl PeerIdentity {
    /// Parse the identity out of a DER certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        use x509_parser::prelude::*;

        let (_, cert) =
            X509Certificate::from_der(der).map_err(|err| PalioxisError::TlsHandshake {
                details: format!("peer certificate parse: {err}"),
            })?;
        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("<no-cn>")
            .to_string();
        let spki_der = cert.public_key().raw.to_vec();
        Ok(Self {
            common_name,
            spki_der,
        })
    }
}

// ──────────────────── server side ────────────────────

/// An accepted, handshaken connection with its verified peer.
pub struct ServerStream {
    stream: StreamOwned<ServerConnection, TcpStream>,
    peer: PeerIdentity,
    peer_addr: SocketAddr,
}

impl ServerStream {
    #[must_use]
    pub const fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Flush pending plaintext, send close_notify, and drop the connection.
    /// Best effort by design: the peer may already be gone.
    pub fn finish(mut self) {
        let _ = self.stream.flush();
        self.stream.conn.send_close_notify();
        let _ = self.stream.conn.complete_io(&mut self.stream.sock);
    }
}

impl Read for ServerStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for ServerStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// mTLS listener. Accepting and handshaking are split so the accept loop can
/// treat signal interruption and handshake failures differently.
#[derive(Debug)]
pub struct TlsServer {
    config: Arc<ServerConfig>,
    listener: TcpListener,
}

impl TlsServer {
    /// Load certificate material and bind the listener (SO_REUSEADDR set).
    pub fn bind(host: &str, port: u16, certs: &CertificatePaths) -> Result<Self> {
        let roots = load_root_store(&certs.ca_cert)?;
        let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|err| PalioxisError::TlsSetup {
                details: format!("client verifier: {err}"),
            })?;
        let chain = load_certs(&certs.server_cert)?;
        let key = load_private_key(&certs.server_key)?;
        let config = ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(chain, key)
            .map_err(|err| PalioxisError::TlsSetup {
                details: format!("server certificate: {err}"),
            })?;

        let listener = bind_listener(host, port)?;
        Ok(Self {
            config: Arc::new(config),
            listener,
        })
    }

    /// The bound address (useful when configured with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|err| PalioxisError::TlsSetup {
                details: format!("local_addr: {err}"),
            })
    }

    /// Accept one TCP connection. With the listener in non-blocking mode
    /// (see [`Self::set_nonblocking`]) `WouldBlock` surfaces so the caller
    /// can poll its shutdown flag between attempts.
    pub fn accept_tcp(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept()
    }

    /// Toggle non-blocking accepts. Accepted sockets are switched back to
    /// blocking in [`Self::handshake`].
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.listener.set_nonblocking(nonblocking)
    }

    /// Drive the TLS handshake and extract the verified peer identity.
    pub fn handshake(&self, mut sock: TcpStream) -> Result<ServerStream> {
        let peer_addr = sock.peer_addr().map_err(|err| PalioxisError::TlsHandshake {
            details: format!("peer_addr: {err}"),
        })?;
        // Some platforms hand out accepted sockets inheriting the listener's
        // non-blocking flag.
        let _ = sock.set_nonblocking(false);
        let _ = sock.set_read_timeout(Some(IO_TIMEOUT));
        let _ = sock.set_write_timeout(Some(IO_TIMEOUT));

        let mut conn =
            ServerConnection::new(Arc::clone(&self.config)).map_err(|err| {
                PalioxisError::TlsHandshake {
                    details: format!("connection init: {err}"),
                }
            })?;
        while conn.is_handshaking() {
            conn.complete_io(&mut sock)
                .map_err(|err| PalioxisError::TlsHandshake {
                    details: err.to_string(),
                })?;
        }

        let peer_der = conn
            .peer_certificates()
            .and_then(<[CertificateDer<'static>]>::first)
            .map(|cert| cert.as_ref().to_vec())
            .ok_or_else(|| PalioxisError::TlsHandshake {
                details: "no client certificate presented".to_string(),
            })?;
        let peer = PeerIdentity::from_der(&peer_der)?;

        Ok(ServerStream {
            stream: StreamOwned::new(conn, sock),
            peer,
            peer_addr,
        })
    }
}

// ──────────────────── client side ────────────────────

/// A dialed, handshaken connection to one agent.
#[derive(Debug)]
pub struct ClientStream {
    stream: StreamOwned<ClientConnection, TcpStream>,
}

impl Read for ClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for ClientStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// mTLS dialer, one config shared across the fleet.
pub struct TlsClient {
    config: Arc<ClientConfig>,
    connect_timeout: Duration,
}

impl TlsClient {
    pub fn new(certs: &CertificatePaths, connect_timeout: Duration) -> Result<Self> {
        let roots = load_root_store(&certs.ca_cert)?;
        let chain = load_certs(&certs.client_cert)?;
        let key = load_private_key(&certs.client_key)?;
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(chain, key)
            .map_err(|err| PalioxisError::TlsSetup {
                details: format!("client certificate: {err}"),
            })?;
        Ok(Self {
            config: Arc::new(config),
            connect_timeout,
        })
    }

    /// Dial and handshake with one node.
    pub fn connect(&self, host: &str, port: u16) -> Result<ClientStream> {
        let unreachable = |details: String| PalioxisError::NodeUnreachable {
            host: host.to_string(),
            port,
            details,
        };

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|err| unreachable(err.to_string()))?
            .next()
            .ok_or_else(|| unreachable("address did not resolve".to_string()))?;
        let mut sock = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|err| unreachable(err.to_string()))?;
        let _ = sock.set_read_timeout(Some(IO_TIMEOUT));
        let _ = sock.set_write_timeout(Some(IO_TIMEOUT));

        let name = ServerName::try_from(SERVER_NAME.to_string()).map_err(|err| {
            PalioxisError::TlsSetup {
                details: format!("server name: {err}"),
            }
        })?;
        let mut conn = ClientConnection::new(Arc::clone(&self.config), name).map_err(|err| {
            PalioxisError::TlsHandshake {
                details: format!("connection init: {err}"),
            }
        })?;
        while conn.is_handshaking() {
            conn.complete_io(&mut sock)
                .map_err(|err| PalioxisError::TlsHandshake {
                    details: err.to_string(),
                })?;
        }

        Ok(ClientStream {
            stream: StreamOwned::new(conn, sock),
        })
    }
}

// ──────────────────── PEM loading ────────────────────

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|err| PalioxisError::TlsSetup {
        details: format!("cannot open {}: {err}", path.display()),
    })?;
    let mut reader = BufReader::new(file);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<io::Result<_>>()
        .map_err(|err| PalioxisError::TlsSetup {
            details: format!("PEM parse {}: {err}", path.display()),
        })?;
    if certs.is_empty() {
        return Err(PalioxisError::TlsSetup {
            details: format!("no certificates in {}", path.display()),
        });
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|err| PalioxisError::TlsSetup {
        details: format!("cannot open {}: {err}", path.display()),
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|err| PalioxisError::TlsSetup {
            details: format!("PEM parse {}: {err}", path.display()),
        })?
        .ok_or_else(|| PalioxisError::TlsSetup {
            details: format!("no private key in {}", path.display()),
        })
}

fn load_root_store(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert).map_err(|err| PalioxisError::TlsSetup {
            details: format!("CA load {}: {err}", path.display()),
        })?;
    }
    Ok(roots)
}

fn bind_listener(host: &str, port: u16) -> Result<TcpListener> {
    let setup = |details: String| PalioxisError::TlsSetup { details };

    let addr: SocketAddr = (host, port)
        .to_socket_addrs()
        .map_err(|err| setup(format!("resolve {host}:{port}: {err}")))?
        .next()
        .ok_or_else(|| setup(format!("{host}:{port} did not resolve")))?;

    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(|err| setup(format!("socket: {err}")))?;
    socket
        .set_reuse_address(true)
        .map_err(|err| setup(format!("SO_REUSEADDR: {err}")))?;
    socket
        .bind(&addr.into())
        .map_err(|err| setup(format!("bind {host}:{port}: {err}")))?;
    socket
        .listen(BACKLOG)
        .map_err(|err| setup(format!("listen: {err}")))?;
    Ok(socket.into())
}
