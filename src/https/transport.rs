//! TLS connection handling: one connection attempt end-to-end.
//!
//! A connection attempt is handshake, request write, one response read, and
//! teardown. The TCP socket runs in non-blocking mode, so the TLS layer
//! surfaces `WANT_READ`/`WANT_WRITE` as retryable signals; every retry loop
//! here carries an iteration ceiling so a stalled peer cannot spin forever.

use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use log::{debug, error, info};
use openssl::ssl::{
    ConnectConfiguration, ErrorCode, HandshakeError, MidHandshakeSslStream, SslConnector,
    SslMethod, SslSession, SslStream,
};
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::X509VerifyResult;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RESPONSE_BUF_SIZE: usize = 512;
const MAX_IO_RETRIES: u32 = 1000;
const RETRY_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Which trust material a connection attempt presents.
///
/// The resumption variant carries no trust anchors at all: only an
/// abbreviated handshake against the cached session can succeed, so a peer
/// that expired the session fails the attempt instead of silently upgrading
/// to a full handshake. Exactly one variant applies per attempt, never both.
pub enum TrustConfig<'a, S> {
    /// Resume from a previously negotiated session.
    CachedSession(&'a S),
    /// Full certificate validation against the trust-anchor bundle.
    TrustBundle,
}

/// The single response chunk read after a successful write.
#[derive(Debug, PartialEq, Eq)]
pub enum ResponseEcho {
    /// One bounded chunk of response data, surfaced for logging only; no
    /// multi-chunk reassembly or HTTP parsing happens here.
    Payload(Vec<u8>),
    /// The peer closed before sending anything. The written request still
    /// counts as delivered.
    PeerClosed,
}

/// Retry loop that hit its iteration ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    Handshake,
    Write,
    Read,
}

impl fmt::Display for RetryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handshake => write!(f, "handshake"),
            Self::Write => write!(f, "write"),
            Self::Read => write!(f, "read"),
        }
    }
}

/// Hard failures of a connection attempt. Peer close is not an error; it is
/// a normal `ResponseEcho` outcome.
#[derive(Debug)]
pub enum TransportError {
    /// Socket connect or TLS context setup failed before a handshake began.
    Allocation(String),
    /// The handshake did not complete; carries the TLS-level reason and the
    /// certificate verification result for logging.
    Handshake {
        reason: String,
        verify: X509VerifyResult,
    },
    /// A write call failed hard; `code` is the TLS error code.
    Write { code: ErrorCode },
    /// A read call failed hard; `code` is the TLS error code.
    Read { code: ErrorCode },
    /// A retryable-signal loop exhausted its ceiling without progress.
    RetryLimit { phase: RetryPhase },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation(detail) => write!(f, "connection setup failed: {}", detail),
            Self::Handshake { reason, verify } => {
                if *verify == X509VerifyResult::OK {
                    write!(f, "handshake failed: {}", reason)
                } else {
                    write!(
                        f,
                        "handshake failed: {} (certificate verification: {})",
                        reason,
                        verify.error_string()
                    )
                }
            }
            Self::Write { code } => write!(f, "write failed, TLS error code {}", code.as_raw()),
            Self::Read { code } => write!(f, "read failed, TLS error code {}", code.as_raw()),
            Self::RetryLimit { phase } => {
                write!(f, "{} made no progress after {} retries", phase, MAX_IO_RETRIES)
            }
        }
    }
}

impl std::error::Error for TransportError {}

impl TransportError {
    /// True when the connection was never established (setup or handshake
    /// failure), as opposed to an exchange failure on a live connection.
    pub fn refused_connection(&self) -> bool {
        matches!(
            self,
            Self::Allocation(_) | Self::Handshake { .. } | Self::RetryLimit {
                phase: RetryPhase::Handshake
            }
        )
    }
}

/// Outcome of one connection attempt.
///
/// Establishment and exchange are reported separately: a caller deciding
/// whether to fall back to different trust material cares only about the
/// handshake, not about what happened on the wire afterwards.
pub enum Attempt<S> {
    /// The handshake never completed.
    Refused(TransportError),
    /// The handshake completed; the exchange itself may still have failed.
    Established {
        /// Resumption state from a full handshake, for the caller to cache.
        /// `None` when the attempt itself resumed a session.
        fresh_session: Option<S>,
        exchange: Result<ResponseEcho, TransportError>,
    },
}

/// Seam between the reporting engine and the TLS machinery, so the tier
/// logic is testable with a scripted double.
pub trait Transport {
    type Session;

    fn connect_and_exchange(
        &self,
        trust: TrustConfig<'_, Self::Session>,
        request: &[u8],
    ) -> Attempt<Self::Session>;
}

/// Production transport: OpenSSL over a non-blocking TCP socket.
pub struct TlsTransport {
    host: String,
    port: u16,
    ca_file: Option<PathBuf>,
}

impl TlsTransport {
    pub fn new(host: String, port: u16, ca_file: Option<PathBuf>) -> Self {
        TlsTransport {
            host,
            port,
            ca_file,
        }
    }

    fn setup_error(detail: impl fmt::Display) -> TransportError {
        TransportError::Allocation(detail.to_string())
    }

    fn configure(
        &self,
        trust: &TrustConfig<'_, SslSession>,
    ) -> Result<ConnectConfiguration, TransportError> {
        let mut builder =
            SslConnector::builder(SslMethod::tls()).map_err(Self::setup_error)?;

        match trust {
            TrustConfig::CachedSession(_) => {
                // Empty certificate store: the resumption tier trusts the
                // cached session and nothing else.
                let store = X509StoreBuilder::new().map_err(Self::setup_error)?.build();
                builder.set_cert_store(store);
            }
            TrustConfig::TrustBundle => {
                if let Some(path) = &self.ca_file {
                    builder.set_ca_file(path).map_err(Self::setup_error)?;
                }
            }
        }

        let mut conf = builder.build().configure().map_err(Self::setup_error)?;

        if let TrustConfig::CachedSession(session) = trust {
            // SAFETY: the session was negotiated by a connector built with
            // the same `SslMethod::tls()` in an earlier attempt.
            unsafe { conf.set_session(session) }.map_err(Self::setup_error)?;
        }

        Ok(conf)
    }

    fn open_socket(&self) -> Result<TcpStream, TransportError> {
        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| Self::setup_error(format!("address resolution failed: {}", e)))?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream
                        .set_nonblocking(true)
                        .map_err(|e| Self::setup_error(format!("set_nonblocking failed: {}", e)))?;
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(match last_error {
            Some(e) => Self::setup_error(format!("TCP connect failed: {}", e)),
            None => Self::setup_error(format!("no addresses resolved for {}", self.host)),
        })
    }

    fn handshake_error(mid: MidHandshakeSslStream<TcpStream>) -> TransportError {
        let verify = mid.ssl().verify_result();
        error!(
            "TLS handshake error: {}, verification: {}",
            mid.error(),
            verify.error_string()
        );
        TransportError::Handshake {
            reason: mid.error().to_string(),
            verify,
        }
    }

    /// Drive the non-blocking handshake to a terminal outcome, bounded by
    /// the retry ceiling.
    fn handshake(
        &self,
        conf: ConnectConfiguration,
        stream: TcpStream,
    ) -> Result<SslStream<TcpStream>, TransportError> {
        let mut pending = match conf.connect(&self.host, stream) {
            Ok(tls) => return Ok(tls),
            Err(HandshakeError::WouldBlock(mid)) => mid,
            Err(HandshakeError::SetupFailure(stack)) => return Err(Self::setup_error(stack)),
            Err(HandshakeError::Failure(mid)) => return Err(Self::handshake_error(mid)),
        };

        for _ in 0..MAX_IO_RETRIES {
            thread::sleep(RETRY_POLL_INTERVAL);
            pending = match pending.handshake() {
                Ok(tls) => return Ok(tls),
                Err(HandshakeError::WouldBlock(mid)) => mid,
                Err(HandshakeError::SetupFailure(stack)) => return Err(Self::setup_error(stack)),
                Err(HandshakeError::Failure(mid)) => return Err(Self::handshake_error(mid)),
            };
        }

        Err(TransportError::RetryLimit {
            phase: RetryPhase::Handshake,
        })
    }

    /// Write the whole request, accumulating short writes and reissuing the
    /// unwritten remainder on retryable signals.
    fn write_request(
        &self,
        tls: &mut SslStream<TcpStream>,
        request: &[u8],
    ) -> Result<(), TransportError> {
        let mut written = 0;
        let mut retries = 0u32;
        while written < request.len() {
            match tls.ssl_write(&request[written..]) {
                Ok(n) => {
                    debug!("{} bytes written", n);
                    written += n;
                }
                Err(e) if retryable(e.code()) => {
                    retries += 1;
                    if retries > MAX_IO_RETRIES {
                        return Err(TransportError::RetryLimit {
                            phase: RetryPhase::Write,
                        });
                    }
                    thread::sleep(RETRY_POLL_INTERVAL);
                }
                Err(e) => {
                    error!("TLS write error: {}", e);
                    return Err(TransportError::Write { code: e.code() });
                }
            }
        }
        Ok(())
    }

    /// Read exactly one response chunk. Echo semantics: no reassembly, no
    /// HTTP parsing; a clean peer close before any data is a normal outcome.
    fn read_response(
        &self,
        tls: &mut SslStream<TcpStream>,
    ) -> Result<ResponseEcho, TransportError> {
        let mut buf = [0u8; RESPONSE_BUF_SIZE];
        let mut retries = 0u32;
        loop {
            match tls.ssl_read(&mut buf) {
                Ok(0) => return Ok(ResponseEcho::PeerClosed),
                Ok(n) => {
                    debug!("{} bytes read", n);
                    return Ok(ResponseEcho::Payload(buf[..n].to_vec()));
                }
                Err(e) if e.code() == ErrorCode::ZERO_RETURN => {
                    info!("connection closed by peer");
                    return Ok(ResponseEcho::PeerClosed);
                }
                Err(e) if retryable(e.code()) => {
                    retries += 1;
                    if retries > MAX_IO_RETRIES {
                        return Err(TransportError::RetryLimit {
                            phase: RetryPhase::Read,
                        });
                    }
                    thread::sleep(RETRY_POLL_INTERVAL);
                }
                Err(e) => {
                    error!("TLS read error: {}", e);
                    return Err(TransportError::Read { code: e.code() });
                }
            }
        }
    }
}

impl Transport for TlsTransport {
    type Session = SslSession;

    fn connect_and_exchange(
        &self,
        trust: TrustConfig<'_, SslSession>,
        request: &[u8],
    ) -> Attempt<SslSession> {
        let resuming = matches!(trust, TrustConfig::CachedSession(_));

        let conf = match self.configure(&trust) {
            Ok(conf) => conf,
            Err(e) => return Attempt::Refused(e),
        };
        let stream = match self.open_socket() {
            Ok(stream) => stream,
            Err(e) => return Attempt::Refused(e),
        };

        // The SslStream owns the socket from here on; dropping it tears the
        // connection down on every exit path below.
        let mut tls = match self.handshake(conf, stream) {
            Ok(tls) => tls,
            Err(e) => return Attempt::Refused(e),
        };

        if tls.ssl().session_reused() {
            info!("connection established (session resumed)");
        } else {
            info!("connection established (full handshake)");
        }

        // Resumption state is only harvested from a full handshake; a
        // session that arrived via the trust config is never re-extracted.
        let fresh_session = if !resuming && !tls.ssl().session_reused() {
            tls.ssl().session().map(|s| s.to_owned())
        } else {
            None
        };

        let exchange = self
            .write_request(&mut tls, request)
            .and_then(|()| self.read_response(&mut tls));

        // Best-effort close_notify; teardown happens regardless when the
        // stream drops.
        let _ = tls.shutdown();

        Attempt::Established {
            fresh_session,
            exchange,
        }
    }
}

fn retryable(code: ErrorCode) -> bool {
    code == ErrorCode::WANT_READ || code == ErrorCode::WANT_WRITE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn want_read_and_want_write_are_retryable() {
        assert!(retryable(ErrorCode::WANT_READ));
        assert!(retryable(ErrorCode::WANT_WRITE));
        assert!(!retryable(ErrorCode::SSL));
        assert!(!retryable(ErrorCode::ZERO_RETURN));
    }

    #[test]
    fn setup_and_handshake_failures_count_as_refused() {
        assert!(TransportError::Allocation("out of sockets".into()).refused_connection());
        assert!(TransportError::Handshake {
            reason: "certificate verify failed".into(),
            verify: X509VerifyResult::OK,
        }
        .refused_connection());
        assert!(TransportError::RetryLimit {
            phase: RetryPhase::Handshake
        }
        .refused_connection());
    }

    #[test]
    fn exchange_failures_do_not_count_as_refused() {
        assert!(!TransportError::Write {
            code: ErrorCode::SSL
        }
        .refused_connection());
        assert!(!TransportError::Read {
            code: ErrorCode::SYSCALL
        }
        .refused_connection());
        assert!(!TransportError::RetryLimit {
            phase: RetryPhase::Write
        }
        .refused_connection());
    }

    // A peer speaking something other than TLS fails the handshake; the
    // attempt must come back as refused with the socket already torn down,
    // which the peer observes as EOF rather than a dangling connection.
    #[test]
    fn failed_handshake_still_tears_down_the_connection() {
        use std::io::{Read, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
        let port = listener.local_addr().expect("listener address").port();

        let peer = thread::spawn(move || {
            let (mut socket, _) = listener.accept().expect("accept connection");
            socket
                .set_read_timeout(Some(Duration::from_secs(10)))
                .expect("set read timeout");
            socket
                .write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n")
                .expect("write non-TLS bytes");
            // Drain until the client drops its end of the connection.
            let mut buf = [0u8; 256];
            loop {
                match socket.read(&mut buf) {
                    Ok(0) => return true,
                    Ok(_) => continue,
                    Err(_) => return false,
                }
            }
        });

        let transport = TlsTransport::new("127.0.0.1".to_string(), port, None);
        let attempt = transport.connect_and_exchange(TrustConfig::TrustBundle, b"ping");
        assert!(matches!(attempt, Attempt::Refused(_)));

        let saw_eof = peer.join().expect("peer thread panicked");
        assert!(saw_eof, "peer saw an error instead of EOF");
    }

    #[test]
    fn error_display_names_the_failing_phase() {
        let e = TransportError::RetryLimit {
            phase: RetryPhase::Read,
        };
        assert!(e.to_string().contains("read"));
        let e = TransportError::Allocation("no route".into());
        assert!(e.to_string().contains("no route"));
    }
}
