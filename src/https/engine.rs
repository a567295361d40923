//! One "report" operation: two-tier trust fallback around the transport.
//!
//! Resumed handshakes are cheap but the peer may have expired the session,
//! so a rejected resumption falls back to full certificate validation. The
//! fallback costs one extra round trip only on cache miss or expiry.

use log::{error, info, warn};

use crate::https::request::build_report;
use crate::https::session::SessionStore;
use crate::https::transport::{Attempt, ResponseEcho, Transport, TransportError, TrustConfig};

pub struct ReportingEngine<T: Transport> {
    transport: T,
    store: SessionStore<T::Session>,
    host: String,
}

impl<T: Transport> ReportingEngine<T> {
    pub fn new(transport: T, host: String) -> Self {
        ReportingEngine {
            transport,
            store: SessionStore::new(),
            host,
        }
    }

    /// Deliver one reading. Returns true when at least one attempt
    /// established a connection.
    ///
    /// Tier 1 resumes the cached session if one exists; tier 2 performs full
    /// validation against the trust bundle and caches the resulting session.
    /// Establishment alone counts as success: a tier-1 connection whose
    /// write or read phase fails is not retried on tier 2 within the same
    /// report. Attempts are strictly sequential, at most two per report.
    pub fn report(&mut self, reading: f32) -> bool {
        let request = build_report(&self.host, reading);
        info!(
            "reporting temperature {:.2} to https://{}",
            reading, self.host
        );

        let mut success = false;

        if let Some(session) = self.store.get() {
            info!("using cached TLS session");
            let attempt = self
                .transport
                .connect_and_exchange(TrustConfig::CachedSession(session), &request);
            match attempt {
                Attempt::Established { exchange, .. } => {
                    success = true;
                    log_exchange(exchange);
                }
                Attempt::Refused(e) => {
                    if matches!(e, TransportError::Handshake { .. }) {
                        // The peer no longer honors the session; discard it
                        // so the full handshake below caches a fresh one.
                        warn!("cached session rejected ({}), discarding it", e);
                        self.store.clear();
                    } else {
                        // Setup failure or a stalled handshake: the peer
                        // never judged the session, so it stays cached for
                        // the next cycle.
                        warn!("resumption attempt never reached the peer: {}", e);
                    }
                }
            }
        }

        if !success {
            info!("using trust-anchor bundle");
            match self
                .transport
                .connect_and_exchange(TrustConfig::TrustBundle, &request)
            {
                Attempt::Established {
                    fresh_session,
                    exchange,
                } => {
                    success = true;
                    if let Some(session) = fresh_session {
                        self.store.put(session);
                    }
                    log_exchange(exchange);
                }
                Attempt::Refused(e) => error!("report failed: {}", e),
            }
        }

        success
    }
}

fn log_exchange(exchange: Result<ResponseEcho, TransportError>) {
    match exchange {
        Ok(ResponseEcho::Payload(bytes)) => {
            info!("collector response: {}", String::from_utf8_lossy(&bytes));
        }
        Ok(ResponseEcho::PeerClosed) => info!("collector closed without a response"),
        Err(e) => warn!("exchange failed on an established connection: {}", e),
    }
}
