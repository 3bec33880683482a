//! Per-track media relay.
//!
//! Each relay runs two tasks: a forwarding loop that reads RTP from the
//! track, rewrites the payload type and sends it to the route's UDP
//! destination, and a keepalive loop that periodically asks the publisher
//! for a keyframe. Both end when the track ends; nothing a relay does can
//! stop another relay or the signaling loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::engine::{InboundTrack, MediaEngine, MediaKind};
use crate::error::{EngineError, RelayError};

use super::route::MediaRoute;
use super::rtp::rewrite_payload_type;
use super::socket::WriteFailure;

/// Read buffer size; one MTU-sized RTP packet.
pub const MAX_PACKET_SIZE: usize = 1500;

/// Per-relay statistics (atomic, lock-free)
#[derive(Debug, Default)]
pub struct RelayStats {
    pub packets_forwarded: AtomicU64,
    pub bytes_forwarded: AtomicU64,
    /// Packets dropped because the receiver was not listening
    pub packets_refused: AtomicU64,
    pub keepalives_sent: AtomicU64,
    pub keepalive_failures: AtomicU64,
}

/// Relay for one inbound track.
pub struct MediaRelay {
    route: MediaRoute,
    track: Arc<dyn InboundTrack>,
    engine: Arc<dyn MediaEngine>,
    keepalive_interval: Duration,
    stats: Arc<RelayStats>,
}

impl MediaRelay {
    pub fn new(
        route: MediaRoute,
        track: Arc<dyn InboundTrack>,
        engine: Arc<dyn MediaEngine>,
        keepalive_interval: Duration,
    ) -> Self {
        Self {
            route,
            track,
            engine,
            keepalive_interval,
            stats: Arc::new(RelayStats::default()),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.route.kind
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        self.stats.clone()
    }

    /// Run the relay on its own task.
    pub fn spawn(self) -> JoinHandle<Result<(), RelayError>> {
        tokio::spawn(self.run())
    }

    /// Forward until the track closes or a fatal error occurs. The
    /// keepalive task is stopped when this returns.
    pub async fn run(self) -> Result<(), RelayError> {
        let kind = self.route.kind;
        let ssrc = self.track.ssrc();
        info!(
            "Starting {} relay: ssrc={} -> {} (payload type {})",
            kind,
            ssrc,
            self.route.destination(),
            self.route.payload_type
        );

        let keepalive = KeepaliveGuard(tokio::spawn(keepalive_loop(
            self.engine.clone(),
            kind,
            ssrc,
            self.keepalive_interval,
            self.stats.clone(),
        )));

        let result = self.forward().await;
        drop(keepalive);

        info!(
            "{} relay stopped: {} packets ({} bytes) forwarded, {} refused, {} keepalives",
            kind,
            self.stats.packets_forwarded.load(Ordering::Relaxed),
            self.stats.bytes_forwarded.load(Ordering::Relaxed),
            self.stats.packets_refused.load(Ordering::Relaxed),
            self.stats.keepalives_sent.load(Ordering::Relaxed),
        );
        result
    }

    async fn forward(&self) -> Result<(), RelayError> {
        let kind = self.route.kind;
        let mut buf = vec![0u8; MAX_PACKET_SIZE];

        loop {
            let n = match self.track.read(&mut buf).await {
                Ok(n) => n,
                Err(EngineError::TrackClosed) => {
                    info!("{} track closed", kind);
                    return Ok(());
                }
                Err(e) => {
                    warn!("{} track read failed: {}", kind, e);
                    return Err(e.into());
                }
            };

            let n = match rewrite_payload_type(&mut buf[..n], self.route.payload_type) {
                Ok(n) => n,
                Err(e) => {
                    error!("{} relay: {}", kind, e);
                    return Err(e);
                }
            };

            match self.route.socket().send(&buf[..n]).await {
                Ok(sent) => {
                    self.stats.packets_forwarded.fetch_add(1, Ordering::Relaxed);
                    self.stats.bytes_forwarded.fetch_add(sent as u64, Ordering::Relaxed);
                }
                Err(e) => match WriteFailure::classify(&e) {
                    WriteFailure::Refused => {
                        let refused = self.stats.packets_refused.fetch_add(1, Ordering::Relaxed);
                        if refused == 0 {
                            warn!(
                                "{} destination {} refused packets, is the receiver running?",
                                kind,
                                self.route.destination()
                            );
                        } else {
                            debug!("{} destination refused packet", kind);
                        }
                    }
                    WriteFailure::Fatal => {
                        error!("{} relay UDP write failed: {}", kind, e);
                        return Err(RelayError::Write(e));
                    }
                },
            }
        }
    }
}

struct KeepaliveGuard(JoinHandle<()>);

impl Drop for KeepaliveGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Sends a picture loss indication every `period`, first one after `period`.
async fn keepalive_loop(
    engine: Arc<dyn MediaEngine>,
    kind: MediaKind,
    ssrc: u32,
    period: Duration,
    stats: Arc<RelayStats>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match engine.send_picture_loss_indication(ssrc).await {
            Ok(()) => {
                stats.keepalives_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.keepalive_failures.fetch_add(1, Ordering::Relaxed);
                warn!("{} keepalive for ssrc {} failed: {}", kind, ssrc, e);
            }
        }
    }
}
