//! Starts a relay for each inbound track that has a route.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::task::{AbortHandle, JoinHandle};

use crate::engine::{InboundTrack, MediaEngine, MediaKind};
use crate::error::RelayError;

use super::forwarder::{MediaRelay, RelayStats};
use super::route::RouteTable;

struct RunningRelay {
    kind: MediaKind,
    stats: Arc<RelayStats>,
    relay: AbortHandle,
    handle: JoinHandle<Result<(), RelayError>>,
}

/// Binds inbound tracks to routes and tracks the relays it started.
pub struct RelayManager {
    routes: RouteTable,
    engine: Arc<dyn MediaEngine>,
    keepalive_interval: Duration,
    relays: Mutex<Vec<RunningRelay>>,
}

impl RelayManager {
    pub fn new(routes: RouteTable, engine: Arc<dyn MediaEngine>, keepalive_interval: Duration) -> Self {
        Self {
            routes,
            engine,
            keepalive_interval,
            relays: Mutex::new(Vec::new()),
        }
    }

    /// Track-received handler. Tracks without a free route are logged and
    /// left alone.
    pub fn on_track_received(&self, track: Arc<dyn InboundTrack>) -> Result<(), RelayError> {
        let kind = track.kind();
        let route = match self.routes.bind(kind) {
            Ok(route) => route,
            Err(e) => {
                warn!("Not relaying {} track ssrc={}: {}", kind, track.ssrc(), e);
                return Err(e);
            }
        };

        let relay = MediaRelay::new(route, track, self.engine.clone(), self.keepalive_interval);
        let stats = relay.stats();
        let inner = relay.spawn();
        let abort = inner.abort_handle();
        let handle = tokio::spawn(async move {
            let result = match inner.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => return Ok(()),
                Err(e) => {
                    error!("{} relay task panicked: {}", kind, e);
                    return Ok(());
                }
            };
            if let Err(ref e) = result {
                debug!("{} relay terminated: {}", kind, e);
            }
            result
        });

        self.relays.lock().push(RunningRelay {
            kind,
            stats,
            relay: abort,
            handle,
        });
        Ok(())
    }

    /// Kinds with a relay still running.
    pub(crate) fn active_kinds(&self) -> Vec<MediaKind> {
        self.relays
            .lock()
            .iter()
            .filter(|r| !r.handle.is_finished())
            .map(|r| r.kind)
            .collect()
    }

    pub fn stats(&self, kind: MediaKind) -> Option<Arc<RelayStats>> {
        self.relays
            .lock()
            .iter()
            .find(|r| r.kind == kind)
            .map(|r| r.stats.clone())
    }

    /// Stop every relay.
    pub fn shutdown(&self) {
        let relays = std::mem::take(&mut *self.relays.lock());
        for relay in relays {
            if !relay.handle.is_finished() {
                info!("Stopping {} relay", relay.kind);
            }
            relay.relay.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::peer::negotiation::tests::MockEngine;
    use crate::relay::forwarder::tests::MockTrack;
    use std::net::SocketAddr;

    fn manager(kinds: &[MediaKind]) -> RelayManager {
        let configs: Vec<_> = kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| RouteConfig {
                kind: *kind,
                destination: SocketAddr::from(([127, 0, 0, 1], 40000 + i as u16)),
                payload_type: 96,
            })
            .collect();
        RelayManager::new(
            RouteTable::open(&configs).unwrap(),
            Arc::new(MockEngine::default()),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_second_track_of_same_kind_rejected() {
        let manager = manager(&[MediaKind::Audio, MediaKind::Video]);
        let (first, _feed1) = MockTrack::new(MediaKind::Video, 1);
        let (second, _feed2) = MockTrack::new(MediaKind::Video, 2);

        manager.on_track_received(first).unwrap();
        assert!(matches!(
            manager.on_track_received(second),
            Err(RelayError::AlreadyBound(MediaKind::Video))
        ));
        assert_eq!(manager.active_kinds(), vec![MediaKind::Video]);
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_track_without_route_ignored() {
        let manager = manager(&[MediaKind::Video]);
        let (track, _feed) = MockTrack::new(MediaKind::Audio, 1);
        assert!(matches!(
            manager.on_track_received(track),
            Err(RelayError::Unregistered(MediaKind::Audio))
        ));
        assert!(manager.active_kinds().is_empty());
        assert!(manager.stats(MediaKind::Audio).is_none());
    }
}
