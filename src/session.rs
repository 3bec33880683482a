//! Wires the media engine, the negotiator and the relays together.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::engine::{EngineEvent, MediaEngine, MediaKind};
use crate::error::{EngineError, NegotiationError};
use crate::peer::Negotiator;
use crate::relay::{RelayManager, RouteTable};
use crate::signaling::OutboundMessage;

/// One forwarding session: a single offer/answer exchange and the relays
/// started for the tracks it produces.
pub struct ForwarderSession {
    engine: Arc<dyn MediaEngine>,
    negotiator: Arc<Negotiator>,
    relays: Arc<RelayManager>,
    events: JoinHandle<()>,
}

impl ForwarderSession {
    /// `events` is the engine's event stream; it is consumed by a task owned
    /// by the session.
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        events: mpsc::UnboundedReceiver<EngineEvent>,
        routes: RouteTable,
        keepalive_interval: Duration,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Self {
        let negotiator = Arc::new(Negotiator::new(engine.clone(), outbound));
        let relays = Arc::new(RelayManager::new(routes, engine.clone(), keepalive_interval));
        let events = tokio::spawn(dispatch_events(events, negotiator.clone(), relays.clone()));
        Self {
            engine,
            negotiator,
            relays,
            events,
        }
    }

    pub fn negotiator(&self) -> &Arc<Negotiator> {
        &self.negotiator
    }

    /// Send the offer.
    pub async fn start(&self) -> Result<(), NegotiationError> {
        self.negotiator.start_negotiation().await
    }

    /// Stop the relays, log their counters and close the engine.
    pub async fn shutdown(self) -> Result<(), EngineError> {
        self.events.abort();
        let running = self.relays.active_kinds();
        if !running.is_empty() {
            info!("Shutting down with {} relay(s) still running", running.len());
        }
        for kind in [MediaKind::Audio, MediaKind::Video] {
            if let Some(stats) = self.relays.stats(kind) {
                info!(
                    "{} relay: {} packets ({} bytes) forwarded, {} refused, {} keepalives ({} failed)",
                    kind,
                    stats.packets_forwarded.load(Ordering::Relaxed),
                    stats.bytes_forwarded.load(Ordering::Relaxed),
                    stats.packets_refused.load(Ordering::Relaxed),
                    stats.keepalives_sent.load(Ordering::Relaxed),
                    stats.keepalive_failures.load(Ordering::Relaxed),
                );
            }
        }
        self.relays.shutdown();
        self.engine.close().await
    }
}

async fn dispatch_events(
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
    negotiator: Arc<Negotiator>,
    relays: Arc<RelayManager>,
) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::LocalCandidate(candidate) => negotiator.on_local_candidate_discovered(candidate),
            EngineEvent::ConnectivityChanged(state) => negotiator.on_connectivity_state_changed(state),
            EngineEvent::TrackReceived(track) => {
                // Already logged by the manager.
                let _ = relays.on_track_received(track);
            }
        }
    }
    debug!("Engine event stream ended");
}
