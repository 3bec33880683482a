//! Offer/answer negotiation for one session.
//!
//! This side always originates the offer. Local ICE candidates gathered
//! before the remote answer is applied are queued and flushed, in discovery
//! order, right after the answer is accepted. The queue and the state live
//! behind one mutex so the engine's candidate callback and the answer flush
//! never interleave.

use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::engine::{ConnectivityState, MediaEngine};
use crate::error::NegotiationError;
use crate::signaling::{IceCandidate, InboundMessage, OutboundMessage, SessionDescription};

/// Negotiation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    New,
    OfferSent,
    RemoteSet,
    Connected,
    Disconnected,
    Failed,
}

impl NegotiationState {
    /// Disconnected and Failed end the session; nothing reconnects.
    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Disconnected | NegotiationState::Failed)
    }
}

/// Mutable session data guarded by the negotiator's lock.
#[derive(Debug)]
pub struct Session {
    state: NegotiationState,
    pending_local_candidates: Vec<IceCandidate>,
    remote_description_set: bool,
    offer_created: bool,
    answer_in_flight: bool,
}

impl Session {
    fn new() -> Self {
        Self {
            state: NegotiationState::New,
            pending_local_candidates: Vec::new(),
            remote_description_set: false,
            offer_created: false,
            answer_in_flight: false,
        }
    }
}

/// Drives the negotiation against a [`MediaEngine`].
pub struct Negotiator {
    engine: Arc<dyn MediaEngine>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    session: Mutex<Session>,
}

impl Negotiator {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Self {
        Self {
            engine,
            outbound,
            session: Mutex::new(Session::new()),
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.session.lock().state
    }

    pub fn pending_candidates(&self) -> usize {
        self.session.lock().pending_local_candidates.len()
    }

    /// Creates the local offer, applies it and sends it to the remote peer.
    ///
    /// Only one offer is ever created; a failure leaves the state at `New`
    /// and is not retried.
    pub async fn start_negotiation(&self) -> Result<(), NegotiationError> {
        {
            let mut session = self.session.lock();
            if session.state != NegotiationState::New {
                return Err(NegotiationError::InvalidState(session.state));
            }
            if session.offer_created {
                return Err(NegotiationError::OfferAlreadyCreated);
            }
            session.offer_created = true;
        }

        let offer = self.engine.create_offer().await?;
        self.engine.set_local_description(offer.clone()).await?;

        let message = OutboundMessage::Offer { sdp: offer.sdp };
        self.outbound
            .send(message)
            .map_err(|_| NegotiationError::OutboundClosed)?;

        self.session.lock().state = NegotiationState::OfferSent;
        info!("Sent offer");
        Ok(())
    }

    /// Engine callback for a gathered local candidate.
    pub fn on_local_candidate_discovered(&self, candidate: IceCandidate) {
        let mut session = self.session.lock();
        if !session.remote_description_set {
            debug!(
                "Queueing local candidate until remote description is set: {}",
                candidate.candidate
            );
            session.pending_local_candidates.push(candidate);
            return;
        }
        self.send_candidate(candidate);
    }

    /// Applies the remote answer and flushes queued local candidates.
    ///
    /// Rejected unless the state is `OfferSent`. Parse or apply failures
    /// abort this answer only.
    pub async fn on_remote_answer(&self, sdp: String) -> Result<(), NegotiationError> {
        {
            let mut session = self.session.lock();
            if session.state != NegotiationState::OfferSent || session.answer_in_flight {
                return Err(NegotiationError::InvalidState(session.state));
            }
            session.answer_in_flight = true;
        }

        let result = self.apply_answer(sdp).await;

        let mut session = self.session.lock();
        session.answer_in_flight = false;
        result?;

        // A connectivity change may have landed while the answer was applied.
        if session.state == NegotiationState::OfferSent {
            session.state = NegotiationState::RemoteSet;
        }
        session.remote_description_set = true;
        let pending = std::mem::take(&mut session.pending_local_candidates);
        info!(
            "Remote description set, flushing {} queued local candidate(s)",
            pending.len()
        );
        for candidate in pending {
            self.send_candidate(candidate);
        }
        Ok(())
    }

    async fn apply_answer(&self, sdp: String) -> Result<(), NegotiationError> {
        self.engine
            .set_remote_description(SessionDescription::answer(sdp))
            .await?;
        Ok(())
    }

    /// Adds a remote candidate regardless of the negotiation state.
    pub async fn on_remote_ice_candidate(&self, candidate: Value) -> Result<(), NegotiationError> {
        let candidate = IceCandidate::from_value(candidate)
            .map_err(|e| NegotiationError::InvalidCandidate(e.to_string()))?;
        debug!("Adding remote candidate: {}", candidate.candidate);
        self.engine.add_remote_ice_candidate(candidate).await?;
        Ok(())
    }

    /// Engine callback for connectivity changes. Observational only.
    pub fn on_connectivity_state_changed(&self, new_state: ConnectivityState) {
        let mut session = self.session.lock();
        let next = match new_state {
            ConnectivityState::Connected => NegotiationState::Connected,
            ConnectivityState::Disconnected => NegotiationState::Disconnected,
            ConnectivityState::Failed => NegotiationState::Failed,
        };
        if session.state.is_terminal() {
            debug!(
                "Ignoring connectivity change to {:?} after terminal state {:?}",
                new_state, session.state
            );
            return;
        }
        session.state = next;
        match next {
            NegotiationState::Connected => info!("Connected, media is flowing"),
            _ => warn!("Connectivity {:?}, done forwarding", new_state),
        }
    }

    /// Handles one decoded inbound signaling message.
    ///
    /// Errors are logged here; none of them stop the caller's loop.
    pub async fn dispatch(&self, message: InboundMessage) {
        match message {
            InboundMessage::Answer { sdp } => {
                if let Err(e) = self.on_remote_answer(sdp).await {
                    error!("Dropping answer: {}", e);
                }
            }
            InboundMessage::IceCandidate { candidate } => {
                if let Err(e) = self.on_remote_ice_candidate(candidate).await {
                    warn!("Dropping remote candidate: {}", e);
                }
            }
            InboundMessage::PlayerCount { count } => {
                info!("Player count: {}", count);
            }
            InboundMessage::Config { payload } => {
                debug!("Received config: {}", payload);
            }
            InboundMessage::Offer { .. } => {
                warn!("Ignoring inbound offer, this side originates the offer");
            }
            InboundMessage::Unknown { message_type } => {
                warn!("Ignoring unknown signaling message type '{}'", message_type);
            }
        }
    }

    // Called with the session lock held.
    fn send_candidate(&self, candidate: IceCandidate) {
        debug!("Sending local candidate: {}", candidate.candidate);
        if self
            .outbound
            .send(OutboundMessage::IceCandidate { candidate })
            .is_err()
        {
            warn!("Outbound signaling channel closed, local candidate not sent");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::MediaEngine;
    use crate::error::EngineError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    pub(crate) struct MockEngine {
        pub fail_offer: AtomicBool,
        pub fail_remote: AtomicBool,
        pub offers: AtomicUsize,
        pub remote_descriptions: Mutex<Vec<SessionDescription>>,
        pub remote_candidates: Mutex<Vec<IceCandidate>>,
        pub plis: Mutex<Vec<u32>>,
        pub fail_pli: AtomicBool,
        pub remote_delay: Mutex<Option<Duration>>,
    }

    #[async_trait]
    impl MediaEngine for MockEngine {
        async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
            if self.fail_offer.load(Ordering::SeqCst) {
                return Err(EngineError::CreateOffer("mock".to_string()));
            }
            self.offers.fetch_add(1, Ordering::SeqCst);
            Ok(SessionDescription::offer("v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n"))
        }

        async fn set_local_description(&self, _desc: SessionDescription) -> Result<(), EngineError> {
            Ok(())
        }

        async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
            let delay = *self.remote_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if !desc.sdp.starts_with("v=") {
                return Err(EngineError::InvalidDescription("missing version line".to_string()));
            }
            if self.fail_remote.load(Ordering::SeqCst) {
                return Err(EngineError::RemoteDescription("mock".to_string()));
            }
            self.remote_descriptions.lock().push(desc);
            Ok(())
        }

        async fn add_remote_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
            self.remote_candidates.lock().push(candidate);
            Ok(())
        }

        async fn send_picture_loss_indication(&self, media_ssrc: u32) -> Result<(), EngineError> {
            if self.fail_pli.load(Ordering::SeqCst) {
                return Err(EngineError::Rtcp("mock".to_string()));
            }
            self.plis.lock().push(media_ssrc);
            Ok(())
        }

        async fn close(&self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    pub(crate) fn candidate(n: usize) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{} 1 udp 2130706431 10.0.0.1 {} typ host", n, 50000 + n),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    const ANSWER: &str = "v=0\r\no=- 2 2 IN IP4 127.0.0.1\r\n";

    fn negotiator() -> (
        Arc<MockEngine>,
        Negotiator,
        mpsc::UnboundedReceiver<OutboundMessage>,
    ) {
        let engine = Arc::new(MockEngine::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let negotiator = Negotiator::new(engine.clone(), tx);
        (engine, negotiator, rx)
    }

    fn sent_candidates(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> Vec<IceCandidate> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let OutboundMessage::IceCandidate { candidate } = msg {
                out.push(candidate);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_start_sends_offer_once() {
        let (engine, negotiator, mut rx) = negotiator();
        negotiator.start_negotiation().await.unwrap();
        assert_eq!(negotiator.state(), NegotiationState::OfferSent);
        assert!(matches!(rx.try_recv(), Ok(OutboundMessage::Offer { .. })));

        assert!(negotiator.start_negotiation().await.is_err());
        assert_eq!(engine.offers.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_offer_failure_does_not_advance() {
        let (engine, negotiator, mut rx) = negotiator();
        engine.fail_offer.store(true, Ordering::SeqCst);
        assert!(negotiator.start_negotiation().await.is_err());
        assert_eq!(negotiator.state(), NegotiationState::New);
        assert!(rx.try_recv().is_err());
        // No retry: the session never creates a second offer.
        engine.fail_offer.store(false, Ordering::SeqCst);
        assert!(negotiator.start_negotiation().await.is_err());
    }

    #[tokio::test]
    async fn test_candidates_queued_until_answer() {
        let (_engine, negotiator, mut rx) = negotiator();
        negotiator.start_negotiation().await.unwrap();
        let _offer = rx.try_recv().unwrap();

        for n in 0..3 {
            negotiator.on_local_candidate_discovered(candidate(n));
        }
        assert_eq!(negotiator.pending_candidates(), 3);
        assert!(sent_candidates(&mut rx).is_empty());

        negotiator.on_remote_answer(ANSWER.to_string()).await.unwrap();
        assert_eq!(negotiator.state(), NegotiationState::RemoteSet);
        assert_eq!(negotiator.pending_candidates(), 0);
        assert_eq!(
            sent_candidates(&mut rx),
            vec![candidate(0), candidate(1), candidate(2)]
        );

        negotiator.on_local_candidate_discovered(candidate(3));
        assert_eq!(sent_candidates(&mut rx), vec![candidate(3)]);
    }

    #[tokio::test]
    async fn test_second_answer_rejected() {
        let (engine, negotiator, mut rx) = negotiator();
        negotiator.start_negotiation().await.unwrap();
        negotiator.on_local_candidate_discovered(candidate(0));
        negotiator.on_remote_answer(ANSWER.to_string()).await.unwrap();

        let second = negotiator.on_remote_answer(ANSWER.to_string()).await;
        assert!(matches!(
            second,
            Err(NegotiationError::InvalidState(NegotiationState::RemoteSet))
        ));
        assert_eq!(engine.remote_descriptions.lock().len(), 1);
        assert_eq!(sent_candidates(&mut rx), vec![candidate(0)]);
    }

    #[tokio::test]
    async fn test_answer_before_offer_rejected() {
        let (engine, negotiator, _rx) = negotiator();
        assert!(negotiator.on_remote_answer(ANSWER.to_string()).await.is_err());
        assert!(engine.remote_descriptions.lock().is_empty());
        assert_eq!(negotiator.state(), NegotiationState::New);
    }

    #[tokio::test]
    async fn test_bad_answer_keeps_queue() {
        let (engine, negotiator, mut rx) = negotiator();
        negotiator.start_negotiation().await.unwrap();
        negotiator.on_local_candidate_discovered(candidate(0));

        assert!(matches!(
            negotiator.on_remote_answer("garbage".to_string()).await,
            Err(NegotiationError::Engine(EngineError::InvalidDescription(_)))
        ));
        assert_eq!(negotiator.state(), NegotiationState::OfferSent);

        engine.fail_remote.store(true, Ordering::SeqCst);
        assert!(negotiator.on_remote_answer(ANSWER.to_string()).await.is_err());
        assert_eq!(negotiator.state(), NegotiationState::OfferSent);
        assert_eq!(negotiator.pending_candidates(), 1);
        assert!(sent_candidates(&mut rx).is_empty());

        engine.fail_remote.store(false, Ordering::SeqCst);
        negotiator.on_remote_answer(ANSWER.to_string()).await.unwrap();
        assert_eq!(sent_candidates(&mut rx), vec![candidate(0)]);
    }

    #[tokio::test]
    async fn test_remote_candidates_accepted_in_any_state() {
        let (engine, negotiator, _rx) = negotiator();
        let value = serde_json::to_value(candidate(7)).unwrap();
        negotiator.on_remote_ice_candidate(value).await.unwrap();
        assert_eq!(engine.remote_candidates.lock().as_slice(), &[candidate(7)]);

        let bad = serde_json::json!({ "sdpMid": "0" });
        assert!(matches!(
            negotiator.on_remote_ice_candidate(bad).await,
            Err(NegotiationError::InvalidCandidate(_))
        ));
        assert_eq!(engine.remote_candidates.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_connectivity_states() {
        let (_engine, negotiator, _rx) = negotiator();
        negotiator.start_negotiation().await.unwrap();
        negotiator.on_remote_answer(ANSWER.to_string()).await.unwrap();

        negotiator.on_connectivity_state_changed(ConnectivityState::Connected);
        assert_eq!(negotiator.state(), NegotiationState::Connected);
        negotiator.on_connectivity_state_changed(ConnectivityState::Failed);
        assert_eq!(negotiator.state(), NegotiationState::Failed);
        negotiator.on_connectivity_state_changed(ConnectivityState::Connected);
        assert_eq!(negotiator.state(), NegotiationState::Failed);
    }

    #[tokio::test]
    async fn test_failure_during_answer_stays_terminal() {
        let (engine, negotiator, mut rx) = negotiator();
        *engine.remote_delay.lock() = Some(Duration::from_millis(50));
        let negotiator = Arc::new(negotiator);
        negotiator.start_negotiation().await.unwrap();
        negotiator.on_local_candidate_discovered(candidate(0));

        let answer = {
            let negotiator = negotiator.clone();
            tokio::spawn(async move { negotiator.on_remote_answer(ANSWER.to_string()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        negotiator.on_connectivity_state_changed(ConnectivityState::Failed);
        assert_eq!(negotiator.state(), NegotiationState::Failed);

        answer.await.unwrap().unwrap();
        assert_eq!(negotiator.state(), NegotiationState::Failed);
        assert_eq!(negotiator.pending_candidates(), 0);
        assert!(matches!(rx.try_recv(), Ok(OutboundMessage::Offer { .. })));
        assert_eq!(sent_candidates(&mut rx), vec![candidate(0)]);
    }

    #[tokio::test]
    async fn test_player_count_is_informational() {
        let (_engine, negotiator, mut rx) = negotiator();
        negotiator.start_negotiation().await.unwrap();
        let _offer = rx.try_recv().unwrap();

        negotiator
            .dispatch(InboundMessage::decode(r#"{"type":"playerCount","count":3}"#).unwrap())
            .await;
        assert_eq!(negotiator.state(), NegotiationState::OfferSent);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_discovery_and_flush_exactly_once() {
        const CANDIDATES: usize = 200;

        for _round in 0..20 {
            let (engine, negotiator, mut rx) = negotiator();
            *engine.remote_delay.lock() = Some(Duration::from_micros(200));
            let negotiator = Arc::new(negotiator);
            negotiator.start_negotiation().await.unwrap();

            let discover = {
                let negotiator = negotiator.clone();
                tokio::spawn(async move {
                    for n in 0..CANDIDATES {
                        negotiator.on_local_candidate_discovered(candidate(n));
                        if n % 16 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            };
            let answer = {
                let negotiator = negotiator.clone();
                tokio::spawn(async move { negotiator.on_remote_answer(ANSWER.to_string()).await })
            };

            discover.await.unwrap();
            answer.await.unwrap().unwrap();

            let sent = sent_candidates(&mut rx);
            let expected: Vec<_> = (0..CANDIDATES).map(candidate).collect();
            assert_eq!(sent, expected);
            assert_eq!(negotiator.pending_candidates(), 0);
        }
    }
}
