//! webrtc-rs implementation of the media engine.
//!
//! Wraps an RTCPeerConnection with one recvonly audio and one recvonly video
//! transceiver. The peer connection callbacks are forwarded as
//! [`EngineEvent`]s on an unbounded channel.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as CodecRegistry;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::Marshal;

use crate::config::{IceServerConfig, CODECS};
use crate::error::EngineError;
use crate::signaling::{IceCandidate, SdpType, SessionDescription};

use super::{ConnectivityState, EngineEvent, InboundTrack, MediaEngine, MediaKind};

fn codec_type(kind: MediaKind) -> RTPCodecType {
    match kind {
        MediaKind::Audio => RTPCodecType::Audio,
        MediaKind::Video => RTPCodecType::Video,
    }
}

fn media_kind(codec_type: RTPCodecType) -> Option<MediaKind> {
    match codec_type {
        RTPCodecType::Audio => Some(MediaKind::Audio),
        RTPCodecType::Video => Some(MediaKind::Video),
        _ => None,
    }
}

/// Maps ICE connection states onto the ones the negotiator tracks.
fn connectivity(state: RTCIceConnectionState) -> Option<ConnectivityState> {
    match state {
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
            Some(ConnectivityState::Connected)
        }
        RTCIceConnectionState::Disconnected | RTCIceConnectionState::Closed => {
            Some(ConnectivityState::Disconnected)
        }
        RTCIceConnectionState::Failed => Some(ConnectivityState::Failed),
        _ => None,
    }
}

fn to_rtc_ice_server(config: &IceServerConfig) -> RTCIceServer {
    RTCIceServer {
        urls: config.urls.clone(),
        username: config.username.clone().unwrap_or_default(),
        credential: config.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let parsed = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    parsed.map_err(|e| EngineError::InvalidDescription(e.to_string()))
}

fn from_rtc_candidate(candidate: &RTCIceCandidate) -> Result<IceCandidate, EngineError> {
    let init = candidate
        .to_json()
        .map_err(|e| EngineError::IceCandidate(e.to_string()))?;
    Ok(IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    })
}

/// Media engine backed by a webrtc-rs peer connection.
pub struct WebRtcEngine {
    peer_connection: Arc<RTCPeerConnection>,
}

impl WebRtcEngine {
    /// Build the peer connection and hook its callbacks up to the returned
    /// event channel.
    pub async fn new(
        ice_servers: &[IceServerConfig],
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<EngineEvent>), EngineError> {
        let mut media_engine = CodecRegistry::default();
        for codec in CODECS.iter() {
            media_engine
                .register_codec(
                    RTCRtpCodecParameters {
                        capability: RTCRtpCodecCapability {
                            mime_type: codec.mime_type.to_owned(),
                            clock_rate: codec.clock_rate,
                            channels: codec.channels,
                            sdp_fmtp_line: codec.sdp_fmtp_line.to_owned(),
                            rtcp_feedback: vec![],
                        },
                        payload_type: codec.payload_type,
                        ..Default::default()
                    },
                    codec_type(codec.kind),
                )
                .map_err(|e| EngineError::Setup(format!("Failed to register {}: {}", codec.mime_type, e)))?;
        }

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| EngineError::Setup(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers.iter().map(to_rtc_ice_server).collect(),
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| EngineError::Setup(format!("Failed to create peer connection: {}", e)))?,
        );

        // Receive one audio and one video track
        for kind in [MediaKind::Audio, MediaKind::Video] {
            peer_connection
                .add_transceiver_from_kind(
                    codec_type(kind),
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(|e| EngineError::Setup(format!("Failed to add {} transceiver: {}", kind, e)))?;
        }

        let (tx, rx) = mpsc::unbounded_channel::<EngineEvent>();

        let tx_for_ice = tx.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx_for_ice.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("ICE gathering complete");
                    return;
                };
                match from_rtc_candidate(&candidate) {
                    Ok(c) => {
                        let _ = tx.send(EngineEvent::LocalCandidate(c));
                    }
                    Err(e) => warn!("Dropping local candidate: {}", e),
                }
            })
        }));

        let tx_for_state = tx.clone();
        peer_connection.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            info!("ICE connection state has changed: {}", state);
            if let Some(state) = connectivity(state) {
                let _ = tx_for_state.send(EngineEvent::ConnectivityChanged(state));
            }
            Box::pin(async {})
        }));

        let tx_for_track = tx;
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                match media_kind(track.kind()) {
                    Some(kind) => {
                        info!(
                            "Track received: kind={} ssrc={} codec={}",
                            kind,
                            track.ssrc(),
                            track.codec().capability.mime_type
                        );
                        let inbound: Arc<dyn InboundTrack> = Arc::new(WebRtcTrack { track, kind });
                        let _ = tx_for_track.send(EngineEvent::TrackReceived(inbound));
                    }
                    None => warn!("Ignoring track of unspecified kind, ssrc={}", track.ssrc()),
                }
                Box::pin(async {})
            },
        ));

        Ok((Arc::new(Self { peer_connection }), rx))
    }
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| EngineError::CreateOffer(e.to_string()))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let desc = to_rtc_description(desc)?;
        self.peer_connection
            .set_local_description(desc)
            .await
            .map_err(|e| EngineError::LocalDescription(e.to_string()))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let desc = to_rtc_description(desc)?;
        self.peer_connection
            .set_remote_description(desc)
            .await
            .map_err(|e| EngineError::RemoteDescription(e.to_string()))
    }

    async fn add_remote_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        let candidate_init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection
            .add_ice_candidate(candidate_init)
            .await
            .map_err(|e| EngineError::IceCandidate(e.to_string()))
    }

    async fn send_picture_loss_indication(&self, media_ssrc: u32) -> Result<(), EngineError> {
        let pli: [Box<dyn webrtc::rtcp::packet::Packet + Send + Sync>; 1] =
            [Box::new(PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc,
            })];
        self.peer_connection
            .write_rtcp(&pli)
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Rtcp(e.to_string()))
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| EngineError::Setup(format!("Failed to close peer connection: {}", e)))
    }
}

/// Remote track delivered by webrtc-rs.
struct WebRtcTrack {
    track: Arc<TrackRemote>,
    kind: MediaKind,
}

#[async_trait]
impl InboundTrack for WebRtcTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn ssrc(&self) -> u32 {
        self.track.ssrc()
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, EngineError> {
        let (packet, _attributes) = self.track.read_rtp().await.map_err(|e| {
            let err_str = e.to_string().to_lowercase();
            if err_str.contains("eof") || err_str.contains("closed") {
                EngineError::TrackClosed
            } else {
                EngineError::TrackRead(e.to_string())
            }
        })?;
        packet
            .marshal_to(buf)
            .map_err(|e| EngineError::TrackRead(format!("Failed to marshal RTP packet: {}", e)))
    }
}
