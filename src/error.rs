//! Error types for the forwarder.

use thiserror::Error;

use crate::engine::MediaKind;

/// Errors raised while building the forwarder configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid signaling URL '{url}': {reason}")]
    InvalidSignalingUrl { url: String, reason: String },

    #[error("Invalid destination address '{0}'")]
    InvalidDestination(String),

    #[error("Payload type {0} is outside the RTP range 0-127")]
    InvalidPayloadType(u8),

    #[error("Route for {0} configured more than once")]
    DuplicateRoute(MediaKind),

    #[error("Keepalive interval must be greater than zero")]
    ZeroKeepalive,
}

/// Errors on the signaling channel.
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Failed to connect to signaling server: {0}")]
    Connect(String),

    #[error("Signaling transport error: {0}")]
    Transport(String),

    #[error("Malformed signaling message: {0}")]
    Decode(String),

    #[error("Failed to encode signaling message: {0}")]
    Encode(String),
}

/// Errors reported by the media engine adapter.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to build media engine: {0}")]
    Setup(String),

    #[error("Failed to create offer: {0}")]
    CreateOffer(String),

    #[error("Failed to set local description: {0}")]
    LocalDescription(String),

    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    #[error("Failed to set remote description: {0}")]
    RemoteDescription(String),

    #[error("Failed to add ICE candidate: {0}")]
    IceCandidate(String),

    #[error("Failed to send RTCP: {0}")]
    Rtcp(String),

    #[error("Track closed")]
    TrackClosed,

    #[error("Track read failed: {0}")]
    TrackRead(String),
}

/// Errors from the negotiation state machine.
#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("Operation not allowed in state {0:?}")]
    InvalidState(crate::peer::NegotiationState),

    #[error("Offer already created for this session")]
    OfferAlreadyCreated,

    #[error("Invalid candidate descriptor: {0}")]
    InvalidCandidate(String),

    #[error("Outbound signaling channel closed")]
    OutboundClosed,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Errors that stop a media relay or prevent a route from binding.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to open UDP socket for {destination}: {source}")]
    Socket {
        destination: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("No route registered for {0}")]
    Unregistered(MediaKind),

    #[error("Route for {0} is already bound to a track")]
    AlreadyBound(MediaKind),

    #[error("Malformed RTP packet: {0}")]
    Packet(String),

    #[error("UDP write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
