//! Media engine adapter.
//!
//! The negotiation state machine and the relays only talk to the real-time
//! media engine through the traits in this module. The engine's callbacks
//! (local candidates, connectivity changes, new tracks) are delivered as
//! [`EngineEvent`]s on a channel and may arrive at any time relative to the
//! signaling loop.

pub mod webrtc_rs;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::signaling::{IceCandidate, SessionDescription};

pub use self::webrtc_rs::WebRtcEngine;

/// Media kind of a track or route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connectivity states the forwarder cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Connected,
    Disconnected,
    Failed,
}

/// Events emitted by the engine from its own execution context.
pub enum EngineEvent {
    /// A local ICE candidate was gathered.
    LocalCandidate(IceCandidate),
    /// ICE connectivity changed.
    ConnectivityChanged(ConnectivityState),
    /// A remote track started.
    TrackReceived(Arc<dyn InboundTrack>),
}

impl fmt::Debug for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            EngineEvent::ConnectivityChanged(s) => {
                f.debug_tuple("ConnectivityChanged").field(s).finish()
            }
            EngineEvent::TrackReceived(t) => f
                .debug_struct("TrackReceived")
                .field("kind", &t.kind())
                .field("ssrc", &t.ssrc())
                .finish(),
        }
    }
}

/// Session-level operations of the media engine.
///
/// Implementations must be safe to call from several tasks at once.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    /// Parses and applies the remote description. Parse failures are
    /// reported as [`EngineError::InvalidDescription`].
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    async fn add_remote_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;

    /// Requests a keyframe from the sender of `media_ssrc`.
    async fn send_picture_loss_indication(&self, media_ssrc: u32) -> Result<(), EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

/// One inbound media track.
#[async_trait]
pub trait InboundTrack: Send + Sync {
    fn kind(&self) -> MediaKind;

    fn ssrc(&self) -> u32;

    /// Reads one RTP packet into `buf`, returning its length. Blocks until a
    /// packet arrives; returns [`EngineError::TrackClosed`] once the track ends.
    async fn read(&self, buf: &mut [u8]) -> Result<usize, EngineError>;
}
