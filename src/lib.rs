//! rtp-forwarder: receive a WebRTC session from a pixel streaming engine and
//! forward its RTP to local UDP ports.
//!
//! The forwarder connects to the engine's signaling websocket, originates an
//! offer with one recvonly audio and one recvonly video transceiver, trickles
//! ICE candidates once the answer is applied and relays every received RTP
//! packet, with its payload type rewritten, to a fixed UDP destination per
//! media kind. A periodic picture loss indication keeps the video encoder
//! producing keyframes.
//!
//! ## Modules
//!
//! - [`signaling`]: JSON envelope codec and websocket control loop
//! - [`peer`]: offer/answer negotiation and candidate queueing
//! - [`engine`]: media engine contract and its webrtc-rs implementation
//! - [`relay`]: RTP rewrite, UDP routes and per-track relays
//! - [`session`]: glue between the engine events, negotiator and relays

pub mod config;
pub mod engine;
pub mod error;
pub mod peer;
pub mod relay;
pub mod session;
pub mod signaling;

pub use config::ForwarderConfig;
pub use engine::{MediaEngine, MediaKind, WebRtcEngine};
pub use error::{ConfigError, EngineError, NegotiationError, RelayError, SignalingError};
pub use peer::{NegotiationState, Negotiator};
pub use relay::{RelayManager, RouteTable};
pub use session::ForwarderSession;
pub use signaling::SignalingChannel;
