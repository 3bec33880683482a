//! Media relay: RTP from inbound tracks to fixed UDP destinations.

pub mod forwarder;
pub mod manager;
pub mod route;
pub mod rtp;
pub mod socket;

pub use forwarder::{MediaRelay, RelayStats, MAX_PACKET_SIZE};
pub use manager::RelayManager;
pub use route::{MediaRoute, RouteTable};
pub use rtp::{rewrite_payload_type, RtpHeader};
pub use socket::{RelaySocket, WriteFailure};
