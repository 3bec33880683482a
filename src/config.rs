//! Forwarder configuration.
//!
//! Built once at startup and shared read-only.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use url::Url;

use crate::engine::MediaKind;
use crate::error::ConfigError;

/// Interval between picture loss indications.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2);

/// Default downstream ports and payload types (matching a stock
/// `rtp-forwarder.sdp` receiver).
pub const DEFAULT_AUDIO_PORT: u16 = 4000;
pub const DEFAULT_VIDEO_PORT: u16 = 4002;
pub const DEFAULT_AUDIO_PAYLOAD_TYPE: u8 = 111;
pub const DEFAULT_VIDEO_PAYLOAD_TYPE: u8 = 96;

/// A codec registered with the media engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecSpec {
    pub kind: MediaKind,
    pub mime_type: &'static str,
    pub clock_rate: u32,
    pub channels: u16,
    pub sdp_fmtp_line: &'static str,
    pub payload_type: u8,
}

/// The two codecs offered to the remote engine. Not negotiable at runtime.
pub const CODECS: [CodecSpec; 2] = [
    CodecSpec {
        kind: MediaKind::Video,
        mime_type: "video/H264",
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f",
        payload_type: 102,
    },
    CodecSpec {
        kind: MediaKind::Audio,
        mime_type: "audio/opus",
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1",
        payload_type: 111,
    },
];

/// ICE server configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServerConfig {
    /// Create a STUN-only server config
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }
}

/// Downstream UDP destination for one media kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteConfig {
    pub kind: MediaKind,
    pub destination: SocketAddr,
    /// Payload type stamped on every forwarded packet.
    pub payload_type: u8,
}

/// Complete forwarder configuration.
#[derive(Clone, Debug)]
pub struct ForwarderConfig {
    pub signaling_url: Url,
    pub routes: Vec<RouteConfig>,
    pub keepalive_interval: Duration,
    pub ice_servers: Vec<IceServerConfig>,
}

impl ForwarderConfig {
    /// Builds the signaling URL `ws://{host}:{port}{path}`.
    pub fn signaling_url(host: &str, port: u16, path: &str) -> Result<Url, ConfigError> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        let raw = format!("ws://{}:{}{}", host, port, path);
        Url::parse(&raw).map_err(|e| ConfigError::InvalidSignalingUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })
    }

    /// Audio and video routes to `dest_addr` on the given ports.
    pub fn default_routes(
        dest_addr: &str,
        audio: (u16, u8),
        video: (u16, u8),
    ) -> Result<Vec<RouteConfig>, ConfigError> {
        let ip: IpAddr = dest_addr
            .parse()
            .map_err(|_| ConfigError::InvalidDestination(dest_addr.to_string()))?;
        Ok(vec![
            RouteConfig {
                kind: MediaKind::Audio,
                destination: SocketAddr::new(ip, audio.0),
                payload_type: audio.1,
            },
            RouteConfig {
                kind: MediaKind::Video,
                destination: SocketAddr::new(ip, video.0),
                payload_type: video.1,
            },
        ])
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keepalive_interval.is_zero() {
            return Err(ConfigError::ZeroKeepalive);
        }
        let mut seen = Vec::with_capacity(self.routes.len());
        for route in &self.routes {
            if route.payload_type > 127 {
                return Err(ConfigError::InvalidPayloadType(route.payload_type));
            }
            if route.destination.port() == 0 {
                return Err(ConfigError::InvalidDestination(route.destination.to_string()));
            }
            if seen.contains(&route.kind) {
                return Err(ConfigError::DuplicateRoute(route.kind));
            }
            seen.push(route.kind);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ForwarderConfig {
        ForwarderConfig {
            signaling_url: ForwarderConfig::signaling_url("localhost", 80, "/").unwrap(),
            routes: ForwarderConfig::default_routes(
                "127.0.0.1",
                (DEFAULT_AUDIO_PORT, DEFAULT_AUDIO_PAYLOAD_TYPE),
                (DEFAULT_VIDEO_PORT, DEFAULT_VIDEO_PAYLOAD_TYPE),
            )
            .unwrap(),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            ice_servers: vec![],
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = config();
        config.validate().unwrap();
        // Default ws port is normalised away.
        assert_eq!(config.signaling_url.as_str(), "ws://localhost/");
        assert_eq!(config.routes[0].destination.port(), 4000);
        assert_eq!(config.routes[1].payload_type, 96);
    }

    #[test]
    fn test_signaling_url_path() {
        let url = ForwarderConfig::signaling_url("10.0.0.5", 8888, "streamer").unwrap();
        assert_eq!(url.as_str(), "ws://10.0.0.5:8888/streamer");
        assert!(ForwarderConfig::signaling_url("bad host", 80, "/").is_err());
    }

    #[test]
    fn test_rejects_invalid_routes() {
        let mut cfg = config();
        cfg.routes[0].payload_type = 200;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidPayloadType(200))));

        let mut cfg = config();
        cfg.routes[1].kind = MediaKind::Audio;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::DuplicateRoute(MediaKind::Audio))
        ));

        let mut cfg = config();
        cfg.keepalive_interval = Duration::ZERO;
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroKeepalive)));

        assert!(ForwarderConfig::default_routes("not-an-ip", (1, 1), (2, 2)).is_err());
    }
}
