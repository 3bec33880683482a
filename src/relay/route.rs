//! Downstream routes, one per media kind.

use std::collections::HashMap;
use std::net::SocketAddr;

use log::info;
use parking_lot::Mutex;

use crate::config::RouteConfig;
use crate::engine::MediaKind;
use crate::error::{ConfigError, RelayError};

use super::socket::RelaySocket;

/// Where packets of one media kind go, and the payload type they get.
#[derive(Debug)]
pub struct MediaRoute {
    pub kind: MediaKind,
    pub payload_type: u8,
    socket: RelaySocket,
}

impl MediaRoute {
    pub fn open(config: &RouteConfig) -> Result<Self, RelayError> {
        let socket = RelaySocket::connect(config.destination).map_err(|source| RelayError::Socket {
            destination: config.destination,
            source,
        })?;
        Ok(Self {
            kind: config.kind,
            payload_type: config.payload_type,
            socket,
        })
    }

    pub fn destination(&self) -> SocketAddr {
        self.socket.destination()
    }

    pub fn socket(&self) -> &RelaySocket {
        &self.socket
    }
}

enum Slot {
    Unbound(MediaRoute),
    Bound,
}

/// Routes created at startup and handed out to tracks at most once.
pub struct RouteTable {
    slots: Mutex<HashMap<MediaKind, Slot>>,
}

impl RouteTable {
    /// Open a socket for every configured route.
    pub fn open(configs: &[RouteConfig]) -> Result<Self, RelayError> {
        let mut slots = HashMap::new();
        for config in configs {
            if slots.contains_key(&config.kind) {
                return Err(ConfigError::DuplicateRoute(config.kind).into());
            }
            let route = MediaRoute::open(config)?;
            info!(
                "Route {} -> {} (payload type {})",
                route.kind,
                route.destination(),
                route.payload_type
            );
            slots.insert(config.kind, Slot::Unbound(route));
        }
        Ok(Self {
            slots: Mutex::new(slots),
        })
    }

    /// Take the route for `kind`. A kind can only be bound once.
    pub fn bind(&self, kind: MediaKind) -> Result<MediaRoute, RelayError> {
        let mut slots = self.slots.lock();
        match slots.get_mut(&kind) {
            None => Err(RelayError::Unregistered(kind)),
            Some(slot) => match std::mem::replace(slot, Slot::Bound) {
                Slot::Unbound(route) => Ok(route),
                Slot::Bound => Err(RelayError::AlreadyBound(kind)),
            },
        }
    }

    #[cfg(test)]
    pub(crate) fn is_bound(&self, kind: MediaKind) -> bool {
        matches!(self.slots.lock().get(&kind), Some(Slot::Bound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(kind: MediaKind, port: u16) -> RouteConfig {
        RouteConfig {
            kind,
            destination: SocketAddr::from(([127, 0, 0, 1], port)),
            payload_type: 96,
        }
    }

    #[tokio::test]
    async fn test_bind_once_per_kind() {
        let table = RouteTable::open(&[route(MediaKind::Video, 4002)]).unwrap();

        let bound = table.bind(MediaKind::Video).unwrap();
        assert_eq!(bound.kind, MediaKind::Video);
        assert_eq!(bound.destination().port(), 4002);
        assert!(table.is_bound(MediaKind::Video));

        assert!(matches!(
            table.bind(MediaKind::Video),
            Err(RelayError::AlreadyBound(MediaKind::Video))
        ));
        assert!(matches!(
            table.bind(MediaKind::Audio),
            Err(RelayError::Unregistered(MediaKind::Audio))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_route_rejected() {
        let result = RouteTable::open(&[route(MediaKind::Audio, 4000), route(MediaKind::Audio, 4001)]);
        assert!(matches!(
            result,
            Err(RelayError::Config(ConfigError::DuplicateRoute(MediaKind::Audio)))
        ));
    }
}
