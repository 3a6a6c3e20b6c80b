//! Peer session configuration types.
//!
//! Loading these from a file or CLI is an external concern; this crate
//! only defines the shape a loader hands it.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Whether this session initiates the TCP connection or only accepts
/// inbound connections from the peer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Active,
    Passive,
}

/// Immutable per-peer configuration (§3 of the session's data model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Local router identifier.
    pub local_id: Ipv4Addr,

    /// Local AS number.
    pub local_asn: u16,

    /// Local hold-time preference, in seconds.
    pub local_hold_time: u16,

    /// Peer IPv4 address.
    pub peer_ip: Ipv4Addr,

    /// Expected peer AS number.
    pub peer_asn: u16,

    /// Peer TCP port, conventionally 179.
    #[serde(default = "default_bgp_port")]
    pub peer_port: u16,

    /// Whether this session dials out or waits to be dialed.
    pub mode: SessionMode,

    /// Base interval for ConnectRetryTimer, in seconds.
    #[serde(default = "default_connect_retry_time")]
    pub connect_retry_time: u16,
}

fn default_bgp_port() -> u16 {
    crate::BGP_PORT
}

fn default_connect_retry_time() -> u16 {
    5
}

impl PeerConfig {
    pub fn new(local_id: Ipv4Addr, local_asn: u16, peer_ip: Ipv4Addr, peer_asn: u16, mode: SessionMode) -> Self {
        Self {
            local_id,
            local_asn,
            local_hold_time: 90,
            peer_ip,
            peer_asn,
            peer_port: crate::BGP_PORT,
            mode,
            connect_retry_time: default_connect_retry_time(),
        }
    }
}

/// The session option flags from RFC 4271 Section 8's optional
/// attributes list. Most are inert placeholders this crate's FSM
/// consults at the decision points the RFC specifies, even where the
/// richer behavior they imply (damping, collision detection) is out
/// of scope — flipping them off is always safe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionOptions {
    pub accept_connections_unconfigured_peers: bool,
    pub allow_automatic_start: bool,
    pub allow_automatic_stop: bool,
    pub collision_detect_established_state: bool,
    pub damp_peer_oscillations: bool,
    pub delay_open: bool,
    pub passive_tcp_establishment: bool,
    pub send_notification_without_open: bool,
    pub track_tcp_state: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            accept_connections_unconfigured_peers: false,
            allow_automatic_start: false,
            allow_automatic_stop: false,
            collision_detect_established_state: false,
            damp_peer_oscillations: false,
            delay_open: false,
            passive_tcp_establishment: false,
            send_notification_without_open: false,
            track_tcp_state: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_config_defaults_port_and_retry() {
        let cfg = PeerConfig::new(
            "1.1.1.1".parse().unwrap(),
            65001,
            "2.2.2.2".parse().unwrap(),
            65002,
            SessionMode::Active,
        );
        assert_eq!(cfg.peer_port, 179);
        assert_eq!(cfg.connect_retry_time, 5);
    }

    #[test]
    fn session_options_default_all_off() {
        let opts = SessionOptions::default();
        assert!(!opts.delay_open);
        assert!(!opts.damp_peer_oscillations);
        assert!(!opts.collision_detect_established_state);
    }
}
