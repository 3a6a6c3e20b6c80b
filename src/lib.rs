//! BGP-4 peer session layer.
//!
//! Implements the per-peer finite state machine (RFC 4271 Section 8)
//! and the wire codec for OPEN, UPDATE, NOTIFICATION, and KEEPALIVE
//! messages. Routing-table installation, best-path selection, and
//! policy are external collaborators (see [`rib::RibSink`]).

pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod rib;
pub mod session;
pub mod timer;
pub mod transport;

pub use codec::{BgpMessage, IpPrefix, KeepaliveMessage, NotificationMessage, OpenMessage, UpdateMessage};
pub use config::{PeerConfig, SessionMode, SessionOptions};
pub use error::{BgpError, Result};
pub use event::{Event, EventQueue};
pub use rib::{NullRibSink, RecordingRibSink, RibSink};
pub use session::{PeerSession, PeerState, SessionSnapshot};

/// BGP protocol version this crate speaks.
pub const BGP_VERSION: u8 = 4;

/// Default BGP port.
pub const BGP_PORT: u16 = 179;
