//! TCP transport adapter (§4.2).
//!
//! Owns the single TCP connection for one peer session. The read and
//! write halves are split on connect so the input-reader task (which
//! blocks on socket reads for the whole session) never contends with
//! the FSM driver sending KEEPALIVE/NOTIFICATION on its own schedule.

use crate::codec::{self, BgpMessage, DecodeOutcome, OpenValidationContext};
use crate::error::{BgpError, NotificationPayload, Result};
use crate::event::{Event, EventSink};
use bytes::BytesMut;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

/// Whether this adapter dials out or waits for the peer to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    Active,
    Passive,
}

/// Owns the live TCP connection's write half for one peer session.
/// The read half, once split off by [`TransportAdapter::open`], is
/// handed to the caller to drive independently via
/// [`run_input_loop`].
pub struct TransportAdapter {
    peer_addr: SocketAddr,
    write_half: Option<OwnedWriteHalf>,
}

impl TransportAdapter {
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            peer_addr,
            write_half: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.write_half.is_some()
    }

    /// Initiate or accept the TCP connection depending on `mode`.
    /// Active mode dials `peer_addr`; passive mode listens on the
    /// local BGP port and accepts only from `peer_addr`'s IP. Returns
    /// the read half so the caller can spawn [`run_input_loop`]
    /// independently of this adapter's send path.
    pub async fn open(&mut self, mode: ConnectMode) -> Result<OwnedReadHalf> {
        let stream = match mode {
            ConnectMode::Active => TcpStream::connect(self.peer_addr)
                .await
                .map_err(|e| BgpError::ConnectionError(e.to_string()))?,
            ConnectMode::Passive => {
                let listener = TcpListener::bind(("0.0.0.0", crate::BGP_PORT))
                    .await
                    .map_err(|e| BgpError::ConnectionError(e.to_string()))?;
                loop {
                    let (stream, from) = listener
                        .accept()
                        .await
                        .map_err(|e| BgpError::ConnectionError(e.to_string()))?;
                    if from.ip() == self.peer_addr.ip() {
                        break stream;
                    }
                    debug!(from = %from, "rejecting connection from unconfigured peer");
                }
            }
        };

        let (read_half, write_half) = stream.into_split();
        self.write_half = Some(write_half);
        Ok(read_half)
    }

    /// Idempotent; safe to call in any state including when nothing
    /// is connected. Shutting down the write half causes the paired
    /// read half's next read to observe EOF, ending the input loop.
    pub async fn close(&mut self) {
        if let Some(mut write_half) = self.write_half.take() {
            let _ = write_half.shutdown().await;
        }
    }

    pub async fn send(&mut self, message: &BgpMessage) -> Result<()> {
        let write_half = self.write_half.as_mut().ok_or_else(|| BgpError::ConnectionError("not connected".into()))?;
        let bytes = message.encode();
        write_half.write_all(&bytes).await.map_err(BgpError::IoError)
    }
}

/// Reads from `read_half` until the connection closes or errors,
/// framing messages through the codec and pushing the matching FSM
/// event for each outcome through `sink` — the same `EventSink` every
/// other producer uses, so a ManualStop/AutomaticStop flush reaches
/// events this loop already pushed.
pub async fn run_input_loop(mut read_half: OwnedReadHalf, ctx: OpenValidationContext, sink: EventSink) {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        let mut chunk = [0u8; 4096];
        let n = match read_half.read(&mut chunk).await {
            Ok(0) => {
                sink.push(Event::TcpConnectionFails);
                return;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "transport read failed");
                sink.push(Event::TcpConnectionFails);
                return;
            }
        };
        buf.extend_from_slice(&chunk[..n]);

        loop {
            match codec::decode(&buf, Some(ctx)) {
                DecodeOutcome::Partial { .. } => break,
                DecodeOutcome::Protocol(payload) => {
                    buf.clear();
                    sink.push(classify_protocol_error(payload));
                    break;
                }
                DecodeOutcome::Message(msg) => {
                    let consumed = message_wire_len(&msg);
                    let _ = buf.split_to(consumed);
                    sink.push(classify_message(msg));
                }
            }
        }
    }
}

fn message_wire_len(msg: &BgpMessage) -> usize {
    msg.encode().len()
}

fn classify_protocol_error(payload: NotificationPayload) -> Event {
    match payload.code {
        1 => Event::BgpHeaderErr(payload),
        2 => Event::BgpOpenMsgErr(payload),
        3 => Event::UpdateMsgErr(payload),
        _ => Event::BgpHeaderErr(payload),
    }
}

fn classify_message(msg: BgpMessage) -> Event {
    match msg {
        BgpMessage::Open(open) => Event::BgpOpen {
            peer_hold_time: open.hold_time,
            peer_bgp_id: open.bgp_identifier,
        },
        BgpMessage::Keepalive(_) => Event::KeepAliveMsg,
        BgpMessage::Update(update) => Event::UpdateMsg {
            nlri_count: update.nlri.len(),
            withdrawn_count: update.withdrawn_routes.len(),
        },
        BgpMessage::Notification(n) => {
            let payload = NotificationPayload {
                code: n.error_code,
                subcode: n.error_subcode,
                data: n.data,
            };
            if payload.code == 2 && payload.subcode == 1 {
                Event::NotifMsgVerErr
            } else {
                Event::NotifMsg(payload)
            }
        }
    }
}
