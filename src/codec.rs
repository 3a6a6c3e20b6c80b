//! BGP-4 message wire codec (RFC 4271 Section 4).
//!
//! Encoding and decoding is pure: no I/O, no FSM knowledge. [`decode`]
//! distinguishes "not enough bytes yet" from "this is a protocol
//! violation" so the transport adapter can keep buffering in the first
//! case and raise a NOTIFICATION in the second.

use crate::error::{MsgHeaderErrSubcode, NotificationPayload, OpenMsgErrSubcode, UpdateMsgErrSubcode};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// BGP Message Types (RFC 4271 Section 4.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Open = 1,
    Update = 2,
    Notification = 3,
    Keepalive = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            1 => Ok(MessageType::Open),
            2 => Ok(MessageType::Update),
            3 => Ok(MessageType::Notification),
            4 => Ok(MessageType::Keepalive),
            _ => Err(()),
        }
    }
}

/// BGP Message Header (RFC 4271 Section 4.1). Every message starts
/// with a 19-byte header.
#[derive(Debug, Clone)]
pub struct MessageHeader {
    pub marker: [u8; 16],
    pub length: u16,
    pub msg_type: MessageType,
}

impl MessageHeader {
    pub const MIN_SIZE: usize = 19;
    pub const MAX_SIZE: usize = 4096;

    pub fn new(msg_type: MessageType, length: u16) -> Self {
        Self {
            marker: [0xFF; 16],
            length,
            msg_type,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.marker);
        buf.put_u16(self.length);
        buf.put_u8(self.msg_type as u8);
    }
}

/// Outcome of attempting to decode one message out of a byte buffer.
pub enum DecodeOutcome {
    /// Not enough bytes buffered yet; caller should keep reading.
    /// `expected` is the number of bytes needed before retrying.
    Partial { expected: usize },
    /// A NOTIFICATION-worthy protocol violation was found in the
    /// header or body. Caller surfaces this as the matching FSM event.
    Protocol(NotificationPayload),
    /// A full, valid message.
    Message(BgpMessage),
}

/// Context the OPEN decoder needs to perform the semantic checks the
/// FSM expects (peer ASN / local identifier / hold-time bounds).
#[derive(Debug, Clone, Copy)]
pub struct OpenValidationContext {
    pub expected_peer_asn: u16,
    pub local_bgp_id: u32,
}

/// Decode one BGP message from `data`. `ctx` supplies the fields an
/// OPEN decode must validate against; pass `None` to skip semantic
/// validation (e.g. when only framing is of interest).
pub fn decode(data: &[u8], ctx: Option<OpenValidationContext>) -> DecodeOutcome {
    if data.len() < MessageHeader::MIN_SIZE {
        return DecodeOutcome::Partial { expected: MessageHeader::MIN_SIZE };
    }

    if data[0..16] != [0xFF; 16] {
        return DecodeOutcome::Protocol(NotificationPayload::header_err(
            MsgHeaderErrSubcode::ConnectionNotSynchronised,
            Vec::new(),
        ));
    }

    let length = u16::from_be_bytes([data[16], data[17]]);
    let type_byte = data[18];

    if (length as usize) < MessageHeader::MIN_SIZE || length as usize > MessageHeader::MAX_SIZE {
        return DecodeOutcome::Protocol(NotificationPayload::header_err(
            MsgHeaderErrSubcode::BadMessageLength,
            length.to_be_bytes().to_vec(),
        ));
    }

    let msg_type = match MessageType::try_from(type_byte) {
        Ok(t) => t,
        Err(()) => {
            return DecodeOutcome::Protocol(NotificationPayload::header_err(
                MsgHeaderErrSubcode::BadMessageType,
                vec![type_byte],
            ));
        }
    };

    if data.len() < length as usize {
        return DecodeOutcome::Partial { expected: length as usize };
    }

    let mut body = Bytes::copy_from_slice(&data[MessageHeader::MIN_SIZE..length as usize]);

    match msg_type {
        MessageType::Open => match OpenMessage::decode(&mut body, ctx) {
            Ok(open) => DecodeOutcome::Message(BgpMessage::Open(open)),
            Err(payload) => DecodeOutcome::Protocol(payload),
        },
        MessageType::Update => match UpdateMessage::decode(&mut body) {
            Ok(update) => DecodeOutcome::Message(BgpMessage::Update(update)),
            Err(payload) => DecodeOutcome::Protocol(payload),
        },
        MessageType::Notification => match NotificationMessage::decode(&mut body) {
            Ok(n) => DecodeOutcome::Message(BgpMessage::Notification(n)),
            Err(payload) => DecodeOutcome::Protocol(payload),
        },
        MessageType::Keepalive => DecodeOutcome::Message(BgpMessage::Keepalive(KeepaliveMessage)),
    }
}

/// BGP OPEN Message (RFC 4271 Section 4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenMessage {
    pub version: u8,
    pub my_asn: u16,
    pub hold_time: u16,
    pub bgp_identifier: u32,
    pub opt_params: Vec<OptionalParameter>,
}

impl OpenMessage {
    pub fn new(my_asn: u16, hold_time: u16, bgp_identifier: u32) -> Self {
        Self {
            version: 4,
            my_asn,
            hold_time,
            bgp_identifier,
            opt_params: Vec::new(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        let opt_param_len: usize = self.opt_params.iter().map(|p| p.encoded_len()).sum();
        let msg_len = MessageHeader::MIN_SIZE + 10 + opt_param_len;

        MessageHeader::new(MessageType::Open, msg_len as u16).encode(&mut buf);

        buf.put_u8(self.version);
        buf.put_u16(self.my_asn);
        buf.put_u16(self.hold_time);
        buf.put_u32(self.bgp_identifier);
        buf.put_u8(opt_param_len as u8);
        for param in &self.opt_params {
            param.encode(&mut buf);
        }

        buf.freeze()
    }

    /// Field layout: version(1) asn(2) hold_time(2) bgp_identifier(4)
    /// opt_len(1) opt_params(opt_len). A prior implementation of this
    /// decoder read hold_time and bgp_identifier one byte too far in,
    /// having skipped the version byte; this layout is the corrected
    /// one and must be kept exactly as written.
    fn decode(buf: &mut Bytes, ctx: Option<OpenValidationContext>) -> Result<Self, NotificationPayload> {
        if buf.remaining() < 10 {
            return Err(NotificationPayload::header_err(MsgHeaderErrSubcode::BadMessageLength, Vec::new()));
        }

        let version = buf.get_u8();
        let my_asn = buf.get_u16();
        let hold_time = buf.get_u16();
        let bgp_identifier = buf.get_u32();
        let opt_param_len = buf.get_u8() as usize;

        if buf.remaining() < opt_param_len {
            return Err(NotificationPayload::header_err(MsgHeaderErrSubcode::BadMessageLength, Vec::new()));
        }

        let mut opt_params = Vec::new();
        let mut remaining = opt_param_len;
        while remaining > 0 {
            let param = OptionalParameter::decode(buf)
                .map_err(|_| NotificationPayload::open_err(OpenMsgErrSubcode::UnsupportedOptionalParameter))?;
            remaining = remaining
                .checked_sub(param.encoded_len())
                .ok_or_else(|| NotificationPayload::open_err(OpenMsgErrSubcode::UnsupportedOptionalParameter))?;
            opt_params.push(param);
        }

        if version != 4 {
            return Err(NotificationPayload::open_err(OpenMsgErrSubcode::UnsupportedVersionNumber));
        }
        if hold_time == 1 || hold_time == 2 {
            return Err(NotificationPayload::open_err(OpenMsgErrSubcode::UnacceptableHoldTime));
        }
        if let Some(ctx) = ctx {
            if my_asn != ctx.expected_peer_asn {
                return Err(NotificationPayload::open_err(OpenMsgErrSubcode::BadPeerAs));
            }
            if bgp_identifier == ctx.local_bgp_id {
                return Err(NotificationPayload::open_err(OpenMsgErrSubcode::BadBgpIdentifier));
            }
        }

        Ok(Self {
            version,
            my_asn,
            hold_time,
            bgp_identifier,
            opt_params,
        })
    }
}

/// BGP OPEN Optional Parameter. Capability negotiation is out of
/// scope; parameters round-trip opaquely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalParameter {
    pub param_type: u8,
    pub value: Vec<u8>,
}

impl OptionalParameter {
    fn encoded_len(&self) -> usize {
        2 + self.value.len()
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.param_type);
        buf.put_u8(self.value.len() as u8);
        buf.put_slice(&self.value);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, ()> {
        if buf.remaining() < 2 {
            return Err(());
        }
        let param_type = buf.get_u8();
        let length = buf.get_u8() as usize;
        if buf.remaining() < length {
            return Err(());
        }
        let mut value = vec![0u8; length];
        buf.copy_to_slice(&mut value);
        Ok(Self { param_type, value })
    }
}

/// BGP KEEPALIVE Message: header only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveMessage;

impl KeepaliveMessage {
    pub fn encode() -> Bytes {
        let mut buf = BytesMut::new();
        MessageHeader::new(MessageType::Keepalive, MessageHeader::MIN_SIZE as u16).encode(&mut buf);
        buf.freeze()
    }
}

/// BGP NOTIFICATION Message (RFC 4271 Section 4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub error_code: u8,
    pub error_subcode: u8,
    pub data: Vec<u8>,
}

impl NotificationMessage {
    pub fn new(error_code: u8, error_subcode: u8) -> Self {
        Self {
            error_code,
            error_subcode,
            data: Vec::new(),
        }
    }

    pub fn from_payload(payload: &NotificationPayload) -> Self {
        Self {
            error_code: payload.code,
            error_subcode: payload.subcode,
            data: payload.data.clone(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        let msg_len = MessageHeader::MIN_SIZE + 2 + self.data.len();
        MessageHeader::new(MessageType::Notification, msg_len as u16).encode(&mut buf);
        buf.put_u8(self.error_code);
        buf.put_u8(self.error_subcode);
        buf.put_slice(&self.data);
        buf.freeze()
    }

    fn decode(buf: &mut Bytes) -> Result<Self, NotificationPayload> {
        if buf.remaining() < 2 {
            return Err(NotificationPayload::header_err(MsgHeaderErrSubcode::BadMessageLength, Vec::new()));
        }
        let error_code = buf.get_u8();
        let error_subcode = buf.get_u8();
        let data = if buf.has_remaining() { buf.to_vec() } else { Vec::new() };
        Ok(Self {
            error_code,
            error_subcode,
            data,
        })
    }
}

/// BGP UPDATE Message (RFC 4271 Section 4.3). Path attribute contents
/// are carried opaquely; only withdrawn routes and NLRI prefixes are
/// structurally parsed (attribute semantics are out of scope).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateMessage {
    pub withdrawn_routes: Vec<IpPrefix>,
    pub path_attributes: Vec<u8>,
    pub nlri: Vec<IpPrefix>,
}

impl UpdateMessage {
    pub fn new() -> Self {
        Self {
            withdrawn_routes: Vec::new(),
            path_attributes: Vec::new(),
            nlri: Vec::new(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        let withdrawn_len: usize = self.withdrawn_routes.iter().map(|r| r.encoded_len()).sum();
        let msg_len = MessageHeader::MIN_SIZE
            + 2
            + withdrawn_len
            + 2
            + self.path_attributes.len()
            + self.nlri.iter().map(|n| n.encoded_len()).sum::<usize>();

        MessageHeader::new(MessageType::Update, msg_len as u16).encode(&mut buf);

        buf.put_u16(withdrawn_len as u16);
        for route in &self.withdrawn_routes {
            route.encode(&mut buf);
        }

        buf.put_u16(self.path_attributes.len() as u16);
        buf.put_slice(&self.path_attributes);

        for nlri in &self.nlri {
            nlri.encode(&mut buf);
        }

        buf.freeze()
    }

    fn decode(buf: &mut Bytes) -> Result<Self, NotificationPayload> {
        let malformed = || NotificationPayload::update_err(UpdateMsgErrSubcode::MalformedAttributeList);

        if buf.remaining() < 2 {
            return Err(malformed());
        }
        let withdrawn_len = buf.get_u16() as usize;
        if buf.remaining() < withdrawn_len {
            return Err(malformed());
        }
        let mut withdrawn_buf = buf.split_to(withdrawn_len);
        let mut withdrawn_routes = Vec::new();
        while withdrawn_buf.has_remaining() {
            withdrawn_routes.push(IpPrefix::decode(&mut withdrawn_buf).map_err(|_| malformed())?);
        }

        if buf.remaining() < 2 {
            return Err(malformed());
        }
        let path_attr_len = buf.get_u16() as usize;
        if buf.remaining() < path_attr_len {
            return Err(malformed());
        }
        let path_attributes = buf.split_to(path_attr_len).to_vec();

        let mut nlri = Vec::new();
        while buf.has_remaining() {
            nlri.push(IpPrefix::decode(buf).map_err(|_| malformed())?);
        }

        Ok(Self {
            withdrawn_routes,
            path_attributes,
            nlri,
        })
    }
}

impl Default for UpdateMessage {
    fn default() -> Self {
        Self::new()
    }
}

/// IPv4 prefix used in NLRI and withdrawn-routes fields: a length byte
/// followed by exactly ⌈length/8⌉ value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpPrefix {
    pub prefix_len: u8,
    pub prefix: Vec<u8>,
}

impl IpPrefix {
    pub fn encoded_len(&self) -> usize {
        1 + Self::byte_len(self.prefix_len)
    }

    /// ⌈L/8⌉. A prior implementation this was ported from computed
    /// this with `(len >> 3) + ((len & 3) != 0) as usize`, which is
    /// wrong for most non-multiple-of-8 lengths (e.g. L=9 needs 2
    /// bytes but that formula yields 1). This is the correct ceiling
    /// division.
    fn byte_len(prefix_len: u8) -> usize {
        (prefix_len as usize + 7) / 8
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.prefix_len);
        buf.put_slice(&self.prefix);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, ()> {
        if !buf.has_remaining() {
            return Err(());
        }
        let prefix_len = buf.get_u8();
        if prefix_len > 32 {
            return Err(());
        }
        let byte_len = Self::byte_len(prefix_len);
        if buf.remaining() < byte_len {
            return Err(());
        }
        let mut prefix = vec![0u8; byte_len];
        buf.copy_to_slice(&mut prefix);
        Ok(Self { prefix_len, prefix })
    }
}

/// A decoded BGP message of any type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BgpMessage {
    Open(OpenMessage),
    Update(UpdateMessage),
    Notification(NotificationMessage),
    Keepalive(KeepaliveMessage),
}

impl BgpMessage {
    pub fn encode(&self) -> Bytes {
        match self {
            BgpMessage::Open(msg) => msg.encode(),
            BgpMessage::Update(msg) => msg.encode(),
            BgpMessage::Notification(msg) => msg.encode(),
            BgpMessage::Keepalive(_) => KeepaliveMessage::encode(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> OpenValidationContext {
        OpenValidationContext {
            expected_peer_asn: 65002,
            local_bgp_id: 0x01010101,
        }
    }

    #[test]
    fn keepalive_round_trip() {
        let bytes = KeepaliveMessage::encode();
        assert_eq!(bytes.len(), MessageHeader::MIN_SIZE);
        match decode(&bytes, None) {
            DecodeOutcome::Message(BgpMessage::Keepalive(_)) => {}
            _ => panic!("expected keepalive"),
        }
    }

    #[test]
    fn open_round_trip_with_valid_context() {
        let open = OpenMessage::new(65002, 90, 0x02020202);
        let bytes = open.encode();
        match decode(&bytes, Some(ctx())) {
            DecodeOutcome::Message(BgpMessage::Open(decoded)) => {
                assert_eq!(decoded.version, 4);
                assert_eq!(decoded.my_asn, 65002);
                assert_eq!(decoded.hold_time, 90);
                assert_eq!(decoded.bgp_identifier, 0x02020202);
            }
            _ => panic!("expected open"),
        }
    }

    #[test]
    fn open_rejects_bad_peer_as() {
        let open = OpenMessage::new(65099, 90, 0x02020202);
        let bytes = open.encode();
        match decode(&bytes, Some(ctx())) {
            DecodeOutcome::Protocol(p) => {
                assert_eq!(p.code, 2);
                assert_eq!(p.subcode, 2);
            }
            _ => panic!("expected protocol error"),
        }
    }

    #[test]
    fn open_rejects_matching_router_id() {
        let open = OpenMessage::new(65002, 90, 0x01010101);
        let bytes = open.encode();
        match decode(&bytes, Some(ctx())) {
            DecodeOutcome::Protocol(p) => {
                assert_eq!(p.code, 2);
                assert_eq!(p.subcode, 3);
            }
            _ => panic!("expected protocol error"),
        }
    }

    #[test]
    fn open_rejects_unacceptable_hold_time() {
        let open = OpenMessage::new(65002, 1, 0x02020202);
        let bytes = open.encode();
        match decode(&bytes, Some(ctx())) {
            DecodeOutcome::Protocol(p) => {
                assert_eq!(p.code, 2);
                assert_eq!(p.subcode, 6);
            }
            _ => panic!("expected protocol error"),
        }
    }

    #[test]
    fn notification_round_trip() {
        let notif = NotificationMessage::new(6, 0);
        let bytes = notif.encode();
        match decode(&bytes, None) {
            DecodeOutcome::Message(BgpMessage::Notification(n)) => {
                assert_eq!(n.error_code, 6);
                assert_eq!(n.error_subcode, 0);
            }
            _ => panic!("expected notification"),
        }
    }

    #[test]
    fn marker_corruption_is_header_error() {
        let mut bytes = KeepaliveMessage::encode().to_vec();
        bytes[0] = 0xFE;
        match decode(&bytes, None) {
            DecodeOutcome::Protocol(p) => {
                assert_eq!(p.code, 1);
                assert_eq!(p.subcode, 1);
            }
            _ => panic!("expected header error"),
        }
    }

    #[test]
    fn short_buffer_is_partial() {
        match decode(&[0xFFu8; 10], None) {
            DecodeOutcome::Partial { expected } => assert_eq!(expected, MessageHeader::MIN_SIZE),
            _ => panic!("expected partial"),
        }
    }

    #[test]
    fn bad_type_byte_is_header_error() {
        let mut bytes = KeepaliveMessage::encode().to_vec();
        bytes[18] = 99;
        match decode(&bytes, None) {
            DecodeOutcome::Protocol(p) => {
                assert_eq!(p.code, 1);
                assert_eq!(p.subcode, 3);
            }
            _ => panic!("expected header error"),
        }
    }

    #[test]
    fn ip_prefix_byte_lengths() {
        assert_eq!(IpPrefix::byte_len(0), 0);
        assert_eq!(IpPrefix::byte_len(1), 1);
        assert_eq!(IpPrefix::byte_len(8), 1);
        assert_eq!(IpPrefix::byte_len(9), 2);
        assert_eq!(IpPrefix::byte_len(16), 2);
        assert_eq!(IpPrefix::byte_len(17), 3);
        assert_eq!(IpPrefix::byte_len(32), 4);
    }

    #[test]
    fn update_round_trip_with_prefixes() {
        let mut update = UpdateMessage::new();
        update.nlri.push(IpPrefix {
            prefix_len: 24,
            prefix: vec![10, 0, 1],
        });
        update.withdrawn_routes.push(IpPrefix {
            prefix_len: 16,
            prefix: vec![192, 168],
        });
        let bytes = update.encode();
        match decode(&bytes, None) {
            DecodeOutcome::Message(BgpMessage::Update(decoded)) => {
                assert_eq!(decoded.nlri.len(), 1);
                assert_eq!(decoded.withdrawn_routes.len(), 1);
                assert_eq!(decoded.nlri[0].prefix, vec![10, 0, 1]);
            }
            _ => panic!("expected update"),
        }
    }
}
