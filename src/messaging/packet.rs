//! Messaging (Socket.IO) packet codec and binary reconstruction (C2).
//!
//! The header grammar and `SocketPacketType` digits follow
//! `socketio/protocol.rs`; this version adds the attachment-count
//! segment (`<n>-`) and a [`BinaryReconstructor`] state machine, grounded
//! on `socketio/socket.py`'s `on_packet`/`_binary_parser`-style handling.
//!
//! Binary attachments are not spliced back into the decoded `data` value as
//! raw bytes (`serde_json::Value` has no byte-string variant); instead a
//! decoded event carries its JSON skeleton, placeholders intact, alongside
//! an ordered `attachments: Vec<Vec<u8>>`. Callers that care zip the two
//! back together themselves. This keeps the codec honestly typed instead of
//! inventing a parallel dynamic value type just to mirror a duck-typed
//! original.
//!
//! Outbound, the same byte-string gap is bridged by [`bin_value`]: wrap raw
//! bytes with it when building an `emit`/`ack` argument tree, and
//! [`extract_attachments`] (the `has_bin` walk of spec §Glossary) pulls them
//! back out into placeholders plus an attachment list right before framing.

use serde_json::Value as JsonValue;

use crate::error::MessagingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketPacketType {
    Connect = 0,
    Disconnect = 1,
    Event = 2,
    Ack = 3,
    ConnectError = 4,
    BinaryEvent = 5,
    BinaryAck = 6,
}

impl SocketPacketType {
    pub fn from_digit(d: u8) -> Option<Self> {
        match d {
            0 => Some(Self::Connect),
            1 => Some(Self::Disconnect),
            2 => Some(Self::Event),
            3 => Some(Self::Ack),
            4 => Some(Self::ConnectError),
            5 => Some(Self::BinaryEvent),
            6 => Some(Self::BinaryAck),
            _ => None,
        }
    }

    pub fn digit(self) -> u8 {
        self as u8
    }

    pub fn is_binary(self) -> bool {
        matches!(self, Self::BinaryEvent | Self::BinaryAck)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    pub packet_type: SocketPacketType,
    pub namespace: String,
    pub data: Option<JsonValue>,
    pub id: Option<u32>,
    /// Outgoing: the raw buffers to send as the following Engine `message`
    /// packets. Incoming: the buffers that were reconstructed for this packet.
    pub attachments: Vec<Vec<u8>>,
}

impl SocketPacket {
    fn base(packet_type: SocketPacketType, namespace: &str) -> Self {
        Self {
            packet_type,
            namespace: namespace.to_string(),
            data: None,
            id: None,
            attachments: Vec::new(),
        }
    }

    pub fn connect(namespace: &str, sid: Option<&str>) -> Self {
        let mut p = Self::base(SocketPacketType::Connect, namespace);
        p.data = sid.map(|s| serde_json::json!({ "sid": s }));
        p
    }

    pub fn connect_request(namespace: &str, auth: Option<JsonValue>) -> Self {
        let mut p = Self::base(SocketPacketType::Connect, namespace);
        p.data = auth;
        p
    }

    pub fn disconnect(namespace: &str) -> Self {
        Self::base(SocketPacketType::Disconnect, namespace)
    }

    pub fn connect_error(namespace: &str, message: &str) -> Self {
        let mut p = Self::base(SocketPacketType::ConnectError, namespace);
        p.data = Some(serde_json::json!({ "message": message }));
        p
    }

    /// An `event` packet for `event_name` with positional `args`, carrying
    /// `attachments` if non-empty (switches the wire type to `BinaryEvent`).
    pub fn event(namespace: &str, event_name: &str, args: Vec<JsonValue>, attachments: Vec<Vec<u8>>) -> Self {
        let packet_type = if attachments.is_empty() {
            SocketPacketType::Event
        } else {
            SocketPacketType::BinaryEvent
        };
        let mut p = Self::base(packet_type, namespace);
        let mut arr = vec![JsonValue::String(event_name.to_string())];
        arr.extend(args);
        p.data = Some(JsonValue::Array(arr));
        p.attachments = attachments;
        p
    }

    pub fn event_with_ack(
        namespace: &str,
        event_name: &str,
        args: Vec<JsonValue>,
        attachments: Vec<Vec<u8>>,
        ack_id: u32,
    ) -> Self {
        let mut p = Self::event(namespace, event_name, args, attachments);
        p.id = Some(ack_id);
        p
    }

    pub fn ack(namespace: &str, id: u32, args: Vec<JsonValue>, attachments: Vec<Vec<u8>>) -> Self {
        let packet_type = if attachments.is_empty() {
            SocketPacketType::Ack
        } else {
            SocketPacketType::BinaryAck
        };
        let mut p = Self::base(packet_type, namespace);
        p.data = Some(JsonValue::Array(args));
        p.id = Some(id);
        p.attachments = attachments;
        p
    }

    /// Encode the text header. Binary attachments must be sent by the
    /// caller as the following Engine `message` packets, in order.
    pub fn encode_header(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.packet_type.digit().to_string());
        if !self.attachments.is_empty() {
            out.push_str(&self.attachments.len().to_string());
            out.push('-');
        }
        if self.namespace != "/" {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    /// Decode a header. Returns the packet (with `attachments` empty) and
    /// the number of binary frames still needed before it's complete.
    pub fn decode_header(s: &str) -> Result<(Self, usize), MessagingError> {
        let mut chars = s.chars().peekable();
        let type_digit = chars
            .next()
            .and_then(|c| c.to_digit(10))
            .ok_or_else(|| MessagingError::Decode("missing packet type".into()))?;
        let packet_type = SocketPacketType::from_digit(type_digit as u8)
            .ok_or_else(|| MessagingError::Decode(format!("unknown packet type {type_digit}")))?;

        let rest: String = chars.collect();
        let mut cursor = 0usize;
        let bytes: Vec<char> = rest.chars().collect();

        let mut attachment_count = 0usize;
        if packet_type.is_binary() {
            let start = cursor;
            while cursor < bytes.len() && bytes[cursor].is_ascii_digit() {
                cursor += 1;
            }
            if cursor == start || cursor >= bytes.len() || bytes[cursor] != '-' {
                return Err(MessagingError::Decode("missing attachment count".into()));
            }
            attachment_count = bytes[start..cursor]
                .iter()
                .collect::<String>()
                .parse()
                .map_err(|_| MessagingError::Decode("bad attachment count".into()))?;
            cursor += 1; // skip '-'
        }

        let mut namespace = "/".to_string();
        if cursor < bytes.len() && bytes[cursor] == '/' {
            let start = cursor;
            while cursor < bytes.len() && bytes[cursor] != ',' {
                if bytes[cursor] == '[' || bytes[cursor] == '{' {
                    break;
                }
                cursor += 1;
            }
            namespace = bytes[start..cursor].iter().collect();
            if cursor < bytes.len() && bytes[cursor] == ',' {
                cursor += 1;
            }
        }

        let data_start = bytes[cursor..]
            .iter()
            .position(|&c| c == '[' || c == '{')
            .map(|p| p + cursor)
            .unwrap_or(bytes.len());

        let mut id = None;
        if data_start > cursor {
            let id_str: String = bytes[cursor..data_start].iter().collect();
            if !id_str.trim().is_empty() {
                id = Some(
                    id_str
                        .trim()
                        .parse::<u32>()
                        .map_err(|_| MessagingError::Decode("bad ack id".into()))?,
                );
            }
        }

        let data = if data_start < bytes.len() {
            let json_str: String = bytes[data_start..].iter().collect();
            Some(
                serde_json::from_str(&json_str)
                    .map_err(|e| MessagingError::Decode(format!("invalid json body: {e}")))?,
            )
        } else {
            None
        };

        Ok((
            Self {
                packet_type,
                namespace,
                data,
                id,
                attachments: Vec::new(),
            },
            attachment_count,
        ))
    }

    /// For `Event`/`BinaryEvent` packets, the event name and its remaining
    /// positional arguments.
    pub fn as_event(&self) -> Option<(String, Vec<JsonValue>)> {
        if !matches!(self.packet_type, SocketPacketType::Event | SocketPacketType::BinaryEvent) {
            return None;
        }
        let arr = self.data.as_ref()?.as_array()?;
        let (first, rest) = arr.split_first()?;
        let name = first.as_str()?.to_string();
        Some((name, rest.to_vec()))
    }

    /// For `Ack`/`BinaryAck` packets, the arguments passed to the callback.
    pub fn as_ack_args(&self) -> Option<Vec<JsonValue>> {
        if !matches!(self.packet_type, SocketPacketType::Ack | SocketPacketType::BinaryAck) {
            return None;
        }
        self.data.as_ref()?.as_array().cloned()
    }
}

/// Sentinel key used by [`bin_value`] to mark a JSON object as standing in
/// for an opaque byte sequence. `serde_json::Value` has no byte-string
/// variant, so an outbound argument tree embeds raw bytes this way until
/// [`extract_attachments`] walks them back out before the packet is framed.
const BIN_TAG: &str = "_bin";

/// Wrap raw bytes so they can be embedded inside an `emit`/`ack` argument
/// tree. [`extract_attachments`] finds every occurrence, replaces it with
/// the wire-level `{_placeholder: true, num: N}` marker, and lifts the
/// bytes into the packet's attachment list in traversal order.
pub fn bin_value(bytes: Vec<u8>) -> JsonValue {
    use base64::Engine as _;
    serde_json::json!({ BIN_TAG: base64::engine::general_purpose::STANDARD.encode(bytes) })
}

fn as_bin_bytes(value: &JsonValue) -> Option<Vec<u8>> {
    use base64::Engine as _;
    let obj = value.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    let encoded = obj.get(BIN_TAG)?.as_str()?;
    base64::engine::general_purpose::STANDARD.decode(encoded).ok()
}

/// True iff `value` contains a [`bin_value`]-tagged byte sequence at any
/// depth (§Glossary `has_bin`).
pub fn has_bin(value: &JsonValue) -> bool {
    if as_bin_bytes(value).is_some() {
        return true;
    }
    match value {
        JsonValue::Array(items) => items.iter().any(has_bin),
        JsonValue::Object(map) => map.values().any(has_bin),
        _ => false,
    }
}

/// Walk `args`, replacing every [`bin_value`] tag with a placeholder and
/// collecting the bytes, in traversal order, into the returned attachment
/// list (spec §4.2 step 1).
pub fn extract_attachments(args: Vec<JsonValue>) -> (Vec<JsonValue>, Vec<Vec<u8>>) {
    let mut attachments = Vec::new();
    let out = args.into_iter().map(|v| extract_one(v, &mut attachments)).collect();
    (out, attachments)
}

fn extract_one(value: JsonValue, attachments: &mut Vec<Vec<u8>>) -> JsonValue {
    if let Some(bytes) = as_bin_bytes(&value) {
        let num = attachments.len();
        attachments.push(bytes);
        return serde_json::json!({ "_placeholder": true, "num": num });
    }
    match value {
        JsonValue::Array(items) => JsonValue::Array(items.into_iter().map(|v| extract_one(v, attachments)).collect()),
        JsonValue::Object(map) => {
            JsonValue::Object(map.into_iter().map(|(k, v)| (k, extract_one(v, attachments))).collect())
        }
        other => other,
    }
}

/// Buffers binary attachment frames between a `BinaryEvent`/`BinaryAck`
/// header and its completion, rejecting interleaved headers as a protocol
/// error.
#[derive(Default)]
pub struct BinaryReconstructor {
    pending: Option<(SocketPacket, usize)>,
    buffers: Vec<Vec<u8>>,
}

impl BinaryReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_reconstructing(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed a decoded text header. Returns the packet immediately if it
    /// carries no attachments, or `None` while attachments are still
    /// pending.
    pub fn take_header(&mut self, s: &str) -> Result<Option<SocketPacket>, MessagingError> {
        if self.pending.is_some() {
            return Err(MessagingError::Decode(
                "received a packet header while a binary reconstruction was in progress".into(),
            ));
        }
        let (packet, needed) = SocketPacket::decode_header(s)?;
        if needed == 0 {
            return Ok(Some(packet));
        }
        self.buffers.clear();
        self.pending = Some((packet, needed));
        Ok(None)
    }

    /// Feed one binary attachment frame, in arrival order. Returns the
    /// completed packet once the expected count has arrived.
    pub fn take_attachment(&mut self, bytes: Vec<u8>) -> Option<SocketPacket> {
        let (_, needed) = self.pending.as_mut()?;
        self.buffers.push(bytes);
        *needed -= 1;
        if *needed == 0 {
            let (mut packet, _) = self.pending.take().unwrap();
            packet.attachments = std::mem::take(&mut self.buffers);
            Some(packet)
        } else {
            None
        }
    }
}
