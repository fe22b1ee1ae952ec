//! Engine.IO packet codec (C1).
//!
//! Encodes and decodes the framed packets of the transport-abstraction
//! layer: single packets (for WebSocket frames) and payloads (ordered
//! packet batches, for HTTP long-polling bodies).
//!
//! Grounded on `socketio/engine/socket.py` and
//! `socketio_client/engine/transports.py`, restructured in `socketio/protocol.rs`'s
//! idiom: a `#[repr]`-free enum with `from_u8`/`to_u8`, and a packet struct
//! carrying raw bytes.

use crate::error::EngineError;

/// Engine.IO packet type. Digits are fixed by the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnginePacketType {
    Open = 0,
    Close = 1,
    Ping = 2,
    Pong = 3,
    Message = 4,
    Upgrade = 5,
    Noop = 6,
}

impl EnginePacketType {
    pub fn from_digit(d: u8) -> Option<Self> {
        match d {
            0 => Some(Self::Open),
            1 => Some(Self::Close),
            2 => Some(Self::Ping),
            3 => Some(Self::Pong),
            4 => Some(Self::Message),
            5 => Some(Self::Upgrade),
            6 => Some(Self::Noop),
            _ => None,
        }
    }

    pub fn digit(self) -> u8 {
        self as u8
    }
}

/// Payload carried by an Engine.IO packet: absent, text, or opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketData {
    None,
    Text(String),
    Binary(Vec<u8>),
}

impl PacketData {
    pub fn is_binary(&self) -> bool {
        matches!(self, PacketData::Binary(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PacketData::Text(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePacket {
    pub packet_type: EnginePacketType,
    pub data: PacketData,
}

impl EnginePacket {
    pub fn new(packet_type: EnginePacketType, data: PacketData) -> Self {
        Self { packet_type, data }
    }

    pub fn text(packet_type: EnginePacketType, text: impl Into<String>) -> Self {
        Self::new(packet_type, PacketData::Text(text.into()))
    }

    pub fn binary(packet_type: EnginePacketType, bytes: Vec<u8>) -> Self {
        Self::new(packet_type, PacketData::Binary(bytes))
    }

    pub fn empty(packet_type: EnginePacketType) -> Self {
        Self::new(packet_type, PacketData::None)
    }

    pub fn open(sid: &str, ping_interval_ms: u64, ping_timeout_ms: u64, upgrades: &[&str]) -> Self {
        let body = serde_json::json!({
            "sid": sid,
            "upgrades": upgrades,
            "pingInterval": ping_interval_ms,
            "pingTimeout": ping_timeout_ms,
        });
        Self::text(EnginePacketType::Open, body.to_string())
    }

    pub fn ping(data: impl Into<String>) -> Self {
        Self::text(EnginePacketType::Ping, data)
    }

    pub fn pong(data: impl Into<String>) -> Self {
        Self::text(EnginePacketType::Pong, data)
    }

    /// Encode a single packet to its text form: `<digit><text>`, or, for a
    /// binary packet whose peer cannot accept raw binary, `b<digit><base64>`.
    pub fn encode_text(&self) -> String {
        let digit = char::from_digit(self.packet_type.digit() as u32, 10).unwrap();
        match &self.data {
            PacketData::None => digit.to_string(),
            PacketData::Text(s) => format!("{digit}{s}"),
            PacketData::Binary(bytes) => {
                use base64::Engine as _;
                format!("b{digit}{}", base64::engine::general_purpose::STANDARD.encode(bytes))
            }
        }
    }

    /// Encode a single packet to its binary form: first byte is the type,
    /// remainder is the raw payload. Only meaningful for binary packets.
    pub fn encode_binary(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.data_len());
        out.push(self.packet_type.digit());
        if let PacketData::Binary(bytes) = &self.data {
            out.extend_from_slice(bytes);
        }
        out
    }

    fn data_len(&self) -> usize {
        match &self.data {
            PacketData::None => 0,
            PacketData::Text(s) => s.len(),
            PacketData::Binary(b) => b.len(),
        }
    }

    /// Decode a single packet from its text form.
    pub fn decode_text(s: &str) -> Result<Self, EngineError> {
        if s.is_empty() {
            return Err(EngineError::Malformed("empty packet".into()));
        }
        if let Some(rest) = s.strip_prefix('b') {
            let digit = rest
                .chars()
                .next()
                .and_then(|c| c.to_digit(10))
                .ok_or_else(|| EngineError::Malformed("missing base64 packet type".into()))?;
            let packet_type = EnginePacketType::from_digit(digit as u8)
                .ok_or_else(|| EngineError::Malformed(format!("unknown packet type {digit}")))?;
            use base64::Engine as _;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&rest[1..])
                .map_err(|e| EngineError::Malformed(format!("bad base64: {e}")))?;
            return Ok(Self::binary(packet_type, bytes));
        }

        let mut chars = s.chars();
        let digit = chars
            .next()
            .unwrap()
            .to_digit(10)
            .ok_or_else(|| EngineError::Malformed("missing packet type".into()))?;
        let packet_type = EnginePacketType::from_digit(digit as u8)
            .ok_or_else(|| EngineError::Malformed(format!("unknown packet type {digit}")))?;
        let rest: String = chars.collect();
        let data = if rest.is_empty() {
            PacketData::None
        } else {
            PacketData::Text(rest)
        };
        Ok(Self::new(packet_type, data))
    }

    /// Decode a single packet from its binary form (first byte = type).
    pub fn decode_binary(bytes: &[u8]) -> Result<Self, EngineError> {
        let (&first, rest) = bytes
            .split_first()
            .ok_or_else(|| EngineError::Malformed("empty binary packet".into()))?;
        let packet_type = EnginePacketType::from_digit(first)
            .ok_or_else(|| EngineError::Malformed(format!("unknown packet type {first}")))?;
        Ok(Self::binary(packet_type, rest.to_vec()))
    }
}

/// Ordered list of Engine.IO packets carried in a single polling HTTP body.
pub type Payload = Vec<EnginePacket>;

/// Encode a payload under the binary-capable framing: each element prefixed
/// by a one-byte type marker (0 text, 1 binary), a decimal-digit-byte length
/// run terminated by `0xFF`, then the encoded element.
pub fn encode_payload_binary(packets: &[EnginePacket]) -> Vec<u8> {
    let mut out = Vec::new();
    for p in packets {
        let (marker, bytes): (u8, Vec<u8>) = match &p.data {
            PacketData::Binary(_) => (1, p.encode_binary()),
            _ => (0, p.encode_text().into_bytes()),
        };
        out.push(marker);
        for digit in bytes.len().to_string().chars() {
            out.push(digit.to_digit(10).unwrap() as u8);
        }
        out.push(0xFF);
        out.extend_from_slice(&bytes);
    }
    out
}

/// Encode a payload under the text-only framing: `<len>:<encoded>` per
/// element, where binary packets use the `b<digit><base64>` text form.
pub fn encode_payload_text(packets: &[EnginePacket]) -> String {
    let mut out = String::new();
    for p in packets {
        let encoded = p.encode_text();
        out.push_str(&encoded.chars().count().to_string());
        out.push(':');
        out.push_str(&encoded);
    }
    out
}

/// A decoded payload element, carrying its index among the batch.
pub struct PayloadItem {
    pub packet: EnginePacket,
    pub index: usize,
    pub total: usize,
}

/// Decode a binary-capable-framed payload.
pub fn decode_payload_binary(bytes: &[u8]) -> Result<Vec<EnginePacket>, EngineError> {
    let mut packets = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let marker = bytes[i];
        i += 1;
        let mut digits = Vec::new();
        while i < bytes.len() && bytes[i] != 0xFF {
            if bytes[i] > 9 {
                return Err(EngineError::Malformed("bad length digit".into()));
            }
            digits.push(bytes[i]);
            i += 1;
        }
        if i >= bytes.len() {
            return Err(EngineError::Malformed("unterminated length prefix".into()));
        }
        i += 1; // skip 0xFF
        let len: usize = digits
            .iter()
            .fold(0usize, |acc, d| acc * 10 + *d as usize);
        if i + len > bytes.len() {
            return Err(EngineError::Malformed("length overruns buffer".into()));
        }
        let element = &bytes[i..i + len];
        i += len;
        let packet = match marker {
            0 => EnginePacket::decode_text(
                std::str::from_utf8(element)
                    .map_err(|e| EngineError::Malformed(format!("invalid utf8: {e}")))?,
            )?,
            1 => EnginePacket::decode_binary(element)?,
            other => return Err(EngineError::Malformed(format!("unknown marker {other}"))),
        };
        packets.push(packet);
    }
    Ok(packets)
}

/// Decode a text-only-framed payload. Binary packets appear as `b<digit>…`
/// base64 text and are decoded back to raw bytes transparently.
pub fn decode_payload_text(s: &str) -> Result<Vec<EnginePacket>, EngineError> {
    let chars: Vec<char> = s.chars().collect();
    let mut packets = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let start = i;
        while i < chars.len() && chars[i] != ':' {
            if !chars[i].is_ascii_digit() {
                return Err(EngineError::Malformed("bad length prefix".into()));
            }
            i += 1;
        }
        if i >= chars.len() {
            return Err(EngineError::Malformed("missing ':' in payload".into()));
        }
        let len: usize = chars[start..i]
            .iter()
            .collect::<String>()
            .parse()
            .map_err(|_| EngineError::Malformed("bad length".into()))?;
        i += 1; // skip ':'
        if i + len > chars.len() {
            return Err(EngineError::Malformed("length overruns buffer".into()));
        }
        let element: String = chars[i..i + len].iter().collect();
        i += len;
        packets.push(EnginePacket::decode_text(&element)?);
    }
    Ok(packets)
}

/// Decode a payload, choosing the framing by sniffing its leading byte:
/// the binary-capable framing always starts with a `0` or `1` marker byte
/// immediately followed by ASCII digit *byte values* (never valid UTF-8
/// digit characters at that position unless a coincidence), while the
/// text-only framing is always valid UTF-8 starting with an ASCII digit
/// character followed eventually by `:`. Callers that know which framing
/// is in play (session `supportsBinary` flag) should prefer the specific
/// `decode_payload_binary`/`decode_payload_text` functions instead.
pub fn decode_payload_any(bytes: &[u8], supports_binary: bool) -> Result<Vec<EnginePacket>, EngineError> {
    if supports_binary {
        decode_payload_binary(bytes)
    } else {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| EngineError::Malformed(format!("invalid utf8: {e}")))?;
        decode_payload_text(s)
    }
}

/// Yield decoded payload items with their `(index, total)` position.
pub fn decode_payload_items(bytes: &[u8], supports_binary: bool) -> Result<Vec<PayloadItem>, EngineError> {
    let packets = decode_payload_any(bytes, supports_binary)?;
    let total = packets.len();
    Ok(packets
        .into_iter()
        .enumerate()
        .map(|(index, packet)| PayloadItem { packet, index, total })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_text_packet_round_trips() {
        let p = EnginePacket::text(EnginePacketType::Message, "hello");
        assert_eq!(p.encode_text(), "4hello");
        let decoded = EnginePacket::decode_text(&p.encode_text()).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn empty_packet_round_trips() {
        let p = EnginePacket::empty(EnginePacketType::Ping);
        assert_eq!(p.encode_text(), "2");
        let decoded = EnginePacket::decode_text("2").unwrap();
        assert_eq!(decoded.packet_type, EnginePacketType::Ping);
        assert_eq!(decoded.data, PacketData::None);
    }

    #[test]
    fn binary_packet_b64_text_round_trips() {
        let p = EnginePacket::binary(EnginePacketType::Message, vec![1, 2, 3, 255]);
        let encoded = p.encode_text();
        assert!(encoded.starts_with("b4"));
        let decoded = EnginePacket::decode_text(&encoded).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn binary_packet_binary_form_round_trips() {
        let p = EnginePacket::binary(EnginePacketType::Message, vec![9, 8, 7]);
        let encoded = p.encode_binary();
        assert_eq!(encoded, vec![4, 9, 8, 7]);
        let decoded = EnginePacket::decode_binary(&encoded).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn payload_binary_framing_round_trips_mixed_list() {
        let packets = vec![
            EnginePacket::text(EnginePacketType::Message, "hi"),
            EnginePacket::binary(EnginePacketType::Message, vec![0, 1, 2]),
            EnginePacket::empty(EnginePacketType::Noop),
        ];
        let encoded = encode_payload_binary(&packets);
        let decoded = decode_payload_binary(&encoded).unwrap();
        assert_eq!(decoded, packets);
    }

    #[test]
    fn payload_text_framing_round_trips_mixed_list() {
        let packets = vec![
            EnginePacket::text(EnginePacketType::Message, "hi"),
            EnginePacket::binary(EnginePacketType::Message, vec![0, 1, 2]),
            EnginePacket::empty(EnginePacketType::Noop),
        ];
        let encoded = encode_payload_text(&packets);
        let decoded = decode_payload_text(&encoded).unwrap();
        assert_eq!(decoded, packets);
    }

    #[test]
    fn payload_decode_rejects_length_overrun() {
        let bad = "5:hi"; // claims 5 chars but only 2 follow
        assert!(decode_payload_text(bad).is_err());
    }

    #[test]
    fn open_packet_carries_handshake_fields() {
        let p = EnginePacket::open("abc123", 25000, 60000, &["websocket"]);
        let text = p.encode_text();
        assert!(text.starts_with('0'));
        assert!(text.contains("\"sid\":\"abc123\""));
        assert!(text.contains("\"upgrades\":[\"websocket\"]"));
    }

    #[test]
    fn decode_payload_items_reports_index_and_total() {
        let packets = vec![
            EnginePacket::empty(EnginePacketType::Ping),
            EnginePacket::empty(EnginePacketType::Pong),
        ];
        let encoded = encode_payload_text(&packets);
        let items = decode_payload_items(encoded.as_bytes(), false).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].index, 0);
        assert_eq!(items[0].total, 2);
        assert_eq!(items[1].index, 1);
    }
}
