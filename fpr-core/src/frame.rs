//! The fixed-size wire frame (§3 "Frame", §6.3 "Wire format").
//!
//! Decoded into a tagged variant rather than aliased in place, per the
//! design note in §9: the 180-byte `protocol` area either carries raw
//! application bytes or a `ConnectInfo` control payload, and callers pick
//! which view to decode based on `id == CONTROL_ID`.

use crate::{
    security::{Key, KEY_LEN},
    version::Version,
};
use fpr_codec::{DecoderBuffer, DecoderError, EncoderBuffer};

/// Opaque application bytes, or the encoded form of a `ConnectInfo`.
pub const PROTOCOL_LEN: usize = 180;
pub type Mac = [u8; 6];
pub const BROADCAST_MAC: Mac = [0xFF; 6];

/// `id` sentinel marking a control frame (handshake, device-info, keepalive).
pub const CONTROL_ID: i32 = -1;

/// Default TTL for extender forwarding (§4.7).
pub const DEFAULT_MAX_HOPS: u8 = 10;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum PackageType {
    Single = 0,
    Start = 1,
    Continued = 2,
    End = 3,
}

impl PackageType {
    fn from_u8(tag: u8) -> Result<Self, DecoderError> {
        match tag {
            0 => Ok(Self::Single),
            1 => Ok(Self::Start),
            2 => Ok(Self::Continued),
            3 => Ok(Self::End),
            _ => Err(DecoderError::InvalidValue),
        }
    }

    /// Whether this type is part of a multi-frame fragmented message.
    pub fn is_fragment(self) -> bool {
        !matches!(self, Self::Single)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Visibility {
    Public = 0,
    Private = 1,
}

impl Visibility {
    fn from_u8(tag: u8) -> Result<Self, DecoderError> {
        match tag {
            0 => Ok(Self::Public),
            1 => Ok(Self::Private),
            _ => Err(DecoderError::InvalidValue),
        }
    }
}

/// A fixed-size frame as it appears on the radio.
///
/// Total encoded length is `FRAME_LEN`, comfortably under the ≈250-byte
/// radio MTU (§1, §6.1).
#[derive(Clone, Debug)]
pub struct Frame {
    pub protocol: [u8; PROTOCOL_LEN],
    pub package_type: PackageType,
    pub id: i32,
    pub origin_mac: Mac,
    pub dest_mac: Mac,
    pub hop_count: u8,
    pub max_hops: u8,
    pub version: Version,
    pub sequence_num: u32,
    pub payload_size: u8,
}

pub const FRAME_LEN: usize = PROTOCOL_LEN // protocol
    + 1 // package_type
    + 4 // id
    + 6 // origin_mac
    + 6 // dest_mac
    + 1 // hop_count
    + 1 // max_hops
    + 3 // version (24-bit packed)
    + 4 // sequence_num
    + 1; // payload_size

impl Frame {
    /// Whether `id == CONTROL_ID`.
    pub fn is_control(&self) -> bool {
        self.id == CONTROL_ID
    }

    pub fn is_broadcast_dest(&self) -> bool {
        self.dest_mac == BROADCAST_MAC
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut out = [0u8; FRAME_LEN];
        let mut buffer = EncoderBuffer::new(&mut out);
        buffer
            .encode_bytes(&self.protocol)
            .encode_u8(self.package_type as u8)
            .encode_i32(self.id)
            .encode_bytes(&self.origin_mac)
            .encode_bytes(&self.dest_mac)
            .encode_u8(self.hop_count)
            .encode_u8(self.max_hops);
        let packed = self.version.pack();
        buffer.encode_bytes(&packed.to_le_bytes()[0..3]);
        buffer.encode_u32(self.sequence_num).encode_u8(self.payload_size);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecoderError> {
        if bytes.len() != FRAME_LEN {
            return Err(DecoderError::UnexpectedEof);
        }
        let buffer = DecoderBuffer::new(bytes);
        let (protocol, buffer): ([u8; PROTOCOL_LEN], _) = buffer.decode()?;
        let (package_type, buffer): (u8, _) = buffer.decode()?;
        let package_type = PackageType::from_u8(package_type)?;
        let (id, buffer): (i32, _) = buffer.decode()?;
        let (origin_mac, buffer): (Mac, _) = buffer.decode()?;
        let (dest_mac, buffer): (Mac, _) = buffer.decode()?;
        let (hop_count, buffer): (u8, _) = buffer.decode()?;
        let (max_hops, buffer): (u8, _) = buffer.decode()?;
        let (version_bytes, buffer): ([u8; 3], _) = buffer.decode()?;
        let packed = u32::from_le_bytes([version_bytes[0], version_bytes[1], version_bytes[2], 0]);
        let version = Version::unpack(packed);
        let (sequence_num, buffer): (u32, _) = buffer.decode()?;
        let (payload_size, buffer): (u8, _) = buffer.decode()?;
        debug_assert!(buffer.is_empty());

        Ok(Self {
            protocol,
            package_type,
            id,
            origin_mac,
            dest_mac,
            hop_count,
            max_hops,
            version,
            sequence_num,
            payload_size,
        })
    }
}

/// Control-frame payload for handshake steps and device-info broadcasts
/// (§3 "protocol payload area", §4.3).
#[derive(Clone, Debug)]
pub struct ConnectInfo {
    pub name: [u8; 32],
    pub peer_addr: Mac,
    pub visibility: Visibility,
    pub pwk: Option<Key>,
    pub lwk: Option<Key>,
}

const CONNECT_INFO_LEN: usize = 32 + 6 + 1 + KEY_LEN + KEY_LEN + 1 + 1;
const _: () = assert!(CONNECT_INFO_LEN <= PROTOCOL_LEN);

impl ConnectInfo {
    pub fn encode_into(&self, protocol: &mut [u8; PROTOCOL_LEN]) {
        let mut buffer = EncoderBuffer::new(protocol);
        buffer
            .encode_bytes(&self.name)
            .encode_bytes(&self.peer_addr)
            .encode_u8(self.visibility as u8)
            .encode_bytes(self.pwk.as_ref().map(Key::as_bytes).unwrap_or(&[0; KEY_LEN]))
            .encode_bytes(self.lwk.as_ref().map(Key::as_bytes).unwrap_or(&[0; KEY_LEN]))
            .encode_u8(self.pwk.is_some() as u8)
            .encode_u8(self.lwk.is_some() as u8);
    }

    pub fn decode(protocol: &[u8; PROTOCOL_LEN]) -> Result<Self, DecoderError> {
        let buffer = DecoderBuffer::new(&protocol[..CONNECT_INFO_LEN]);
        let (name, buffer): ([u8; 32], _) = buffer.decode()?;
        let (peer_addr, buffer): (Mac, _) = buffer.decode()?;
        let (visibility, buffer): (u8, _) = buffer.decode()?;
        let visibility = Visibility::from_u8(visibility)?;
        let (pwk_bytes, buffer): ([u8; KEY_LEN], _) = buffer.decode()?;
        let (lwk_bytes, buffer): ([u8; KEY_LEN], _) = buffer.decode()?;
        let (has_pwk, buffer): (u8, _) = buffer.decode()?;
        let (has_lwk, _buffer): (u8, _) = buffer.decode()?;

        Ok(Self {
            name,
            peer_addr,
            visibility,
            pwk: (has_pwk != 0).then(|| Key::from_bytes(pwk_bytes)),
            lwk: (has_lwk != 0).then(|| Key::from_bytes(lwk_bytes)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::generate_pwk;
    use crate::random::testing::Fixed;

    fn sample_frame() -> Frame {
        Frame {
            protocol: [0u8; PROTOCOL_LEN],
            package_type: PackageType::Single,
            id: 0,
            origin_mac: [1, 2, 3, 4, 5, 6],
            dest_mac: BROADCAST_MAC,
            hop_count: 0,
            max_hops: DEFAULT_MAX_HOPS,
            version: Version::CURRENT,
            sequence_num: 42,
            payload_size: 5,
        }
    }

    #[test]
    fn frame_round_trips_through_encode_decode() {
        let frame = sample_frame();
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded.id, frame.id);
        assert_eq!(decoded.origin_mac, frame.origin_mac);
        assert_eq!(decoded.dest_mac, frame.dest_mac);
        assert_eq!(decoded.sequence_num, frame.sequence_num);
        assert_eq!(decoded.version, frame.version);
        assert_eq!(decoded.payload_size, frame.payload_size);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let too_short = vec![0u8; FRAME_LEN - 1];
        assert_eq!(Frame::decode(&too_short).unwrap_err(), DecoderError::UnexpectedEof);
    }

    #[test]
    fn control_frame_is_identified_by_sentinel_id() {
        let mut frame = sample_frame();
        frame.id = CONTROL_ID;
        assert!(frame.is_control());
        frame.id = 0;
        assert!(!frame.is_control());
    }

    #[test]
    fn connect_info_round_trips_through_protocol_area() {
        let mut gen = Fixed::default();
        let pwk = generate_pwk(&mut gen);
        let info = ConnectInfo {
            name: [b'a'; 32],
            peer_addr: [9, 9, 9, 9, 9, 9],
            visibility: Visibility::Private,
            pwk: Some(pwk),
            lwk: None,
        };
        let mut protocol = [0u8; PROTOCOL_LEN];
        info.encode_into(&mut protocol);
        let decoded = ConnectInfo::decode(&protocol).unwrap();
        assert_eq!(decoded.name, info.name);
        assert_eq!(decoded.peer_addr, info.peer_addr);
        assert_eq!(decoded.visibility, Visibility::Private);
        assert!(decoded.pwk.is_some());
        assert!(decoded.lwk.is_none());
    }
}
