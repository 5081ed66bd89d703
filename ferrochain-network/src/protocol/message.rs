//! Typed protocol messages and the frame codec that reads/writes them.
//!
//! Frame layout: `[magic:u32 LE | command:12B NUL-padded ASCII | length:u32 LE
//! | checksum:4B] · payload[length]`. The checksum is the first four bytes of
//! double-SHA-256 over the payload. Decoding never allocates a buffer sized
//! directly from an untrusted count: container reads grow a batch at a time.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};
use tokio_util::codec::{Decoder, Encoder};

use ferrochain_chain::header::{BlockHeader, Hash, HEADER_SIZE};

use super::types::{InventoryType, InventoryVector, NetworkAddress, TimestampedAddress};
use super::varint;
use crate::constants::{
    commands, COMMAND_SIZE, DEFAULT_RECV_FLOOD_SIZE, MAX_HEADERS_RESULTS,
    MAX_INV_SIZE, MAX_LOCATOR_SZ, MAX_PROTOCOL_MESSAGE_LENGTH, MAX_USER_AGENT_LENGTH,
    MAX_VECTOR_ALLOCATE_BYTES, MESSAGE_HEADER_SIZE,
};
use crate::error::CodecError;

#[derive(Clone, Debug, PartialEq)]
pub struct VersionPayload {
    pub version: i32,
    pub services: u64,
    pub timestamp: i64,
    pub addr_recv: NetworkAddress,
    pub addr_from: NetworkAddress,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Version(VersionPayload),
    Verack,
    Ping { nonce: u64 },
    Pong { nonce: u64 },
    Addr(Vec<TimestampedAddress>),
    GetAddr,
    Inv(Vec<InventoryVector>),
    GetHeaders { version: u32, locator: Vec<Hash>, stop_hash: Hash },
    Headers(Vec<BlockHeader>),
    /// A well-framed message (valid magic/command-field/length/checksum)
    /// whose command isn't one this crate knows how to interpret. Distinct
    /// from a `CodecError`: an unrecognized command is not
    /// itself fatal — the peer layer rate-limits and only disconnects after
    /// repeated occurrences in one window.
    Unknown(String),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => commands::VERSION,
            Message::Verack => commands::VERACK,
            Message::Ping { .. } => commands::PING,
            Message::Pong { .. } => commands::PONG,
            Message::Addr(_) => commands::ADDR,
            Message::GetAddr => commands::GETADDR,
            Message::Inv(_) => commands::INV,
            Message::GetHeaders { .. } => commands::GETHEADERS,
            Message::Headers(_) => commands::HEADERS,
            Message::Unknown(_) => "unknown",
        }
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        match self {
            Message::Version(v) => {
                buf.put_i32_le(v.version);
                buf.put_u64_le(v.services);
                buf.put_i64_le(v.timestamp);
                write_network_address(buf, &v.addr_recv);
                write_network_address(buf, &v.addr_from);
                buf.put_u64_le(v.nonce);
                write_string(buf, &v.user_agent);
                buf.put_i32_le(v.start_height);
            }
            Message::Verack | Message::GetAddr => {}
            Message::Unknown(_) => {}
            Message::Ping { nonce } | Message::Pong { nonce } => {
                buf.put_u64_le(*nonce);
            }
            Message::Addr(addrs) => {
                varint::write(buf, addrs.len() as u64);
                for a in addrs {
                    buf.put_u32_le(a.timestamp);
                    write_network_address(buf, &a.address);
                }
            }
            Message::Inv(items) => {
                varint::write(buf, items.len() as u64);
                for item in items {
                    buf.put_u32_le(item.kind as u32);
                    buf.put_slice(&item.hash);
                }
            }
            Message::GetHeaders {
                version,
                locator,
                stop_hash,
            } => {
                buf.put_u32_le(*version);
                varint::write(buf, locator.len() as u64);
                for h in locator {
                    buf.put_slice(&h.0);
                }
                buf.put_slice(&stop_hash.0);
            }
            Message::Headers(headers) => {
                varint::write(buf, headers.len() as u64);
                for h in headers {
                    buf.put_slice(&h.serialize());
                }
            }
        }
    }

    fn decode_payload(command: &str, payload: &[u8]) -> Result<Message, CodecError> {
        let mut buf = payload;
        match command {
            commands::VERSION => {
                let version = read_i32(&mut buf)?;
                let services = read_u64(&mut buf)?;
                let timestamp = read_i64(&mut buf)?;
                let addr_recv = read_network_address(&mut buf)?;
                let addr_from = read_network_address(&mut buf)?;
                let nonce = read_u64(&mut buf)?;
                let user_agent = read_string(&mut buf, MAX_USER_AGENT_LENGTH)?;
                let start_height = read_i32(&mut buf)?;
                Ok(Message::Version(VersionPayload {
                    version,
                    services,
                    timestamp,
                    addr_recv,
                    addr_from,
                    nonce,
                    user_agent,
                    start_height,
                }))
            }
            commands::VERACK => Ok(Message::Verack),
            commands::GETADDR => Ok(Message::GetAddr),
            commands::PING => Ok(Message::Ping {
                nonce: read_u64(&mut buf)?,
            }),
            commands::PONG => Ok(Message::Pong {
                nonce: read_u64(&mut buf)?,
            }),
            commands::ADDR => {
                // No `check_count` here: unlike the other container messages,
                // an over-policy-size ADDR is not codec-fatal. The payload
                // is already bounded by `MAX_PROTOCOL_MESSAGE_LENGTH`, so a
                // lying `count` just costs a `Truncated` error once `buf`
                // runs out; truncation to the policy limit and the
                // oversized-message penalty are applied by the ADDR handler.
                let count = varint::read(&mut buf)?;
                let elem_size = 4 + 8 + 16 + 2;
                let mut out = batched_vec(count, elem_size);
                for _ in 0..count {
                    let timestamp = read_u32(&mut buf)?;
                    let address = read_network_address(&mut buf)?;
                    out.push(TimestampedAddress { timestamp, address });
                }
                Ok(Message::Addr(out))
            }
            commands::INV => {
                let count = varint::read(&mut buf)?;
                check_count(count, MAX_INV_SIZE, "inv")?;
                let mut out = batched_vec(count, 36);
                for _ in 0..count {
                    let kind_raw = read_u32(&mut buf)?;
                    let kind = InventoryType::from_u32(kind_raw)
                        .ok_or(CodecError::Truncated("inv type"))?;
                    let hash = read_array32(&mut buf)?;
                    out.push(InventoryVector { kind, hash });
                }
                Ok(Message::Inv(out))
            }
            commands::GETHEADERS => {
                let version = read_u32(&mut buf)?;
                let count = varint::read(&mut buf)?;
                check_count(count, MAX_LOCATOR_SZ, "locator")?;
                let mut locator = batched_vec(count, 32);
                for _ in 0..count {
                    locator.push(Hash(read_array32(&mut buf)?));
                }
                let stop_hash = Hash(read_array32(&mut buf)?);
                Ok(Message::GetHeaders {
                    version,
                    locator,
                    stop_hash,
                })
            }
            commands::HEADERS => {
                let count = varint::read(&mut buf)?;
                check_count(count, MAX_HEADERS_RESULTS, "headers")?;
                let mut out = batched_vec(count, HEADER_SIZE);
                for _ in 0..count {
                    if buf.len() < HEADER_SIZE {
                        return Err(CodecError::Truncated("header"));
                    }
                    let (chunk, rest) = buf.split_at(HEADER_SIZE);
                    out.push(BlockHeader::deserialize(chunk).map_err(|_| CodecError::Truncated("header"))?);
                    buf = rest;
                }
                Ok(Message::Headers(out))
            }
            other => Ok(Message::Unknown(other.to_string())),
        }
    }
}

/// Reserves storage a batch at a time instead of trusting `count` directly:
/// `reserve(count * elem_size)` on a wire-supplied count would let a peer
/// force a multi-gigabyte allocation before any bytes are even validated.
fn batched_vec<T>(count: u64, elem_size: usize) -> Vec<T> {
    let elem_size = elem_size.max(1);
    let batch_elems = (MAX_VECTOR_ALLOCATE_BYTES / elem_size).max(1) as u64;
    let initial = count.min(batch_elems) as usize;
    Vec::with_capacity(initial)
}

fn check_count(count: u64, bound: u64, what: &'static str) -> Result<(), CodecError> {
    if count > bound {
        return Err(CodecError::CountExceedsBound { what, count, bound });
    }
    Ok(())
}

fn write_string(buf: &mut BytesMut, s: &str) {
    varint::write(buf, s.len() as u64);
    buf.put_slice(s.as_bytes());
}

fn write_network_address(buf: &mut BytesMut, addr: &NetworkAddress) {
    buf.put_u64_le(addr.services);
    buf.put_slice(&addr.ip);
    buf.put_u16(addr.port); // big-endian
}

fn read_network_address(buf: &mut &[u8]) -> Result<NetworkAddress, CodecError> {
    let services = read_u64(buf)?;
    if buf.len() < 16 {
        return Err(CodecError::Truncated("network_address.ip"));
    }
    let mut ip = [0u8; 16];
    ip.copy_from_slice(&buf[..16]);
    *buf = &buf[16..];
    let port = read_u16_be(buf)?;
    Ok(NetworkAddress { services, ip, port })
}

fn read_string(buf: &mut &[u8], max_length: usize) -> Result<String, CodecError> {
    let len = varint::read(buf)?;
    if len as usize > max_length {
        return Err(CodecError::StringTooLong { max: max_length });
    }
    if (len as usize) > buf.len() {
        return Err(CodecError::Truncated("string"));
    }
    let (chunk, rest) = buf.split_at(len as usize);
    let s = String::from_utf8_lossy(chunk).into_owned();
    *buf = rest;
    Ok(s)
}

fn read_array32(buf: &mut &[u8]) -> Result<[u8; 32], CodecError> {
    if buf.len() < 32 {
        return Err(CodecError::Truncated("hash"));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&buf[..32]);
    *buf = &buf[32..];
    Ok(out)
}

fn read_u16_be(buf: &mut &[u8]) -> Result<u16, CodecError> {
    if buf.len() < 2 {
        return Err(CodecError::Truncated("u16"));
    }
    let v = u16::from_be_bytes([buf[0], buf[1]]);
    *buf = &buf[2..];
    Ok(v)
}

fn read_u32(buf: &mut &[u8]) -> Result<u32, CodecError> {
    if buf.len() < 4 {
        return Err(CodecError::Truncated("u32"));
    }
    let v = u32::from_le_bytes(buf[..4].try_into().unwrap());
    *buf = &buf[4..];
    Ok(v)
}

fn read_i32(buf: &mut &[u8]) -> Result<i32, CodecError> {
    read_u32(buf).map(|v| v as i32)
}

fn read_u64(buf: &mut &[u8]) -> Result<u64, CodecError> {
    if buf.len() < 8 {
        return Err(CodecError::Truncated("u64"));
    }
    let v = u64::from_le_bytes(buf[..8].try_into().unwrap());
    *buf = &buf[8..];
    Ok(v)
}

fn read_i64(buf: &mut &[u8]) -> Result<i64, CodecError> {
    read_u64(buf).map(|v| v as i64)
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    let once = Sha256::digest(data);
    let twice = Sha256::digest(once);
    let mut out = [0u8; 32];
    out.copy_from_slice(&twice);
    out
}

fn pack_command(command: &str) -> [u8; COMMAND_SIZE] {
    let mut out = [0u8; COMMAND_SIZE];
    let bytes = command.as_bytes();
    out[..bytes.len()].copy_from_slice(bytes);
    out
}

fn parse_command(raw: &[u8; COMMAND_SIZE]) -> Result<String, CodecError> {
    let nul_pos = raw.iter().position(|&b| b == 0);
    let nul_pos = match nul_pos {
        Some(p) => p,
        None => return Err(CodecError::BadCommand),
    };
    for &b in &raw[..nul_pos] {
        if !(0x20..=0x7e).contains(&b) {
            return Err(CodecError::BadCommand);
        }
    }
    if raw[nul_pos..].iter().any(|&b| b != 0) {
        return Err(CodecError::BadCommand);
    }
    Ok(String::from_utf8_lossy(&raw[..nul_pos]).into_owned())
}

/// A commands-that-permit-an-empty-payload allowlist; every other command
/// with a zero-length payload is a fatal framing error.
fn empty_payload_allowed(command: &str) -> bool {
    matches!(command, commands::VERACK | commands::GETADDR)
}

pub struct FrameCodec {
    magic: u32,
}

impl FrameCodec {
    pub fn new(magic: u32) -> Self {
        FrameCodec { magic }
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        if src.len() > DEFAULT_RECV_FLOOD_SIZE {
            return Err(CodecError::RecvFlood(DEFAULT_RECV_FLOOD_SIZE));
        }
        if src.len() < MESSAGE_HEADER_SIZE {
            return Ok(None);
        }

        let magic = u32::from_le_bytes(src[0..4].try_into().unwrap());
        if magic != self.magic {
            return Err(CodecError::WrongMagic {
                expected: self.magic,
                found: magic,
            });
        }

        let mut command_raw = [0u8; COMMAND_SIZE];
        command_raw.copy_from_slice(&src[4..4 + COMMAND_SIZE]);
        let command = parse_command(&command_raw)?;

        let length_offset = 4 + COMMAND_SIZE;
        let length = u32::from_le_bytes(
            src[length_offset..length_offset + 4].try_into().unwrap(),
        );
        if length > MAX_PROTOCOL_MESSAGE_LENGTH {
            return Err(CodecError::OversizedFrame(length));
        }

        let checksum_offset = length_offset + 4;
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&src[checksum_offset..checksum_offset + 4]);

        let total_len = MESSAGE_HEADER_SIZE + length as usize;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        if length == 0 && !empty_payload_allowed(&command) {
            return Err(CodecError::UnexpectedEmptyPayload(command));
        }

        let frame = src.split_to(total_len);
        let payload = &frame[MESSAGE_HEADER_SIZE..];

        let actual_checksum = double_sha256(payload);
        if actual_checksum[..4] != checksum {
            return Err(CodecError::BadChecksum);
        }

        Message::decode_payload(&command, payload).map(Some)
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        let mut payload = BytesMut::new();
        item.encode_payload(&mut payload);
        let payload: Bytes = payload.freeze();

        if payload.len() as u64 > MAX_PROTOCOL_MESSAGE_LENGTH as u64 {
            return Err(CodecError::OversizedFrame(payload.len() as u32));
        }

        let checksum = double_sha256(&payload);
        dst.put_u32_le(self.magic);
        dst.put_slice(&pack_command(item.command()));
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(&checksum[..4]);
        dst.put_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> FrameCodec {
        FrameCodec::new(0x4b7c_2e91)
    }

    #[test]
    fn round_trips_ping() {
        let mut buf = BytesMut::new();
        let mut c = codec();
        c.encode(Message::Ping { nonce: 42 }, &mut buf).unwrap();
        let msg = c.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg, Message::Ping { nonce: 42 });
    }

    #[test]
    fn round_trips_verack_empty_payload() {
        let mut buf = BytesMut::new();
        let mut c = codec();
        c.encode(Message::Verack, &mut buf).unwrap();
        let msg = c.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg, Message::Verack);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut buf = BytesMut::new();
        let mut c = codec();
        c.encode(Message::GetAddr, &mut buf).unwrap();
        let mut other = FrameCodec::new(0x1234_5678);
        assert!(matches!(
            other.decode(&mut buf),
            Err(CodecError::WrongMagic { .. })
        ));
    }

    #[test]
    fn decodes_addr_batch_past_policy_size() {
        // 1001 entries is over the MAX_ADDR_SIZE policy cap but still a
        // canonical varint; the codec decodes it in full and leaves
        // truncation + penalty to the ADDR handler.
        let mut payload = BytesMut::new();
        varint::write(&mut payload, 1001);
        for i in 0..1001u32 {
            payload.put_u32_le(i);
            payload.put_u64_le(0);
            payload.put_slice(&[0u8; 16]);
            payload.put_u16(8333);
        }
        let checksum = double_sha256(&payload);
        let mut frame = BytesMut::new();
        frame.put_u32_le(0x4b7c_2e91);
        frame.put_slice(&pack_command(commands::ADDR));
        frame.put_u32_le(payload.len() as u32);
        frame.put_slice(&checksum[..4]);
        frame.put_slice(&payload);

        let mut c = codec();
        match c.decode(&mut frame).unwrap().unwrap() {
            Message::Addr(addrs) => assert_eq!(addrs.len(), 1001),
            other => panic!("expected Addr, got {other:?}"),
        }
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(0x4b7c_2e91);
        let mut c = codec();
        assert!(c.decode(&mut buf).unwrap().is_none());
    }
}
