//! Bitcoin-style canonical varint encoding: 1/3/5/9-byte forms, each the
//! smallest form that can hold the value. Decoding rejects any encoding that
//! could have been written in a shorter form, and any value above
//! [`crate::constants::VARINT_MAX_SIZE`].

use bytes::{Buf, BufMut};

use crate::constants::VARINT_MAX_SIZE;
use crate::error::CodecError;

pub fn encoded_len(value: u64) -> usize {
    if value < 0xfd {
        1
    } else if value <= 0xffff {
        3
    } else if value <= 0xffff_ffff {
        5
    } else {
        9
    }
}

pub fn write(buf: &mut impl BufMut, value: u64) {
    if value < 0xfd {
        buf.put_u8(value as u8);
    } else if value <= 0xffff {
        buf.put_u8(0xfd);
        buf.put_u16_le(value as u16);
    } else if value <= 0xffff_ffff {
        buf.put_u8(0xfe);
        buf.put_u32_le(value as u32);
    } else {
        buf.put_u8(0xff);
        buf.put_u64_le(value);
    }
}

/// Reads a varint, enforcing canonical form and the crate-wide `MAX_SIZE`
/// cap. Returns the decoded value; never advances `buf` past what it reads.
pub fn read(buf: &mut impl Buf) -> Result<u64, CodecError> {
    if !buf.has_remaining() {
        return Err(CodecError::Truncated("varint"));
    }
    let first = buf.get_u8();
    let value = match first {
        0..=0xfc => first as u64,
        0xfd => {
            if buf.remaining() < 2 {
                return Err(CodecError::Truncated("varint"));
            }
            let v = buf.get_u16_le() as u64;
            if v < 0xfd {
                return Err(CodecError::NonCanonicalVarint);
            }
            v
        }
        0xfe => {
            if buf.remaining() < 4 {
                return Err(CodecError::Truncated("varint"));
            }
            let v = buf.get_u32_le() as u64;
            if v <= 0xffff {
                return Err(CodecError::NonCanonicalVarint);
            }
            v
        }
        0xff => {
            if buf.remaining() < 8 {
                return Err(CodecError::Truncated("varint"));
            }
            let v = buf.get_u64_le();
            if v <= 0xffff_ffff {
                return Err(CodecError::NonCanonicalVarint);
            }
            v
        }
    };
    if value > VARINT_MAX_SIZE {
        return Err(CodecError::VarintTooLarge(value));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn roundtrip(value: u64) {
        let mut buf = BytesMut::new();
        write(&mut buf, value);
        assert_eq!(buf.len(), encoded_len(value));
        let mut reader = &buf[..];
        assert_eq!(read(&mut reader).unwrap(), value);
    }

    #[test]
    fn round_trips_boundary_values() {
        for v in [0, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, 0x1_0000_0000] {
            roundtrip(v);
        }
    }

    #[test]
    fn rejects_non_canonical_3_byte_form() {
        let buf = [0xfdu8, 0x01, 0x00]; // encodes 1, should be 1-byte form
        let mut reader = &buf[..];
        assert!(matches!(
            read(&mut reader),
            Err(CodecError::NonCanonicalVarint)
        ));
    }

    #[test]
    fn rejects_value_above_max_size() {
        let mut buf = BytesMut::new();
        write(&mut buf, VARINT_MAX_SIZE + 1);
        let mut reader = &buf[..];
        assert!(matches!(
            read(&mut reader),
            Err(CodecError::VarintTooLarge(_))
        ));
    }
}
