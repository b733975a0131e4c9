use ethereum_types::{H160, H256, U256};

use super::constants::RLP_EMPTY_LIST;
use super::error::RLPDecodeError;

const MAX_RLP_BYTES: usize = 1024 * 1024 * 1024;

pub trait RLPDecode: Sized {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError>;

    fn decode(rlp: &[u8]) -> Result<Self, RLPDecodeError> {
        let (decoded, remaining) = Self::decode_unfinished(rlp)?;
        if !remaining.is_empty() {
            return Err(RLPDecodeError::invalid_length());
        }
        Ok(decoded)
    }
}

/// Splits the next RLP item off `data`, returning `(is_list, payload, remaining)`.
pub fn decode_rlp_item(data: &[u8]) -> Result<(bool, &[u8], &[u8]), RLPDecodeError> {
    if data.is_empty() {
        return Err(RLPDecodeError::invalid_length());
    }
    let first_byte = data[0];
    match first_byte {
        0..=0x7F => Ok((false, &data[..1], &data[1..])),
        0x80..=0xB7 => {
            let length = (first_byte - 0x80) as usize;
            if data.len() < length + 1 {
                return Err(RLPDecodeError::invalid_length());
            }
            Ok((false, &data[1..length + 1], &data[length + 1..]))
        }
        0xB8..=0xBF => {
            let length_of_length = (first_byte - 0xB7) as usize;
            if data.len() < length_of_length + 1 {
                return Err(RLPDecodeError::invalid_length());
            }
            let length = usize::from_be_bytes(static_left_pad(&data[1..length_of_length + 1])?);
            if length > MAX_RLP_BYTES || data.len() < length_of_length + length + 1 {
                return Err(RLPDecodeError::invalid_length());
            }
            Ok((
                false,
                &data[length_of_length + 1..length_of_length + length + 1],
                &data[length_of_length + length + 1..],
            ))
        }
        RLP_EMPTY_LIST..=0xF7 => {
            let length = (first_byte - RLP_EMPTY_LIST) as usize;
            if data.len() < length + 1 {
                return Err(RLPDecodeError::invalid_length());
            }
            Ok((true, &data[1..length + 1], &data[length + 1..]))
        }
        0xF8..=0xFF => {
            let list_length = (first_byte - 0xF7) as usize;
            if data.len() < list_length + 1 {
                return Err(RLPDecodeError::invalid_length());
            }
            let payload_length = usize::from_be_bytes(static_left_pad(&data[1..list_length + 1])?);
            if payload_length > MAX_RLP_BYTES || data.len() < list_length + payload_length + 1 {
                return Err(RLPDecodeError::invalid_length());
            }
            Ok((
                true,
                &data[list_length + 1..list_length + payload_length + 1],
                &data[list_length + payload_length + 1..],
            ))
        }
    }
}

/// Like [`decode_rlp_item`] but keeps the item's own length prefix attached.
pub fn get_item_with_prefix(data: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    if data.is_empty() {
        return Err(RLPDecodeError::invalid_length());
    }
    let first_byte = data[0];
    let split_at = match first_byte {
        0..=0x7F => 1,
        0x80..=0xB7 => (first_byte - 0x80) as usize + 1,
        0xB8..=0xBF => {
            let length_of_length = (first_byte - 0xB7) as usize;
            if data.len() < length_of_length + 1 {
                return Err(RLPDecodeError::invalid_length());
            }
            let length = usize::from_be_bytes(static_left_pad(&data[1..length_of_length + 1])?);
            length_of_length + length + 1
        }
        RLP_EMPTY_LIST..=0xF7 => (first_byte - RLP_EMPTY_LIST) as usize + 1,
        0xF8..=0xFF => {
            let list_length = (first_byte - 0xF7) as usize;
            if data.len() < list_length + 1 {
                return Err(RLPDecodeError::invalid_length());
            }
            let payload_length = usize::from_be_bytes(static_left_pad(&data[1..list_length + 1])?);
            list_length + payload_length + 1
        }
    };
    if data.len() < split_at {
        return Err(RLPDecodeError::invalid_length());
    }
    Ok((&data[..split_at], &data[split_at..]))
}

pub fn decode_bytes(data: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    let (is_list, payload, rest) = decode_rlp_item(data)?;
    if is_list {
        return Err(RLPDecodeError::unexpected_list());
    }
    Ok((payload, rest))
}

#[inline]
pub fn static_left_pad<const N: usize>(data: &[u8]) -> Result<[u8; N], RLPDecodeError> {
    let mut result = [0u8; N];
    if data.is_empty() {
        return Ok(result);
    }
    if data[0] == 0 {
        return Err(RLPDecodeError::malformed_data());
    }
    if data.len() > N {
        return Err(RLPDecodeError::invalid_length());
    }
    let start = N - data.len();
    result[start..].copy_from_slice(data);
    Ok(result)
}

impl RLPDecode for bool {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let first = *rlp.first().ok_or(RLPDecodeError::invalid_length())?;
        match first {
            0x80 => Ok((false, &rlp[1..])),
            0x01 => Ok((true, &rlp[1..])),
            b => Err(RLPDecodeError::malformed_boolean(b)),
        }
    }
}

macro_rules! impl_rlp_decode_for_uint {
    ($t:ty, $n:expr) => {
        impl RLPDecode for $t {
            fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
                let (bytes, rest) = decode_bytes(rlp)?;
                Ok((<$t>::from_be_bytes(static_left_pad::<$n>(bytes)?), rest))
            }
        }
    };
}

impl_rlp_decode_for_uint!(u8, 1);
impl_rlp_decode_for_uint!(u16, 2);
impl_rlp_decode_for_uint!(u32, 4);
impl_rlp_decode_for_uint!(u64, 8);
impl_rlp_decode_for_uint!(u128, 16);
impl_rlp_decode_for_uint!(usize, 8);

impl<const N: usize> RLPDecode for [u8; N] {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        if bytes.len() != N {
            return Err(RLPDecodeError::invalid_length());
        }
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok((out, rest))
    }
}

impl RLPDecode for Vec<u8> {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        Ok((bytes.to_vec(), rest))
    }
}

impl RLPDecode for String {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let s = String::from_utf8(bytes.to_vec()).map_err(|_| RLPDecodeError::malformed_data())?;
        Ok((s, rest))
    }
}

impl<T: RLPDecode> RLPDecode for Vec<T> {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (is_list, mut payload, rest) = decode_rlp_item(rlp)?;
        if !is_list {
            return Err(RLPDecodeError::unexpected_string());
        }
        let mut result = Vec::new();
        while !payload.is_empty() {
            let (item, remaining) = T::decode_unfinished(payload)?;
            result.push(item);
            payload = remaining;
        }
        Ok((result, rest))
    }
}

impl RLPDecode for H160 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        if bytes.len() != 20 {
            return Err(RLPDecodeError::invalid_length());
        }
        Ok((H160::from_slice(bytes), rest))
    }
}

impl RLPDecode for H256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        if bytes.len() != 32 {
            return Err(RLPDecodeError::invalid_length());
        }
        Ok((H256::from_slice(bytes), rest))
    }
}

impl RLPDecode for U256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        if bytes.len() > 32 {
            return Err(RLPDecodeError::invalid_length());
        }
        let padded = static_left_pad::<32>(bytes)?;
        Ok((U256::from_big_endian(&padded), rest))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decode_u64_roundtrip() {
        use crate::encode::RLPEncode;
        for v in [0u64, 1, 127, 128, 255, 1024, u64::MAX] {
            let encoded = v.encode_to_vec();
            assert_eq!(u64::decode(&encoded).unwrap(), v);
        }
    }

    #[test]
    fn decode_bytes_short_string() {
        let encoded = [0x83, b'd', b'o', b'g'];
        let (bytes, rest) = decode_bytes(&encoded).unwrap();
        assert_eq!(bytes, b"dog");
        assert!(rest.is_empty());
    }
}
