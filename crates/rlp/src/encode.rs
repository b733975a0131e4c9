use bytes::BufMut;
use ethereum_types::{H160, H256, U256};

use super::constants::{RLP_EMPTY_LIST, RLP_NULL};

pub fn encode<T: RLPEncode>(value: T) -> Vec<u8> {
    let mut buf = Vec::new();
    value.encode(&mut buf);
    buf
}

/// Writes the RLP list-prefix for a payload of `payload_len` bytes.
/// Callers append the already-encoded payload right after.
pub fn encode_length(payload_len: usize, buf: &mut Vec<u8>) {
    if payload_len < 56 {
        buf.push(RLP_EMPTY_LIST + payload_len as u8);
    } else {
        let be = payload_len.to_be_bytes();
        let start = be.iter().position(|&b| b != 0).unwrap_or(be.len() - 1);
        let len_bytes = &be[start..];
        buf.push(0xf7 + len_bytes.len() as u8);
        buf.extend_from_slice(len_bytes);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ByteCounter {
    count: usize,
}

unsafe impl BufMut for ByteCounter {
    fn remaining_mut(&self) -> usize {
        usize::MAX - self.count
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        self.count += cnt;
    }

    fn chunk_mut(&mut self) -> &mut bytes::buf::UninitSlice {
        unreachable!("ByteCounter only counts, it never hands out a writable chunk")
    }

    fn put_slice(&mut self, src: &[u8]) {
        self.count += src.len();
    }

    fn put_bytes(&mut self, _val: u8, cnt: usize) {
        self.count += cnt;
    }
}

pub trait RLPEncode {
    fn encode(&self, buf: &mut dyn BufMut);

    fn length(&self) -> usize {
        let mut counter = ByteCounter::default();
        self.encode(&mut counter);
        counter.count
    }

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

impl RLPEncode for bool {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u8(if *self { 0x01 } else { RLP_NULL });
    }

    fn length(&self) -> usize {
        1
    }
}

impl RLPEncode for () {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u8(RLP_NULL);
    }

    fn length(&self) -> usize {
        1
    }
}

fn impl_encode<const N: usize>(value_be: [u8; N], buf: &mut dyn BufMut) {
    let mut i = 0;
    while i < N && value_be[i] == 0 {
        i += 1;
    }
    if i == N {
        buf.put_u8(RLP_NULL);
        return;
    }
    let first = value_be[i];
    if i == N - 1 && first <= 0x7f {
        buf.put_u8(first);
        return;
    }
    let len = N - i;
    buf.put_u8(RLP_NULL + len as u8);
    buf.put_slice(&value_be[i..]);
}

macro_rules! impl_rlp_encode_for_uint {
    ($t:ty) => {
        impl RLPEncode for $t {
            fn encode(&self, buf: &mut dyn BufMut) {
                impl_encode(self.to_be_bytes(), buf);
            }
        }
    };
}

impl_rlp_encode_for_uint!(u8);
impl_rlp_encode_for_uint!(u16);
impl_rlp_encode_for_uint!(u32);
impl_rlp_encode_for_uint!(u64);
impl_rlp_encode_for_uint!(u128);
impl_rlp_encode_for_uint!(usize);

impl RLPEncode for [u8] {
    fn encode(&self, buf: &mut dyn BufMut) {
        if self.len() == 1 && self[0] < RLP_NULL {
            buf.put_u8(self[0]);
            return;
        }
        let len = self.len();
        if len < 56 {
            buf.put_u8(RLP_NULL + len as u8);
        } else {
            let be = len.to_be_bytes();
            let start = be.iter().position(|&b| b != 0).unwrap();
            buf.put_u8(0xb7 + (be.len() - start) as u8);
            buf.put_slice(&be[start..]);
        }
        buf.put_slice(self);
    }
}

impl<const N: usize> RLPEncode for [u8; N] {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_slice().encode(buf)
    }
}

impl RLPEncode for Vec<u8> {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_slice().encode(buf)
    }
}

impl RLPEncode for str {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for String {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl<T: RLPEncode> RLPEncode for Vec<T> {
    fn encode(&self, buf: &mut dyn BufMut) {
        let mut payload = Vec::new();
        for item in self {
            item.encode(&mut payload);
        }
        encode_length(payload.len(), buf);
        buf.put_slice(&payload);
    }
}

impl<T: RLPEncode> RLPEncode for &T {
    fn encode(&self, buf: &mut dyn BufMut) {
        (*self).encode(buf)
    }
}

impl RLPEncode for H160 {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.0.encode(buf)
    }
}

impl RLPEncode for H256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.0.encode(buf)
    }
}

impl RLPEncode for U256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        let leading_zero_bytes = (self.leading_zeros() / 8) as usize;
        let bytes = self.to_big_endian();
        bytes[leading_zero_bytes.min(32)..].encode(buf)
    }
}
