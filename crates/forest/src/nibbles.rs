use std::cmp;

use archivetrie_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::Decoder,
};

/// A path through the trie, expressed as 4-bit nibbles (0..=15), with an
/// optional trailing 16 "leaf flag" marking a terminal path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Nibbles {
    data: Vec<u8>,
}

impl Nibbles {
    pub const fn from_hex(hex: Vec<u8>) -> Self {
        Self { data: hex }
    }

    /// Splits a 20/32-byte key into nibbles and appends the leaf flag.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::from_raw(bytes, true)
    }

    pub fn from_raw(bytes: &[u8], is_leaf: bool) -> Self {
        let mut data: Vec<u8> = bytes
            .iter()
            .flat_map(|byte| [(byte >> 4) & 0x0F, byte & 0x0F])
            .collect();
        if is_leaf {
            data.push(16);
        }
        Self { data }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// If `prefix` is a prefix of `self`, advances past it and returns true.
    pub fn skip_prefix(&mut self, prefix: &Nibbles) -> bool {
        if self.len() >= prefix.len() && self.data[..prefix.len()] == prefix.data[..] {
            self.data = self.data[prefix.len()..].to_vec();
            true
        } else {
            false
        }
    }

    pub fn compare_prefix(&self, prefix: &Nibbles) -> cmp::Ordering {
        if self.len() > prefix.len() {
            self.data[..prefix.len()].cmp(&prefix.data)
        } else {
            self.data[..].cmp(&prefix.data[..self.len()])
        }
    }

    /// Number of leading nibbles shared with `other`.
    pub fn count_prefix(&self, other: &Nibbles) -> usize {
        self.data
            .iter()
            .zip(other.data.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<u8> {
        (!self.is_empty()).then(|| self.data.remove(0))
    }

    pub fn next_choice(&mut self) -> Option<usize> {
        self.next().filter(|choice| *choice < 16).map(usize::from)
    }

    pub fn offset(&self, offset: usize) -> Nibbles {
        self.slice(offset, self.len())
    }

    pub fn slice(&self, start: usize, end: usize) -> Nibbles {
        Nibbles::from_hex(self.data[start..end].to_vec())
    }

    pub fn extend(&mut self, other: &Nibbles) {
        self.data.extend_from_slice(&other.data);
    }

    pub fn at(&self, i: usize) -> usize {
        self.data[i] as usize
    }

    pub fn prepend(&mut self, nibble: u8) {
        self.data.insert(0, nibble);
    }

    pub fn append(&mut self, nibble: u8) {
        self.data.push(nibble);
    }

    /// Compact (hex-prefix) encoding: node-type and parity folded into the
    /// first nibble, matching the Ethereum reference encoding.
    pub fn encode_compact(&self) -> Vec<u8> {
        let mut compact = vec![];
        let is_leaf = self.is_leaf();
        let mut hex: &[u8] = if is_leaf {
            &self.data[..self.data.len() - 1]
        } else {
            &self.data[..]
        };
        let v = if hex.len() % 2 == 1 {
            let v = 0x10 + hex[0];
            hex = &hex[1..];
            v
        } else {
            0x00
        };
        compact.push(v + if is_leaf { 0x20 } else { 0x00 });
        for i in 0..(hex.len() / 2) {
            compact.push((hex[i * 2] << 4) | hex[i * 2 + 1]);
        }
        compact
    }

    pub fn decode_compact(compact: &[u8]) -> Self {
        Self::from_hex(compact_to_hex(compact))
    }

    pub fn is_leaf(&self) -> bool {
        !self.is_empty() && self.data[self.data.len() - 1] == 16
    }

    /// Recombines nibbles into bytes, trimming the leaf flag if present.
    pub fn to_bytes(&self) -> Vec<u8> {
        let data = if !self.is_empty() && self.is_leaf() {
            &self.data[..self.len() - 1]
        } else {
            &self.data[..]
        };
        data.chunks(2)
            .map(|chunk| match chunk.len() {
                1 => chunk[0] << 4,
                _ => (chunk[0] << 4) | chunk[1],
            })
            .collect()
    }

    pub fn concat(&self, other: &Nibbles) -> Nibbles {
        Nibbles {
            data: [&self.data[..], &other.data[..]].concat(),
        }
    }
}

impl AsRef<[u8]> for Nibbles {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl RLPEncode for Nibbles {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        self.data.encode(buf)
    }
}

impl RLPDecode for Nibbles {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (data, decoder) = decoder.decode_field("data")?;
        Ok((Self { data }, decoder.finish()?))
    }
}

// Ported from https://github.com/ethereum/go-ethereum/blob/master/trie/encoding.go
fn compact_to_hex(compact: &[u8]) -> Vec<u8> {
    if compact.is_empty() {
        return vec![];
    }
    let mut base = keybytes_to_hex(compact);
    if base[0] < 2 {
        base = base[..base.len() - 1].to_vec();
    }
    let chop = 2 - (base[0] & 1) as usize;
    base[chop..].to_vec()
}

fn keybytes_to_hex(keybytes: &[u8]) -> Vec<u8> {
    let l = keybytes.len() * 2 + 1;
    let mut nibbles = vec![0; l];
    for (i, b) in keybytes.iter().enumerate() {
        nibbles[i * 2] = b / 16;
        nibbles[i * 2 + 1] = b % 16;
    }
    nibbles[l - 1] = 16;
    nibbles
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn skip_prefix_true() {
        let mut n = Nibbles::from_hex(vec![1, 2, 3, 4]);
        assert!(n.skip_prefix(&Nibbles::from_hex(vec![1, 2])));
        assert_eq!(n, Nibbles::from_hex(vec![3, 4]));
    }

    #[test]
    fn skip_prefix_false() {
        let mut n = Nibbles::from_hex(vec![1, 2, 3, 4]);
        assert!(!n.skip_prefix(&Nibbles::from_hex(vec![2, 2])));
        assert_eq!(n, Nibbles::from_hex(vec![1, 2, 3, 4]));
    }

    #[test]
    fn compact_roundtrip_even_extension() {
        let n = Nibbles::from_hex(vec![1, 2, 3, 4]);
        let compact = n.encode_compact();
        assert_eq!(Nibbles::decode_compact(&compact), n);
    }

    #[test]
    fn compact_roundtrip_odd_leaf() {
        let n = Nibbles::from_raw(&[0xAB, 0xCD], true);
        let compact = n.encode_compact();
        assert_eq!(Nibbles::decode_compact(&compact), n);
    }

    #[test]
    fn bytes_roundtrip_through_nibbles() {
        let key = [0x11u8, 0x22, 0x33, 0xff];
        let n = Nibbles::from_bytes(&key);
        assert_eq!(n.to_bytes(), key);
    }
}
