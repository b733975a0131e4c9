//! The value carried on a Branch/Extension edge: either a real 32-byte
//! Keccak256 hash, or — when the child's RLP encoding is itself shorter than
//! 32 bytes — the embedded encoding inlined in place of a hash.

use archivetrie_crypto::keccak_hash;
use archivetrie_rlp::{encode::RLPEncode, RLPDecode, RLPDecodeError};
use ethereum_types::H256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeHash {
    Hashed(H256),
    /// `data[..len]` is the child's raw RLP encoding (always < 32 bytes).
    Inline([u8; 31], u8),
}

impl Default for NodeHash {
    fn default() -> Self {
        // The canonical empty-trie hash, matching the Ethereum reference.
        NodeHash::Hashed(*EMPTY_TRIE_HASH)
    }
}

lazy_static::lazy_static! {
    pub static ref EMPTY_TRIE_HASH: H256 = keccak_hash([0x80]);
}

impl NodeHash {
    /// Builds the hash/embedding for a node from its raw RLP encoding,
    /// applying the embedding rule: encodings under 32 bytes are inlined.
    pub fn from_encoded(raw: &[u8]) -> Self {
        if raw.len() < 32 {
            let mut data = [0u8; 31];
            data[..raw.len()].copy_from_slice(raw);
            NodeHash::Inline(data, raw.len() as u8)
        } else {
            NodeHash::Hashed(keccak_hash(raw))
        }
    }

    pub fn is_valid(&self) -> bool {
        true
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, NodeHash::Inline(_, _))
    }

    pub fn as_hash(&self) -> Option<H256> {
        match self {
            NodeHash::Hashed(h) => Some(*h),
            NodeHash::Inline(_, _) => None,
        }
    }

    pub fn embedded_bytes(&self) -> Option<&[u8]> {
        match self {
            NodeHash::Inline(data, len) => Some(&data[..*len as usize]),
            NodeHash::Hashed(_) => None,
        }
    }

    /// The real Keccak256 hash regardless of embedding — used at positions
    /// where embedding is forbidden (trie roots: the live/historical root
    /// and every account's storage root).
    pub fn force_hash(&self) -> H256 {
        match self {
            NodeHash::Hashed(h) => *h,
            NodeHash::Inline(data, len) => keccak_hash(&data[..*len as usize]),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        if bytes.len() == 32 {
            NodeHash::Hashed(H256::from_slice(bytes))
        } else {
            Self::from_encoded(bytes)
        }
    }
}

impl RLPEncode for NodeHash {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        match self {
            NodeHash::Hashed(h) => h.0.encode(buf),
            NodeHash::Inline(data, len) => buf.put_slice(&data[..*len as usize]),
        }
    }
}

impl RLPDecode for NodeHash {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = archivetrie_rlp::decode::decode_bytes(rlp)?;
        Ok((Self::from_slice(bytes), rest))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn short_encodings_embed() {
        let raw = [0x80u8];
        let h = NodeHash::from_encoded(&raw);
        assert!(h.is_embedded());
        assert_eq!(h.embedded_bytes(), Some(&raw[..]));
    }

    #[test]
    fn long_encodings_hash() {
        let raw = vec![0xaa; 40];
        let h = NodeHash::from_encoded(&raw);
        assert!(!h.is_embedded());
        assert!(h.as_hash().is_some());
    }
}
