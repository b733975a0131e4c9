//! Keccak-256 hashing, trimmed from the teacher's multi-hash crypto crate to
//! the single primitive this engine's node encodings need.
use ethereum_types::H256;
use sha3::{Digest, Keccak256 as Sha3Keccak256};

pub fn keccak_hash(data: impl AsRef<[u8]>) -> H256 {
    H256::from_slice(&Sha3Keccak256::digest(data.as_ref()))
}

/// Incremental keccak256, for hashing RLP payloads assembled piece by piece
/// without materializing the full buffer first.
#[derive(Clone, Default)]
pub struct Keccak256 {
    inner: Sha3Keccak256,
}

impl Keccak256 {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn update(&mut self, data: impl AsRef<[u8]>) {
        self.inner.update(data.as_ref());
    }

    #[inline]
    pub fn finalize(self) -> H256 {
        H256::from_slice(&self.inner.finalize())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn empty_input_hash() {
        let expected = hex!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a47");
        assert_eq!(keccak_hash([]).as_bytes(), &expected);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let data = b"keccak incremental test vector";
        let mut hasher = Keccak256::new();
        hasher.update(&data[..10]);
        hasher.update(&data[10..]);
        assert_eq!(hasher.finalize(), keccak_hash(data));
    }
}
