//! Fixed-size Stock records for the four node kinds. Deliberately distinct
//! from [`crate::node::Node::encode_raw`]: the hash-RLP only ever carries
//! what Ethereum's reference encoding carries (child hashes, compact paths),
//! while a Stock record needs the full node back out — ids, raw
//! address/key, everything — so the two codecs necessarily differ even
//! though both ultimately describe the same node.

use ethereum_types::{H256, U256};

use crate::error::ForestError;
use crate::nibbles::Nibbles;
use crate::node::{AccountInfo, AccountNode, BranchNode, ChildRef, ExtensionNode, ValueNode};
use crate::node_hash::NodeHash;
use crate::node_id::NodeId;
use crate::stock::StockRecord;

const CHILD_RECORD_SIZE: usize = 8 + 1 + 32;
const MAX_BRANCH_VALUE: usize = 63;
const MAX_EXTENSION_NIBBLES: usize = 64;

fn encode_child_record(buf: &mut [u8], child: &ChildRef) {
    buf[..8].copy_from_slice(&child.id.as_u64().to_le_bytes());
    match &child.hash {
        None => buf[8] = 0,
        Some(NodeHash::Hashed(h)) => {
            buf[8] = 1;
            buf[9..41].copy_from_slice(h.as_bytes());
        }
        Some(NodeHash::Inline(data, len)) => {
            buf[8] = 2;
            buf[9] = *len;
            buf[10..10 + *len as usize].copy_from_slice(&data[..*len as usize]);
        }
    }
}

fn decode_child_record(buf: &[u8]) -> Result<ChildRef, ForestError> {
    let id = NodeId::from_u64(u64::from_le_bytes(buf[..8].try_into().unwrap()));
    let hash = match buf[8] {
        0 => None,
        1 => Some(NodeHash::Hashed(H256::from_slice(&buf[9..41]))),
        2 => {
            let len = buf[9];
            let mut data = [0u8; 31];
            data[..len as usize].copy_from_slice(&buf[10..10 + len as usize]);
            Some(NodeHash::Inline(data, len))
        }
        tag => {
            return Err(ForestError::Storage(anyhow::anyhow!(
                "invalid child hash tag {tag} in stock record"
            )))
        }
    };
    Ok(ChildRef { id, hash })
}

impl StockRecord for BranchNode {
    const RECORD_SIZE: usize = 16 * CHILD_RECORD_SIZE + 1 + MAX_BRANCH_VALUE;

    fn encode(&self, buf: &mut [u8]) {
        for (i, child) in self.choices.iter().enumerate() {
            let start = i * CHILD_RECORD_SIZE;
            encode_child_record(&mut buf[start..start + CHILD_RECORD_SIZE], child);
        }
        let values_off = 16 * CHILD_RECORD_SIZE;
        let len = self.value.len().min(MAX_BRANCH_VALUE);
        buf[values_off] = len as u8;
        buf[values_off + 1..values_off + 1 + len].copy_from_slice(&self.value[..len]);
    }

    fn decode(buf: &[u8]) -> Result<Self, ForestError> {
        let mut choices = [ChildRef::empty(); 16];
        for (i, choice) in choices.iter_mut().enumerate() {
            let start = i * CHILD_RECORD_SIZE;
            *choice = decode_child_record(&buf[start..start + CHILD_RECORD_SIZE])?;
        }
        let values_off = 16 * CHILD_RECORD_SIZE;
        let len = buf[values_off] as usize;
        let value = buf[values_off + 1..values_off + 1 + len].to_vec();
        Ok(BranchNode { choices, value })
    }

    fn default_record() -> Self {
        BranchNode::default()
    }
}

impl StockRecord for ExtensionNode {
    const RECORD_SIZE: usize = 1 + MAX_EXTENSION_NIBBLES + CHILD_RECORD_SIZE;

    fn encode(&self, buf: &mut [u8]) {
        let nibbles = self.prefix.as_ref();
        buf[0] = nibbles.len() as u8;
        buf[1..1 + nibbles.len()].copy_from_slice(nibbles);
        encode_child_record(&mut buf[1 + MAX_EXTENSION_NIBBLES..], &self.child);
    }

    fn decode(buf: &[u8]) -> Result<Self, ForestError> {
        let len = buf[0] as usize;
        let prefix = Nibbles::from_hex(buf[1..1 + len].to_vec());
        let child = decode_child_record(&buf[1 + MAX_EXTENSION_NIBBLES..])?;
        Ok(ExtensionNode { prefix, child })
    }

    fn default_record() -> Self {
        ExtensionNode {
            prefix: Nibbles::from_hex(vec![]),
            child: ChildRef::empty(),
        }
    }
}

impl StockRecord for AccountNode {
    const RECORD_SIZE: usize = 20 + 8 + 32 + 32 + 8 + 32 + 1;

    fn encode(&self, buf: &mut [u8]) {
        let mut off = 0;
        buf[off..off + 20].copy_from_slice(&self.address);
        off += 20;
        buf[off..off + 8].copy_from_slice(&self.info.nonce.to_le_bytes());
        off += 8;
        buf[off..off + 32].copy_from_slice(&self.info.balance.to_big_endian());
        off += 32;
        buf[off..off + 32].copy_from_slice(self.info.code_hash.as_bytes());
        off += 32;
        buf[off..off + 8].copy_from_slice(&self.storage_root.as_u64().to_le_bytes());
        off += 8;
        buf[off..off + 32].copy_from_slice(self.storage_hash.as_bytes());
        off += 32;
        buf[off] = self.path_length;
    }

    fn decode(buf: &[u8]) -> Result<Self, ForestError> {
        let mut off = 0;
        let mut address = [0u8; 20];
        address.copy_from_slice(&buf[off..off + 20]);
        off += 20;
        let nonce = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let balance = U256::from_big_endian(&buf[off..off + 32]);
        off += 32;
        let code_hash = H256::from_slice(&buf[off..off + 32]);
        off += 32;
        let storage_root = NodeId::from_u64(u64::from_le_bytes(buf[off..off + 8].try_into().unwrap()));
        off += 8;
        let storage_hash = H256::from_slice(&buf[off..off + 32]);
        off += 32;
        let path_length = buf[off];
        Ok(AccountNode {
            address,
            info: AccountInfo {
                nonce,
                balance,
                code_hash,
            },
            storage_root,
            storage_hash,
            path_length,
        })
    }

    fn default_record() -> Self {
        AccountNode {
            address: [0; 20],
            info: AccountInfo {
                nonce: 0,
                balance: U256::zero(),
                code_hash: H256::zero(),
            },
            storage_root: NodeId::EMPTY,
            storage_hash: *crate::node_hash::EMPTY_TRIE_HASH,
            path_length: 0,
        }
    }
}

impl StockRecord for ValueNode {
    const RECORD_SIZE: usize = 32 + 32 + 1;

    fn encode(&self, buf: &mut [u8]) {
        buf[..32].copy_from_slice(&self.key);
        buf[32..64].copy_from_slice(&self.value);
        buf[64] = self.path_length;
    }

    fn decode(buf: &[u8]) -> Result<Self, ForestError> {
        let mut key = [0u8; 32];
        key.copy_from_slice(&buf[..32]);
        let mut value = [0u8; 32];
        value.copy_from_slice(&buf[32..64]);
        Ok(ValueNode {
            key,
            value,
            path_length: buf[64],
        })
    }

    fn default_record() -> Self {
        ValueNode {
            key: [0; 32],
            value: [0; 32],
            path_length: 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn branch_record_roundtrip() {
        let mut branch = BranchNode::default();
        branch.choices[2] = ChildRef {
            id: NodeId::new(crate::node_id::NodeKind::Value, 4),
            hash: Some(NodeHash::Hashed(H256::repeat_byte(0x7))),
        };
        branch.value = vec![1, 2, 3];
        let mut buf = vec![0u8; BranchNode::RECORD_SIZE];
        branch.encode(&mut buf);
        assert_eq!(BranchNode::decode(&buf).unwrap(), branch);
    }

    #[test]
    fn extension_record_roundtrip() {
        let ext = ExtensionNode {
            prefix: Nibbles::from_hex(vec![1, 2, 3, 4, 5]),
            child: ChildRef {
                id: NodeId::new(crate::node_id::NodeKind::Branch, 9),
                hash: Some(NodeHash::Hashed(H256::repeat_byte(0x3))),
            },
        };
        let mut buf = vec![0u8; ExtensionNode::RECORD_SIZE];
        ext.encode(&mut buf);
        assert_eq!(ExtensionNode::decode(&buf).unwrap(), ext);
    }

    #[test]
    fn account_record_roundtrip() {
        let account = AccountNode {
            address: [0x42; 20],
            info: AccountInfo {
                nonce: 5,
                balance: U256::from(123456u64),
                code_hash: H256::repeat_byte(0x9),
            },
            storage_root: NodeId::new(crate::node_id::NodeKind::Branch, 1),
            storage_hash: H256::repeat_byte(0x1),
            path_length: 12,
        };
        let mut buf = vec![0u8; AccountNode::RECORD_SIZE];
        account.encode(&mut buf);
        assert_eq!(AccountNode::decode(&buf).unwrap(), account);
    }

    #[test]
    fn value_record_roundtrip() {
        let value = ValueNode {
            key: [0x11; 32],
            value: [0x22; 32],
            path_length: 60,
        };
        let mut buf = vec![0u8; ValueNode::RECORD_SIZE];
        value.encode(&mut buf);
        assert_eq!(ValueNode::decode(&buf).unwrap(), value);
    }
}
