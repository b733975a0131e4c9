use super::decode::{decode_rlp_item, get_item_with_prefix, RLPDecode};
use super::error::RLPDecodeError;

/// Walks the payload of an RLP list one field at a time.
///
/// ```
/// use archivetrie_rlp::structs::Decoder;
/// use archivetrie_rlp::decode::RLPDecode;
///
/// struct Simple { a: u8, b: u16 }
///
/// impl RLPDecode for Simple {
///     fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), archivetrie_rlp::RLPDecodeError> {
///         let decoder = Decoder::new(rlp)?;
///         let (a, decoder) = decoder.decode_field("a")?;
///         let (b, decoder) = decoder.decode_field("b")?;
///         let rest = decoder.finish()?;
///         Ok((Simple { a, b }, rest))
///     }
/// }
/// ```
pub struct Decoder<'a> {
    payload: &'a [u8],
    remaining: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self, RLPDecodeError> {
        let (is_list, payload, remaining) = decode_rlp_item(buf)?;
        if !is_list {
            return Err(RLPDecodeError::unexpected_string());
        }
        Ok(Self { payload, remaining })
    }

    pub fn decode_field<T: RLPDecode>(self, name: &'static str) -> Result<(T, Self), RLPDecodeError> {
        let (value, payload) = T::decode_unfinished(self.payload).map_err(|e| e.with_context(name))?;
        Ok((
            value,
            Self {
                payload,
                remaining: self.remaining,
            },
        ))
    }

    pub fn decode_optional_field<T: RLPDecode>(self) -> (Option<T>, Self) {
        match T::decode_unfinished(self.payload) {
            Ok((value, payload)) => (
                Some(value),
                Self {
                    payload,
                    remaining: self.remaining,
                },
            ),
            Err(_) => (None, self),
        }
    }

    pub fn get_encoded_item(self) -> Result<(Vec<u8>, Self), RLPDecodeError> {
        let (item, payload) = get_item_with_prefix(self.payload)?;
        Ok((
            item.to_vec(),
            Self {
                payload,
                remaining: self.remaining,
            },
        ))
    }

    pub fn is_done(&self) -> bool {
        self.payload.is_empty()
    }

    /// Returns the bytes following the decoded list, erroring if the list's
    /// own payload wasn't fully consumed.
    pub fn finish(self) -> Result<&'a [u8], RLPDecodeError> {
        if !self.payload.is_empty() {
            return Err(RLPDecodeError::invalid_length());
        }
        Ok(self.remaining)
    }

    /// Like [`Self::finish`] but tolerates unconsumed payload bytes, for
    /// callers that intentionally decode a prefix of a list's fields.
    pub fn finish_unchecked(self) -> &'a [u8] {
        self.remaining
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::encode::RLPEncode;

    struct Pair {
        a: u8,
        b: u16,
    }

    impl RLPEncode for Pair {
        fn encode(&self, buf: &mut dyn bytes::BufMut) {
            let mut payload = Vec::new();
            self.a.encode(&mut payload);
            self.b.encode(&mut payload);
            let mut out = Vec::new();
            crate::encode::encode_length(payload.len(), &mut out);
            out.extend_from_slice(&payload);
            buf.put_slice(&out);
        }
    }

    impl RLPDecode for Pair {
        fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
            let decoder = Decoder::new(rlp)?;
            let (a, decoder) = decoder.decode_field("a")?;
            let (b, decoder) = decoder.decode_field("b")?;
            let rest = decoder.finish()?;
            Ok((Pair { a, b }, rest))
        }
    }

    #[test]
    fn decode_struct_fields_in_order() {
        let encoded = Pair { a: 5, b: 300 }.encode_to_vec();
        let decoded = Pair::decode(&encoded).unwrap();
        assert_eq!(decoded.a, 5);
        assert_eq!(decoded.b, 300);
    }
}
