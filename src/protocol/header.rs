//! Header block.
//!
//! An ordered map of byte keys to byte values, serialized as repeated
//! `{u32 klen, key, u32 vlen, value}` entries. The block carries no count;
//! it ends where the enclosing size prefix says it does.

use super::segment::{put_segment, take_segment};
use super::ProtocolError;
use crate::utils::SortedItems;
use std::fmt;

type HeaderEntry = (Vec<u8>, Vec<u8>);

fn entry_key(entry: &HeaderEntry) -> &[u8] {
    &entry.0
}

/// Request or response header items, ordered by key.
#[derive(Clone)]
pub struct Header {
    items: SortedItems<HeaderEntry, [u8]>,
}

impl Header {
    pub fn new() -> Self {
        Self {
            items: SortedItems::new(entry_key),
        }
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.items.get(key).map(|(_, v)| v.as_slice())
    }

    /// Set `key` to `value`, returning the previous value.
    pub fn set(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Option<Vec<u8>> {
        self.items
            .swap((key.into(), value.into()))
            .map(|(_, prev)| prev)
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.items.delete(key).map(|(_, v)| v)
    }

    /// Iterate `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.items.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Serialize the header block (without its size prefix).
    pub fn marshal(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut block = Vec::new();
        for (key, value) in self.iter() {
            put_segment(&mut block, key)?;
            put_segment(&mut block, value)?;
        }
        Ok(block)
    }

    /// Parse a header block. Later duplicates of a key replace earlier ones.
    pub fn unmarshal(mut block: &[u8]) -> Result<Self, ProtocolError> {
        let mut header = Header::new();
        while !block.is_empty() {
            let key = take_segment(&mut block, "header key")?;
            let value = take_segment(&mut block, "header value")?;
            header.set(key, value);
        }
        Ok(header)
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.iter()
                    .map(|(k, v)| (String::from_utf8_lossy(k), String::from_utf8_lossy(v))),
            )
            .finish()
    }
}

impl<K: Into<Vec<u8>>, V: Into<Vec<u8>>> FromIterator<(K, V)> for Header {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut header = Header::new();
        for (k, v) in iter {
            header.set(k, v);
        }
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut header = Header::new();
        assert!(header.set("b", "2").is_none());
        assert!(header.set("a", "1").is_none());
        assert_eq!(header.set("a", "one"), Some(b"1".to_vec()));

        assert_eq!(header.get(b"a"), Some(b"one".as_slice()));
        assert_eq!(header.get(b"b"), Some(b"2".as_slice()));
        assert!(header.get(b"c").is_none());

        let keys: Vec<&[u8]> = header.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"b".as_slice()]);
    }

    #[test]
    fn test_block_layout() {
        let header: Header = [("k", "vv")].into_iter().collect();
        let block = header.marshal().unwrap();
        assert_eq!(block, vec![0, 0, 0, 1, b'k', 0, 0, 0, 2, b'v', b'v']);
    }

    #[test]
    fn test_block_roundtrip() {
        let header: Header = [("x-trace", "abc"), ("empty", ""), ("bin", "\u{1}\u{2}")]
            .into_iter()
            .collect();
        let parsed = Header::unmarshal(&header.marshal().unwrap()).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed.get(b"x-trace"), Some(b"abc".as_slice()));
        assert_eq!(parsed.get(b"empty"), Some(b"".as_slice()));
    }

    #[test]
    fn test_truncated_block() {
        // Key without a value
        let block = [0u8, 0, 0, 1, b'k'];
        assert!(Header::unmarshal(&block).is_err());
    }
}
