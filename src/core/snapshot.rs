// Snapshot image of a store tree: the on-disk form written by `synchronize`.
use std::collections::BTreeMap;

use bytes::Bytes;

use crate::core::error::{Error, ErrorKind};

const MAGIC: [u8; 4] = *b"KVWK";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 16;
const RECORD_HEADER_LEN: usize = 8;

pub(crate) type Tree = BTreeMap<Bytes, Bytes>;

/// Fails with `Usage` when a key or value is too long for its `u32` length field.
pub(crate) fn encode(tree: &Tree) -> Result<Vec<u8>, Error> {
    let body: usize = tree
        .iter()
        .map(|(key, value)| RECORD_HEADER_LEN + key.len() + value.len())
        .sum();
    let mut buf = Vec::with_capacity(HEADER_LEN + body);
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&(tree.len() as u64).to_le_bytes());
    for (key, value) in tree {
        let key_len = field_len(key.len()).map_err(|err| err.with_key(key.clone()))?;
        let value_len = field_len(value.len()).map_err(|err| err.with_key(key.clone()))?;
        buf.extend_from_slice(&key_len.to_le_bytes());
        buf.extend_from_slice(&value_len.to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);
    }
    Ok(buf)
}

fn field_len(len: usize) -> Result<u32, Error> {
    u32::try_from(len).map_err(|_| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("record field of {len} bytes exceeds the snapshot limit"))
    })
}

pub(crate) fn decode(buf: &[u8]) -> Result<Tree, Error> {
    if buf.is_empty() {
        return Ok(Tree::new());
    }
    if buf.len() < HEADER_LEN {
        return Err(Error::new(ErrorKind::Corrupt).with_message("snapshot header too small"));
    }
    if buf[0..4] != MAGIC {
        return Err(Error::new(ErrorKind::Corrupt).with_message("bad magic"));
    }
    let version = u32::from_le_bytes(read_4(buf, 4));
    if version != VERSION {
        return Err(Error::new(ErrorKind::Corrupt).with_message("unsupported version"));
    }
    let count = u64::from_le_bytes(read_8(buf, 8));

    let data = Bytes::copy_from_slice(buf);
    let mut tree = Tree::new();
    let mut offset = HEADER_LEN;
    for _ in 0..count {
        if offset + RECORD_HEADER_LEN > data.len() {
            return Err(truncated(offset));
        }
        let key_len = u32::from_le_bytes(read_4(&data, offset)) as usize;
        let value_len = u32::from_le_bytes(read_4(&data, offset + 4)) as usize;
        let key_start = offset + RECORD_HEADER_LEN;
        let value_start = key_start + key_len;
        let end = value_start + value_len;
        if end > data.len() {
            return Err(truncated(offset));
        }
        tree.insert(data.slice(key_start..value_start), data.slice(value_start..end));
        offset = end;
    }
    if offset != data.len() {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message(format!("trailing bytes after record {count}")));
    }
    Ok(tree)
}

fn truncated(offset: usize) -> Error {
    Error::new(ErrorKind::Corrupt).with_message(format!("record at offset {offset} is truncated"))
}

fn read_4(buf: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    out
}

fn read_8(buf: &[u8], offset: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    out
}

#[cfg(test)]
mod tests {
    use super::{Tree, decode, encode, field_len};
    use crate::core::error::ErrorKind;
    use bytes::Bytes;

    fn sample() -> Tree {
        let mut tree = Tree::new();
        tree.insert(Bytes::from_static(b"a"), Bytes::from_static(b"1"));
        tree.insert(Bytes::from_static(b"empty"), Bytes::new());
        tree
    }

    #[test]
    fn empty_file_is_an_empty_tree() {
        assert!(decode(&[]).expect("decode").is_empty());
    }

    #[test]
    fn zero_length_values_survive() {
        let tree = decode(&encode(&sample()).expect("encode")).expect("decode");
        assert_eq!(tree.get(&b"empty"[..]), Some(&Bytes::new()));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let mut buf = encode(&sample()).expect("encode");
        buf[0..4].copy_from_slice(b"NOPE");
        let err = decode(&buf).expect_err("corrupt");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn truncated_record_is_corrupt() {
        let buf = encode(&sample()).expect("encode");
        let err = decode(&buf[..buf.len() - 3]).expect_err("corrupt");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn oversized_fields_are_rejected() {
        assert_eq!(field_len(u32::MAX as usize).expect("fits"), u32::MAX);
        let err = field_len(u32::MAX as usize + 1).expect_err("too long");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
