//! Purpose: Multi-key reads and writes against a `Store`.
//! Exports: `Store::get_bulk`, `Store::set_bulk`, `Store::remove_bulk`.
//! Role: Batch layer beside the cursor; talks to the store tree directly.
//! Invariants: Atomic calls run under one store guard, so no writer interleaves.
//! Invariants: Non-atomic calls take one guard per key; each key sees the store as of its own read.
//! Invariants: Missing keys are left out of results, never mapped to a placeholder.
use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;

use crate::core::error::{Error, ErrorKind};
use crate::core::store::{Key, Store, Value};

impl Store {
    /// Resolves each key to its value, leaving out keys with no record.
    pub async fn get_bulk<I, K>(&self, keys: I, atomic: bool) -> Result<BTreeMap<Key, Value>, Error>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        let keys = owned_keys(keys);
        if atomic {
            return self
                .read_tree(move |tree| {
                    keys.into_iter()
                        .filter_map(|key| tree.get(&key).map(|value| (key, value.clone())))
                        .collect()
                })
                .await;
        }

        let mut found = BTreeMap::new();
        for key in keys {
            if let Some(value) = self.get(&key).await? {
                found.insert(key, value);
            }
        }
        Ok(found)
    }

    /// Stores every record, returning how many were written.
    pub async fn set_bulk<I, K, V>(&self, records: I, atomic: bool) -> Result<usize, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: Into<Value>,
    {
        let records: Vec<(Key, Value)> = records
            .into_iter()
            .map(|(key, value)| (Bytes::copy_from_slice(key.as_ref()), value.into()))
            .collect();
        if !atomic {
            let count = records.len();
            for (key, value) in records {
                self.set(key, value).await?;
            }
            return Ok(count);
        }
        let count = records.len();
        self.write_tree(move |tree, tuning| {
            let added = records
                .iter()
                .map(|(key, _)| key)
                .filter(|key| !tree.contains_key(*key))
                .collect::<BTreeSet<_>>()
                .len();
            if let Some(capcnt) = tuning.capcnt {
                if tree.len() + added > capcnt {
                    return Err(Error::new(ErrorKind::Busy).with_message(format!(
                        "bulk write would exceed the capacity of {capcnt} records"
                    )));
                }
            }
            tree.extend(records);
            Ok(count)
        })
        .await
    }

    /// Removes every present key, returning how many records were removed.
    pub async fn remove_bulk<I, K>(&self, keys: I, atomic: bool) -> Result<usize, Error>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        let keys = owned_keys(keys);
        if atomic {
            return self
                .write_tree(move |tree, _| {
                    Ok(keys
                        .into_iter()
                        .filter(|key| tree.remove(key).is_some())
                        .count())
                })
                .await;
        }

        let mut removed = 0;
        for key in keys {
            if self.remove(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn owned_keys<I, K>(keys: I) -> Vec<Key>
where
    I: IntoIterator<Item = K>,
    K: AsRef<[u8]>,
{
    keys.into_iter()
        .map(|key| Bytes::copy_from_slice(key.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::core::error::ErrorKind;
    use crate::core::open::{OpenMode, OpenSpec};
    use crate::core::store::Store;
    use bytes::Bytes;
    use std::collections::BTreeMap;

    async fn seeded() -> Store {
        let store = Store::memory();
        store.set("a", "1").await.expect("set");
        store.set("b", "2").await.expect("set");
        store
    }

    #[tokio::test]
    async fn missing_keys_are_left_out() {
        let store = seeded().await;
        for atomic in [true, false] {
            let found = store
                .get_bulk(["a", "b", "missing"], atomic)
                .await
                .expect("bulk");
            let expected = BTreeMap::from([
                (Bytes::from_static(b"a"), Bytes::from_static(b"1")),
                (Bytes::from_static(b"b"), Bytes::from_static(b"2")),
            ]);
            assert_eq!(found, expected);
        }
    }

    #[tokio::test]
    async fn atomic_read_never_sees_a_half_applied_write() {
        let store = Store::memory();
        store
            .set_bulk([("x", "0"), ("y", "0")], true)
            .await
            .expect("seed");

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for round in 1..=200u32 {
                    let value = round.to_string();
                    store
                        .set_bulk([("x", value.clone()), ("y", value)], true)
                        .await
                        .expect("write");
                }
            })
        };

        for _ in 0..200 {
            let found = store.get_bulk(["x", "y"], true).await.expect("read");
            assert_eq!(found.get(&b"x"[..]), found.get(&b"y"[..]));
        }
        writer.await.expect("writer");
    }

    #[tokio::test]
    async fn remove_bulk_counts_present_keys() {
        let store = seeded().await;
        let removed = store
            .remove_bulk(["a", "missing"], true)
            .await
            .expect("remove");
        assert_eq!(removed, 1);
        let removed = store.remove_bulk(["b", "b"], false).await.expect("remove");
        assert_eq!(removed, 1);
        assert_eq!(store.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn atomic_set_bulk_respects_capacity_all_or_nothing() {
        let store =
            Store::open_with(OpenSpec::memory().with_capcnt(2), OpenMode::writer()).expect("open");
        store.set("a", "1").await.expect("set");
        let err = store
            .set_bulk([("b", "2"), ("c", "3")], true)
            .await
            .expect_err("over capacity");
        assert_eq!(err.kind(), ErrorKind::Busy);
        assert_eq!(store.count().await.expect("count"), 1);
    }
}
