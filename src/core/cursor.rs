// Positioned traversal over a store's key ordering, with absence reported as `None`.
use std::ops::Bound;

use bytes::Bytes;

use crate::core::error::{Error, ErrorKind};
use crate::core::snapshot::Tree;
use crate::core::store::{Key, Record, Store, Value};

/// Where a cursor points in the key ordering.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Position {
    #[default]
    Unpositioned,
    At(Key),
    Exhausted,
}

/// A cursor owns its position exclusively; every operation takes `&mut self`,
/// so at most one operation is outstanding at a time.
#[derive(Debug)]
pub struct Cursor {
    store: Store,
    position: Position,
}

impl Store {
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.clone())
    }
}

impl Cursor {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            position: Position::Unpositioned,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Returns the current record; with `advance`, also steps forward in the same store access.
    pub async fn get(&mut self, advance: bool) -> Result<Option<Record>, Error> {
        let position = self.position.clone();
        let (found, next) = self
            .store
            .read_tree(move |tree| {
                let Some((key, value)) = resolve(tree, &position) else {
                    return (None, Position::Exhausted);
                };
                let next = if advance {
                    after(tree, &key)
                } else {
                    Position::At(key.clone())
                };
                (Some(Record { key, value }), next)
            })
            .await?;
        self.moved(next);
        Ok(found)
    }

    pub async fn get_key(&mut self, advance: bool) -> Result<Option<Key>, Error> {
        Ok(self.get(advance).await?.map(|record| record.key))
    }

    pub async fn get_value(&mut self, advance: bool) -> Result<Option<Value>, Error> {
        Ok(self.get(advance).await?.map(|record| record.value))
    }

    /// Positions at the first record.
    pub async fn jump(&mut self) -> Result<(), Error> {
        self.seek_forward(None).await
    }

    /// Positions at the first record whose key is `>= target`.
    pub async fn jump_to(&mut self, target: impl AsRef<[u8]>) -> Result<(), Error> {
        self.seek_forward(Some(Bytes::copy_from_slice(target.as_ref())))
            .await
    }

    /// Positions at the last record.
    pub async fn jump_back(&mut self) -> Result<(), Error> {
        self.seek_backward(None).await
    }

    /// Positions at the last record whose key is `<= target`.
    pub async fn jump_back_to(&mut self, target: impl AsRef<[u8]>) -> Result<(), Error> {
        self.seek_backward(Some(Bytes::copy_from_slice(target.as_ref())))
            .await
    }

    pub(crate) async fn seek_forward(&mut self, target: Option<Key>) -> Result<(), Error> {
        let next = self
            .store
            .read_tree(move |tree| {
                let lower = match &target {
                    Some(target) => Bound::Included(&target[..]),
                    None => Bound::Unbounded,
                };
                landed(tree.range::<[u8], _>((lower, Bound::Unbounded)).next())
            })
            .await?;
        self.moved(next);
        Ok(())
    }

    async fn seek_backward(&mut self, target: Option<Key>) -> Result<(), Error> {
        let next = self
            .store
            .read_tree(move |tree| {
                let upper = match &target {
                    Some(target) => Bound::Included(&target[..]),
                    None => Bound::Unbounded,
                };
                landed(tree.range::<[u8], _>((Bound::Unbounded, upper)).next_back())
            })
            .await?;
        self.moved(next);
        Ok(())
    }

    pub async fn step(&mut self) -> Result<(), Error> {
        let position = self.position.clone();
        let next = self
            .store
            .read_tree(move |tree| match resolve(tree, &position) {
                Some((key, _)) => after(tree, &key),
                None => Position::Exhausted,
            })
            .await?;
        self.moved(next);
        Ok(())
    }

    pub async fn step_back(&mut self) -> Result<(), Error> {
        let position = self.position.clone();
        let next = self
            .store
            .read_tree(move |tree| match resolve(tree, &position) {
                Some((key, _)) => landed(
                    tree.range::<[u8], _>((Bound::Unbounded, Bound::Excluded(&key[..])))
                        .next_back(),
                ),
                None => Position::Exhausted,
            })
            .await?;
        self.moved(next);
        Ok(())
    }

    /// Up to `size` consecutive keys starting at the current record; the cursor does not move.
    pub async fn get_key_block(&mut self, size: usize) -> Result<Option<Vec<Key>>, Error> {
        if size == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("key block size must be positive"));
        }
        let position = self.position.clone();
        let (block, next) = self
            .store
            .read_tree(move |tree| {
                let Some((first, _)) = resolve(tree, &position) else {
                    return (None, Position::Exhausted);
                };
                let block: Vec<Key> = tree
                    .range::<[u8], _>((Bound::Included(&first[..]), Bound::Unbounded))
                    .take(size)
                    .map(|(key, _)| key.clone())
                    .collect();
                (Some(block), Position::At(first))
            })
            .await?;
        self.moved(next);
        Ok(block)
    }

    fn moved(&mut self, next: Position) {
        if next != self.position {
            tracing::trace!(from = ?self.position, to = ?next, "cursor moved");
        }
        self.position = next;
    }
}

/// The record under `position`. A removed key resolves to its successor.
fn resolve(tree: &Tree, position: &Position) -> Option<(Key, Value)> {
    let Position::At(key) = position else {
        return None;
    };
    tree.range::<[u8], _>((Bound::Included(&key[..]), Bound::Unbounded))
        .next()
        .map(|(key, value)| (key.clone(), value.clone()))
}

fn after(tree: &Tree, key: &[u8]) -> Position {
    landed(
        tree.range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
            .next(),
    )
}

fn landed(entry: Option<(&Key, &Value)>) -> Position {
    match entry {
        Some((key, _)) => Position::At(key.clone()),
        None => Position::Exhausted,
    }
}

#[cfg(test)]
mod tests {
    use super::Position;
    use crate::core::error::ErrorKind;
    use crate::core::store::Store;
    use bytes::Bytes;

    async fn seeded(keys: &[&'static str]) -> Store {
        let store = Store::memory();
        for key in keys {
            store.set(key, key.to_uppercase()).await.expect("set");
        }
        store
    }

    #[tokio::test]
    async fn forward_walk_visits_each_key_once_then_absence() {
        let store = seeded(&["c", "a", "b"]).await;
        let mut cursor = store.cursor();
        cursor.jump().await.expect("jump");

        let mut seen = Vec::new();
        while let Some(key) = cursor.get_key(false).await.expect("get") {
            seen.push(key);
            cursor.step().await.expect("step");
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(cursor.position(), &Position::Exhausted);
    }

    #[tokio::test]
    async fn get_with_advance_moves_forward() {
        let store = seeded(&["a", "b"]).await;
        let mut cursor = store.cursor();
        cursor.jump().await.expect("jump");
        let record = cursor.get(true).await.expect("get").expect("record");
        assert_eq!(record.key, "a");
        assert_eq!(record.value, "A");
        assert_eq!(cursor.get_value(true).await.expect("get").as_deref(), Some(&b"B"[..]));
        assert_eq!(cursor.get(true).await.expect("get"), None);
    }

    #[tokio::test]
    async fn jump_to_target_lands_on_first_key_at_or_above() {
        let store = seeded(&["apple", "banana", "cherry"]).await;
        let mut cursor = store.cursor();

        cursor.jump_to("b").await.expect("jump");
        assert_eq!(cursor.get_key(false).await.expect("get").as_deref(), Some(&b"banana"[..]));

        cursor.jump_to("cherry").await.expect("jump");
        assert_eq!(cursor.get_key(false).await.expect("get").as_deref(), Some(&b"cherry"[..]));

        cursor.jump_to("zzz").await.expect("jump past end");
        assert_eq!(cursor.get(false).await.expect("get"), None);
    }

    #[tokio::test]
    async fn backward_walk_descends() {
        let store = seeded(&["a", "b", "c"]).await;
        let mut cursor = store.cursor();
        cursor.jump_back().await.expect("jump back");

        let mut seen = Vec::new();
        while let Some(key) = cursor.get_key(false).await.expect("get") {
            seen.push(key);
            cursor.step_back().await.expect("step back");
        }
        assert_eq!(seen, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn jump_back_to_target_lands_on_last_key_at_or_below() {
        let store = seeded(&["apple", "banana", "cherry"]).await;
        let mut cursor = store.cursor();
        cursor.jump_back_to("c").await.expect("jump back");
        assert_eq!(cursor.get_key(false).await.expect("get").as_deref(), Some(&b"banana"[..]));
        cursor.jump_back_to("a").await.expect("jump back");
        assert_eq!(cursor.get(false).await.expect("get"), None);
    }

    #[tokio::test]
    async fn exhausted_cursor_stays_exhausted_until_jump() {
        let store = seeded(&["a"]).await;
        let mut cursor = store.cursor();
        cursor.jump().await.expect("jump");
        cursor.step().await.expect("step");
        assert_eq!(cursor.position(), &Position::Exhausted);

        store.set("b", "B").await.expect("set");
        cursor.step().await.expect("step");
        cursor.step_back().await.expect("step back");
        assert_eq!(cursor.get(false).await.expect("get"), None);

        cursor.jump().await.expect("jump");
        assert_eq!(cursor.get_key(false).await.expect("get").as_deref(), Some(&b"a"[..]));
    }

    #[tokio::test]
    async fn unpositioned_cursor_has_no_record() {
        let store = seeded(&["a"]).await;
        let mut cursor = store.cursor();
        assert_eq!(cursor.position(), &Position::Unpositioned);
        assert_eq!(cursor.get(false).await.expect("get"), None);
    }

    #[tokio::test]
    async fn removed_record_resolves_to_successor() {
        let store = seeded(&["a", "b", "c"]).await;
        let mut cursor = store.cursor();
        cursor.jump_to("b").await.expect("jump");
        store.remove("b").await.expect("remove");
        assert_eq!(cursor.get_key(false).await.expect("get").as_deref(), Some(&b"c"[..]));
    }

    #[tokio::test]
    async fn key_block_reads_ahead_without_moving() {
        let store = seeded(&["a", "b", "c", "d"]).await;
        let mut cursor = store.cursor();
        cursor.jump_to("b").await.expect("jump");
        let block = cursor.get_key_block(2).await.expect("block").expect("some");
        assert_eq!(block, vec![Bytes::from_static(b"b"), Bytes::from_static(b"c")]);
        assert_eq!(cursor.get_key(false).await.expect("get").as_deref(), Some(&b"b"[..]));

        cursor.jump_to("d").await.expect("jump");
        let block = cursor.get_key_block(10).await.expect("block").expect("some");
        assert_eq!(block.len(), 1);

        cursor.step().await.expect("step");
        assert_eq!(cursor.get_key_block(3).await.expect("block"), None);
        let err = cursor.get_key_block(0).await.expect_err("zero");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[tokio::test]
    async fn closed_store_fails_cursor_operations() {
        let store = seeded(&["a"]).await;
        let mut cursor = store.cursor();
        store.close().await.expect("close");
        let err = cursor.jump().await.expect_err("closed");
        assert_eq!(err.kind(), ErrorKind::Closed);
    }
}
