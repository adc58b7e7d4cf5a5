//! Purpose: Own an open ordered key-value tree and expose its point operations.
//! Exports: `Store`, `Record`, `Key`, `Value`.
//! Role: Capability token shared by cursors, bulk operations, drivers and generators.
//! Invariants: Every operation after `close` fails with `ErrorKind::Closed`.
//! Invariants: Tree access runs on the blocking pool; writers hold the lock exclusively.
//! Invariants: A file store holds an `fs2` lock on its file until closed or dropped.
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use fs2::FileExt;
use libc::{EACCES, EPERM};

use crate::core::error::{Error, ErrorKind};
use crate::core::open::{Location, OpenMode, OpenSpec, Tuning};
use crate::core::snapshot::{self, Tree};

pub type Key = Bytes;
pub type Value = Bytes;

/// A key/value pair materialized at a cursor position.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub key: Key,
    pub value: Value,
}

impl Record {
    pub fn new(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Handle to an open store. Clones share the same tree.
#[derive(Clone, Debug)]
pub struct Store {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    spec: OpenSpec,
    mode: OpenMode,
    state: RwLock<State>,
}

#[derive(Debug)]
enum State {
    Open(OpenState),
    Closed,
}

#[derive(Debug)]
struct OpenState {
    tree: Tree,
    file: Option<StoreFile>,
    dirty: bool,
}

#[derive(Debug)]
struct StoreFile {
    path: PathBuf,
    file: File,
    locked: bool,
}

impl Drop for StoreFile {
    fn drop(&mut self) {
        if self.locked {
            let _ = FileExt::unlock(&self.file);
        }
    }
}

impl Store {
    /// Opens a store from a location string (`path#name=value...`) and a mode string.
    pub fn open(spec: &str, mode: &str) -> Result<Self, Error> {
        Self::open_with(OpenSpec::parse(spec)?, OpenMode::parse(mode)?)
    }

    pub fn open_with(spec: OpenSpec, mode: OpenMode) -> Result<Self, Error> {
        let (tree, file) = match &spec.location {
            Location::Memory => (Tree::new(), None),
            Location::File(path) => {
                let (tree, file) = open_file(path, mode)?;
                (tree, Some(file))
            }
        };
        tracing::debug!(spec = %spec, records = tree.len(), write = mode.write, "opened store");
        Ok(Self {
            inner: Arc::new(Inner {
                spec,
                mode,
                state: RwLock::new(State::Open(OpenState {
                    tree,
                    file,
                    dirty: false,
                })),
            }),
        })
    }

    /// A writable in-memory store.
    pub fn memory() -> Self {
        Self {
            inner: Arc::new(Inner {
                spec: OpenSpec::memory(),
                mode: OpenMode::writer(),
                state: RwLock::new(State::Open(OpenState {
                    tree: Tree::new(),
                    file: None,
                    dirty: false,
                })),
            }),
        }
    }

    pub fn spec(&self) -> &OpenSpec {
        &self.inner.spec
    }

    pub fn mode(&self) -> OpenMode {
        self.inner.mode
    }

    pub fn is_closed(&self) -> bool {
        match self.inner.state.read() {
            Ok(state) => matches!(*state, State::Closed),
            Err(_) => true,
        }
    }

    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Value>, Error> {
        let key = Bytes::copy_from_slice(key.as_ref());
        self.read_tree(move |tree| tree.get(&key).cloned()).await
    }

    pub async fn set(&self, key: impl AsRef<[u8]>, value: impl Into<Value>) -> Result<(), Error> {
        let key = Bytes::copy_from_slice(key.as_ref());
        let value = value.into();
        self.write_tree(move |tree, tuning| {
            ensure_room(tree, tuning, &key)?;
            tree.insert(key, value);
            Ok(())
        })
        .await
    }

    /// Stores `value` only if `key` is absent; otherwise fails with `AlreadyExists`.
    pub async fn add(&self, key: impl AsRef<[u8]>, value: impl Into<Value>) -> Result<(), Error> {
        let key = Bytes::copy_from_slice(key.as_ref());
        let value = value.into();
        self.write_tree(move |tree, tuning| {
            if tree.contains_key(&key) {
                return Err(Error::new(ErrorKind::AlreadyExists)
                    .with_message("record already exists")
                    .with_key(key));
            }
            ensure_room(tree, tuning, &key)?;
            tree.insert(key, value);
            Ok(())
        })
        .await
    }

    /// Stores `value` only if `key` is present; otherwise fails with `NotFound`.
    pub async fn replace(
        &self,
        key: impl AsRef<[u8]>,
        value: impl Into<Value>,
    ) -> Result<(), Error> {
        let key = Bytes::copy_from_slice(key.as_ref());
        let value = value.into();
        self.write_tree(move |tree, _| match tree.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::new(ErrorKind::NotFound)
                .with_message("no record to replace")
                .with_key(key)),
        })
        .await
    }

    /// Removes `key`, reporting whether a record was present.
    pub async fn remove(&self, key: impl AsRef<[u8]>) -> Result<bool, Error> {
        let key = Bytes::copy_from_slice(key.as_ref());
        self.write_tree(move |tree, _| Ok(tree.remove(&key).is_some()))
            .await
    }

    pub async fn count(&self) -> Result<usize, Error> {
        self.read_tree(|tree| tree.len()).await
    }

    /// Writes the tree to the store file; `hard` also flushes it to the device.
    pub async fn synchronize(&self, hard: bool) -> Result<(), Error> {
        self.run(move |inner| inner.synchronize(hard)).await
    }

    pub async fn close(&self) -> Result<(), Error> {
        self.run(|inner| inner.close()).await
    }

    pub fn close_sync(&self) -> Result<(), Error> {
        self.inner.close()
    }

    pub(crate) async fn read_tree<R, F>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&Tree) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.run(move |inner| inner.read(f)).await
    }

    pub(crate) async fn write_tree<R, F>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut Tree, &Tuning) -> Result<R, Error> + Send + 'static,
        R: Send + 'static,
    {
        self.run(move |inner| inner.write(f)).await
    }

    async fn run<R, F>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&Inner) -> Result<R, Error> + Send + 'static,
        R: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("store task failed")
                    .with_source(err)
            })?
    }
}

impl Inner {
    fn read<R>(&self, f: impl FnOnce(&Tree) -> R) -> Result<R, Error> {
        let state = self.state.read().map_err(|_| Error::poisoned())?;
        match &*state {
            State::Open(open) => Ok(f(&open.tree)),
            State::Closed => Err(Error::closed()),
        }
    }

    fn write<R>(&self, f: impl FnOnce(&mut Tree, &Tuning) -> Result<R, Error>) -> Result<R, Error> {
        let mut state = self.state.write().map_err(|_| Error::poisoned())?;
        let open = match &mut *state {
            State::Open(open) => open,
            State::Closed => return Err(Error::closed()),
        };
        if !self.mode.write {
            return Err(Error::new(ErrorKind::Permission)
                .with_message("store was opened read-only")
                .with_hint("Open the store with mode `w` to modify it."));
        }
        let out = f(&mut open.tree, &self.spec.tuning)?;
        open.dirty = true;
        if self.mode.auto_sync {
            open.persist(false)?;
        }
        Ok(out)
    }

    fn synchronize(&self, hard: bool) -> Result<(), Error> {
        let mut state = self.state.write().map_err(|_| Error::poisoned())?;
        match &mut *state {
            State::Open(open) => {
                if self.mode.write {
                    open.persist(hard)?;
                }
                Ok(())
            }
            State::Closed => Err(Error::closed()),
        }
    }

    /// Persists pending writes, then closes. A failed persist leaves the store open.
    fn close(&self) -> Result<(), Error> {
        let mut state = self.state.write().map_err(|_| Error::poisoned())?;
        let State::Open(open) = &mut *state else {
            return Ok(());
        };
        if self.mode.write && open.dirty {
            open.persist(false)?;
        }
        tracing::debug!(spec = %self.spec, records = open.tree.len(), "closed store");
        *state = State::Closed;
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(_) => return,
        };
        if let State::Open(open) = state {
            if self.mode.write && open.dirty {
                if let Err(err) = open.persist(false) {
                    tracing::warn!(error = %err, "failed to persist store on drop");
                }
            }
        }
    }
}

impl OpenState {
    fn persist(&mut self, hard: bool) -> Result<(), Error> {
        let Some(store_file) = self.file.as_mut() else {
            self.dirty = false;
            return Ok(());
        };
        let buf =
            snapshot::encode(&self.tree).map_err(|err| err.with_path(&store_file.path))?;
        let path = &store_file.path;
        let file = &mut store_file.file;
        file.set_len(0).map_err(|err| io_error(path, err))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|err| io_error(path, err))?;
        file.write_all(&buf).map_err(|err| io_error(path, err))?;
        file.flush().map_err(|err| io_error(path, err))?;
        if hard {
            file.sync_all().map_err(|err| io_error(path, err))?;
        }
        self.dirty = false;
        tracing::debug!(path = %path.display(), bytes = buf.len(), hard, "synchronized store");
        Ok(())
    }
}

fn open_file(path: &Path, mode: OpenMode) -> Result<(Tree, StoreFile), Error> {
    let file = OpenOptions::new()
        .read(true)
        .write(mode.write)
        .create(mode.create)
        .open(path)
        .map_err(|err| {
            let kind = match err.kind() {
                io::ErrorKind::NotFound => ErrorKind::NotFound,
                io::ErrorKind::PermissionDenied => ErrorKind::Permission,
                _ => ErrorKind::Io,
            };
            Error::new(kind)
                .with_message("failed to open store file")
                .with_path(path)
                .with_source(err)
        })?;

    if !mode.no_lock {
        lock_file(&file, mode).map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_message("failed to lock store file")
                .with_path(path)
                .with_source(err)
        })?;
    }
    let store_file = StoreFile {
        path: path.to_path_buf(),
        file,
        locked: !mode.no_lock,
    };

    let mut handle = &store_file.file;
    if mode.truncate {
        handle.set_len(0).map_err(|err| io_error(path, err))?;
        return Ok((Tree::new(), store_file));
    }

    let mut buf = Vec::new();
    handle
        .seek(SeekFrom::Start(0))
        .map_err(|err| io_error(path, err))?;
    handle
        .read_to_end(&mut buf)
        .map_err(|err| io_error(path, err))?;
    let tree = snapshot::decode(&buf).map_err(|err| err.with_path(path))?;
    Ok((tree, store_file))
}

fn lock_file(file: &File, mode: OpenMode) -> io::Result<()> {
    match (mode.write, mode.try_lock) {
        (true, true) => FileExt::try_lock_exclusive(file),
        (true, false) => FileExt::lock_exclusive(file),
        (false, true) => FileExt::try_lock_shared(file),
        (false, false) => FileExt::lock_shared(file),
    }
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

fn ensure_room(tree: &Tree, tuning: &Tuning, key: &[u8]) -> Result<(), Error> {
    match tuning.capcnt {
        Some(capcnt) if tree.len() >= capcnt && !tree.contains_key(key) => {
            Err(Error::new(ErrorKind::Busy)
                .with_message(format!("store holds its capacity of {capcnt} records"))
                .with_key(Bytes::copy_from_slice(key)))
        }
        _ => Ok(()),
    }
}

fn io_error(path: &Path, err: io::Error) -> Error {
    Error::new(ErrorKind::Io).with_path(path).with_source(err)
}
