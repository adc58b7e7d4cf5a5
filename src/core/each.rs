//! Purpose: Push-style iteration: drive a cursor first to last and hand each record to a visitor.
//! Exports: `AdvanceMode`, `Continuation`, `Store::each`, `Store::each_with`, `Cursor::each`.
//! Role: Bulk "each" protocol layered on `Cursor::get(true)`.
//! Invariants: Exactly one cursor operation is outstanding; the next record is fetched only after
//! the visitor lets the driver continue.
//! Invariants: A drive reports one terminal result; `each_with` settles its callback once.
//! Invariants: Visitor errors and panics end the drive as failures, never crash the caller.
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::core::completion::Completion;
use crate::core::cursor::Cursor;
use crate::core::error::{Error, ErrorKind};
use crate::core::store::{Record, Store};

/// How the driver proceeds after a visitor returns.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AdvanceMode {
    /// Continue as soon as the visitor returns, unless it stopped the drive.
    #[default]
    Auto,
    /// Wait until the visitor resolves its `Continuation`.
    Manual,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum DriverState {
    Idle,
    Dispatching,
    Done,
}

#[derive(Debug)]
enum Signal {
    Next,
    Stop,
    Fail(Error),
}

/// Handed to the visitor with each record. In manual mode the driver waits for
/// exactly one of `next`, `stop` or `fail`; dropping it unresolved counts as `stop`.
#[derive(Debug)]
#[must_use = "a manual drive waits until the continuation is resolved or dropped"]
pub struct Continuation {
    signal: oneshot::Sender<Signal>,
}

impl Continuation {
    pub fn next(self) {
        let _ = self.signal.send(Signal::Next);
    }

    pub fn stop(self) {
        let _ = self.signal.send(Signal::Stop);
    }

    pub fn fail(self, err: Error) {
        let _ = self.signal.send(Signal::Fail(err));
    }
}

struct Driver<'c> {
    cursor: &'c mut Cursor,
    mode: AdvanceMode,
    state: DriverState,
    visited: usize,
}

impl<'c> Driver<'c> {
    fn new(cursor: &'c mut Cursor, mode: AdvanceMode) -> Self {
        Self {
            cursor,
            mode,
            state: DriverState::Idle,
            visited: 0,
        }
    }

    async fn run<V>(mut self, mut visitor: V) -> Result<(), Error>
    where
        V: FnMut(Record, Continuation) -> Result<(), Error>,
    {
        let result = self.drive(&mut visitor).await;
        self.state = DriverState::Done;
        match &result {
            Ok(()) => tracing::debug!(visited = self.visited, mode = ?self.mode, "each finished"),
            Err(err) => {
                tracing::debug!(visited = self.visited, error = %err, "each failed")
            }
        }
        result
    }

    async fn drive<V>(&mut self, visitor: &mut V) -> Result<(), Error>
    where
        V: FnMut(Record, Continuation) -> Result<(), Error>,
    {
        self.cursor.jump().await?;
        self.state = DriverState::Dispatching;
        while self.state == DriverState::Dispatching {
            let Some(record) = self.cursor.get(true).await? else {
                return Ok(());
            };
            self.visited += 1;

            let (tx, mut rx) = oneshot::channel();
            let continuation = Continuation { signal: tx };
            catch_unwind(AssertUnwindSafe(|| visitor(record, continuation)))
                .map_err(visitor_panicked)??;

            let signal = match self.mode {
                AdvanceMode::Auto => rx.try_recv().unwrap_or(Signal::Next),
                AdvanceMode::Manual => rx.await.unwrap_or(Signal::Stop),
            };
            match signal {
                Signal::Next => {}
                Signal::Stop => self.state = DriverState::Done,
                Signal::Fail(err) => return Err(err),
            }
        }
        Ok(())
    }
}

fn visitor_panicked(payload: Box<dyn Any + Send>) -> Error {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    Error::new(ErrorKind::Internal).with_message(format!("visitor panicked: {detail}"))
}

impl Cursor {
    /// Jumps to the first record and visits every record in ascending order.
    pub async fn each<V>(&mut self, mode: AdvanceMode, visitor: V) -> Result<(), Error>
    where
        V: FnMut(Record, Continuation) -> Result<(), Error>,
    {
        Driver::new(self, mode).run(visitor).await
    }
}

impl Store {
    /// Visits every record with a fresh cursor.
    pub async fn each<V>(&self, mode: AdvanceMode, visitor: V) -> Result<(), Error>
    where
        V: FnMut(Record, Continuation) -> Result<(), Error>,
    {
        self.cursor().each(mode, visitor).await
    }

    /// Drives `each` on a spawned task and reports its result to `done` exactly once.
    pub fn each_with<V, D>(&self, mode: AdvanceMode, visitor: V, done: D) -> JoinHandle<()>
    where
        V: FnMut(Record, Continuation) -> Result<(), Error> + Send + 'static,
        D: FnOnce(Result<(), Error>) + Send + 'static,
    {
        let mut cursor = self.cursor();
        let mut completion = Completion::new(done);
        tokio::spawn(async move {
            let result = cursor.each(mode, visitor).await;
            completion.settle(result);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::AdvanceMode;
    use crate::core::error::{Error, ErrorKind};
    use crate::core::store::{Key, Store};
    use std::sync::{Arc, Mutex};

    async fn seeded(keys: &[&'static str]) -> Store {
        let store = Store::memory();
        for key in keys {
            store.set(key, key.to_uppercase()).await.expect("set");
        }
        store
    }

    #[tokio::test]
    async fn auto_mode_visits_in_order() {
        let store = seeded(&["b", "c", "a"]).await;
        let mut seen: Vec<Key> = Vec::new();
        store
            .each(AdvanceMode::Auto, |record, _| {
                seen.push(record.key);
                Ok(())
            })
            .await
            .expect("each");
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn empty_store_never_calls_visitor() {
        let store = Store::memory();
        let mut calls = 0;
        store
            .each(AdvanceMode::Auto, |_, _| {
                calls += 1;
                Ok(())
            })
            .await
            .expect("each");
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn auto_mode_stop_ends_early_with_success() {
        let store = seeded(&["a", "b", "c"]).await;
        let mut seen = Vec::new();
        store
            .each(AdvanceMode::Auto, |record, next| {
                seen.push(record.key.clone());
                if record.key == "b" {
                    next.stop();
                }
                Ok(())
            })
            .await
            .expect("each");
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn visitor_error_is_terminal() {
        let store = seeded(&["a", "b"]).await;
        let mut calls = 0;
        let err = store
            .each(AdvanceMode::Auto, |_, _| {
                calls += 1;
                Err(Error::new(ErrorKind::Usage).with_message("bad record"))
            })
            .await
            .expect_err("visitor error");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn visitor_panic_is_caught() {
        let store = seeded(&["a"]).await;
        let err = store
            .each(AdvanceMode::Auto, |_, _| panic!("boom"))
            .await
            .expect_err("panic");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.message().unwrap_or_default().contains("boom"));
    }

    #[tokio::test]
    async fn manual_mode_continues_from_another_task() {
        let store = seeded(&["a", "b", "c"]).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store
            .each(AdvanceMode::Manual, move |record, next| {
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    sink.lock().expect("lock").push(record.key);
                    next.next();
                });
                Ok(())
            })
            .await
            .expect("each");
        assert_eq!(*seen.lock().expect("lock"), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn manual_mode_fail_reports_error() {
        let store = seeded(&["a", "b"]).await;
        let err = store
            .each(AdvanceMode::Manual, |_, next| {
                next.fail(Error::new(ErrorKind::Io).with_message("downstream"));
                Ok(())
            })
            .await
            .expect_err("fail");
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[tokio::test]
    async fn manual_mode_dropped_continuation_stops() {
        let store = seeded(&["a", "b"]).await;
        let mut calls = 0;
        store
            .each(AdvanceMode::Manual, |_, next| {
                calls += 1;
                drop(next);
                Ok(())
            })
            .await
            .expect("each");
        assert_eq!(calls, 1);
    }
}
