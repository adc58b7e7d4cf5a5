//! Purpose: Pull-style iteration: the caller asks for one record at a time.
//! Exports: `Generator`, `GeneratorState`, `Store::generate`.
//! Role: Counterpart to the `each` driver; owns one internal cursor.
//! Invariants: The first pull positions the cursor at the start key (or the first record).
//! Invariants: Exhaustion or failure settles the completion once; later pulls do nothing.
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::core::completion::{Completion, Done};
use crate::core::cursor::Cursor;
use crate::core::error::Error;
use crate::core::store::{Key, Record, Store, Value};

const STREAM_BUFFER: usize = 32;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GeneratorState {
    Idle,
    Active,
    Done,
}

#[derive(Debug)]
pub struct Generator {
    cursor: Cursor,
    start: Option<Key>,
    state: GeneratorState,
    done: Completion,
}

impl Store {
    /// A generator over records from `start` (or the first record) onward.
    pub fn generate<D>(&self, start: Option<Key>, done: D) -> Generator
    where
        D: FnOnce(Result<(), Error>) + Send + 'static,
    {
        Generator {
            cursor: self.cursor(),
            start,
            state: GeneratorState::Idle,
            done: Completion::new(done),
        }
    }
}

impl Generator {
    pub fn state(&self) -> GeneratorState {
        self.state
    }

    /// Wraps the completion callback: the generator will call `transform(done)` instead.
    pub fn then<T>(&mut self, transform: T) -> &mut Self
    where
        T: FnOnce(Done) -> Done,
    {
        self.done.map(transform);
        self
    }

    /// Pulls one record into `visitor(value, key)`, or fires the completion when there is none.
    pub async fn next<V>(&mut self, visitor: V) -> &mut Self
    where
        V: FnOnce(Value, Key),
    {
        if let Some(record) = self.next_record().await {
            visitor(record.value, record.key);
        }
        self
    }

    /// Pulls one record. `None` means the generator has finished; the completion has fired.
    pub async fn next_record(&mut self) -> Option<Record> {
        match self.pull().await {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                self.finish(Ok(()));
                None
            }
            Err(err) => {
                self.finish(Err(err));
                None
            }
        }
    }

    /// Streams the remaining records from a background task; the completion fires when it ends.
    pub fn into_stream(mut self) -> ReceiverStream<Result<Record, Error>> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            loop {
                match self.pull().await {
                    Ok(Some(record)) => {
                        if tx.send(Ok(record)).await.is_err() {
                            self.finish(Ok(()));
                            return;
                        }
                    }
                    Ok(None) => {
                        self.finish(Ok(()));
                        return;
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err.summary())).await;
                        self.finish(Err(err));
                        return;
                    }
                }
            }
        });
        ReceiverStream::new(rx)
    }

    async fn pull(&mut self) -> Result<Option<Record>, Error> {
        match self.state {
            GeneratorState::Done => return Ok(None),
            GeneratorState::Idle => {
                self.state = GeneratorState::Active;
                self.cursor.seek_forward(self.start.clone()).await?;
            }
            GeneratorState::Active => {}
        }
        self.cursor.get(true).await
    }

    fn finish(&mut self, result: Result<(), Error>) {
        if self.state == GeneratorState::Done {
            return;
        }
        self.state = GeneratorState::Done;
        match &result {
            Ok(()) => tracing::debug!("generator exhausted"),
            Err(err) => tracing::debug!(error = %err, "generator failed"),
        }
        self.done.settle(result);
    }
}
