//! Purpose: Single-fire completion callbacks for the iteration driver and generator.
//! Exports: `Completion`, `Done`.
//! Role: Replaces "already finished" flags shared between nested callbacks.
//! Invariants: The wrapped callback runs at most once; later settles are ignored.
//! Invariants: `map` only rewraps a callback that has not fired yet.
use std::fmt;

use crate::core::error::Error;

/// Terminal callback: `Ok(())` on exhaustion or early stop, `Err` on the first failure.
pub type Done = Box<dyn FnOnce(Result<(), Error>) + Send + 'static>;

pub struct Completion<T = Result<(), Error>> {
    callback: Option<Box<dyn FnOnce(T) + Send + 'static>>,
}

impl<T> Completion<T> {
    pub fn new(callback: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.callback.is_none()
    }

    /// Runs the callback with `value`. Returns `false` if it already ran.
    pub fn settle(&mut self, value: T) -> bool {
        match self.callback.take() {
            Some(callback) => {
                callback(value);
                true
            }
            None => false,
        }
    }

    /// Replaces the pending callback with `transform(callback)`.
    pub fn map<F>(&mut self, transform: F)
    where
        F: FnOnce(Box<dyn FnOnce(T) + Send + 'static>) -> Box<dyn FnOnce(T) + Send + 'static>,
    {
        if let Some(callback) = self.callback.take() {
            self.callback = Some(transform(callback));
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("settled", &self.is_settled())
            .finish()
    }
}
