//! Purpose: Define the public Rust API boundary for kvwalk.
//! Exports: Store handle, cursor, iteration primitives, open parameters and errors.
//! Role: Additive-only surface used by the CLI and integration tests.
//! Invariants: This module is the only public path callers need.

pub use crate::core::completion::{Completion, Done};
pub use crate::core::cursor::{Cursor, Position};
pub use crate::core::each::{AdvanceMode, Continuation};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::generator::{Generator, GeneratorState};
pub use crate::core::open::{Location, OpenMode, OpenSpec, Tuning};
pub use crate::core::store::{Key, Record, Store, Value};
