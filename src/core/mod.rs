// Core modules implementing the store, cursor traversal, iteration protocols, and errors.
pub mod bulk;
pub mod completion;
pub mod cursor;
pub mod each;
pub mod error;
pub mod generator;
pub mod open;
pub(crate) mod snapshot;
pub mod store;
