//! Purpose: Ordered embedded key-value store with cursor traversal and async iteration.
//! Exports: `api` (stable surface), `core` (store, cursor, bulk, each, generator, errors).
//! Role: Library backing the `kvwalk` binary and its tests.
//! Invariants: Absence of a record is `None`, never an error.
//! Invariants: Callers reach storage primitives through `api`.
pub mod api;
pub mod core;
