//! Core types and traits for econ storage backends.
//!
//! This crate provides the `StorageBackend` trait and the associated error and
//! money helpers, so that each persistence engine can live in its own crate.

pub mod money;
pub mod storage;

pub use money::{from_f64, round_cents, to_f64};
pub use storage::{AccountRecord, BackendKind, StorageBackend, StorageError};
