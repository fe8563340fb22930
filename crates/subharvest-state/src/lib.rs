//! Cursor persistence for the subharvest extraction engine.
//!
//! [`CursorStore`] defines the storage contract for resume markers, keyed
//! per (query kind, endpoint). The file-based backend mirrors the reference
//! layout (`<kind>_<endpoint>.cursor` files under a metadata directory); the
//! in-memory backend serves tests and ephemeral runs.

mod error;
mod file;
mod memory;
mod store;

pub use error::{Result, StateError};
pub use file::FileCursorStore;
pub use memory::MemoryCursorStore;
pub use store::{cursor_key, CursorStore};
