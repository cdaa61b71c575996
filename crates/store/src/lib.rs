//! Store adapters for Batchline.
//!
//! The engine never talks to a storage service directly; it consumes the
//! [`Store`] trait defined here. Two backends are provided: an in-process
//! [`MemoryStore`] for tests and single-process runs, and a directory-backed
//! [`JsonStore`] whose root can live on any shared filesystem.

mod json_store;
mod memory;
mod trait_;

pub use json_store::JsonStore;
pub use memory::MemoryStore;
pub use trait_::{Result, Store, StoreError};
