//! Storage tiers used by [`crate::TieredCache`].
//!
//! - [`MemoryStore`]: bounded, volatile, no error channel
//! - [`DiskStore`]: persistent flat directory, reports `Io` failures

mod disk;
mod memory;

pub use disk::{DiskStore, DiskUsage};
pub use memory::MemoryStore;
