//! Managed heap and garbage collector
//!
//! - **GcHeader**: per-object mark, finalization and bridge bits
//! - **Heap**: dense relocating storage addressed through the identity table
//! - **RootSet**: stack, static and global root slots
//! - **GarbageCollector**: mark-sweep with stale-reference scanning

mod collector;
mod header;
mod heap;
mod roots;

pub use collector::{CollectionOutcome, GarbageCollector, GcStats, ScanMode};
pub use header::GcHeader;
pub use heap::Heap;
pub use roots::{RootId, RootKind, RootSet};
