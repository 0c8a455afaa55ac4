//! Allocation accounting.
//!
//! The engine releases owned value payloads through `Drop`. The [`TrackAlloc`] wrapper lets a
//! binary or a test harness install a global allocator which counts live bytes and live
//! allocations, so that a value which is constructed and then dropped can be shown to return
//! the process to the same allocation state.

mod track;

pub use track::TrackAlloc;
pub use track::Usage;
