use std::alloc::{GlobalAlloc, Layout, System};
#[cfg(feature = "allocation-tracking")]
use std::sync::atomic::{AtomicUsize, Ordering};

/// This atomic counter monitors the amount of memory
/// (in bytes) that is currently allocated for this
/// process at this time.
#[cfg(feature = "allocation-tracking")]
static CURRENT: AtomicUsize = AtomicUsize::new(0);

/// This atomic counter monitors the number of
/// allocations which have not yet been freed.
#[cfg(feature = "allocation-tracking")]
static LIVE: AtomicUsize = AtomicUsize::new(0);

/// A snapshot of the allocator counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
	/// The number of bytes currently allocated
	pub bytes: usize,
	/// The number of allocations which have not been freed
	pub allocations: usize,
}

/// This structure implements a wrapper around the
/// system allocator, or around a user-specified
/// allocator. It tracks the current memory which
/// is allocated, allowing the memory use to be
/// checked at runtime.
#[derive(Debug)]
pub struct TrackAlloc<Alloc = System> {
	alloc: Alloc,
}

impl<A> TrackAlloc<A> {
	#[inline]
	pub const fn new(alloc: A) -> Self {
		Self {
			alloc,
		}
	}
}

impl<A> TrackAlloc<A> {
	/// Returns the current allocator counters
	#[cfg(feature = "allocation-tracking")]
	pub fn current_usage(&self) -> Usage {
		Usage {
			bytes: CURRENT.load(Ordering::SeqCst),
			allocations: LIVE.load(Ordering::SeqCst),
		}
	}
	/// Returns the current allocator counters
	#[cfg(not(feature = "allocation-tracking"))]
	pub fn current_usage(&self) -> Usage {
		Usage::default()
	}
}

#[cfg(feature = "allocation-tracking")]
unsafe impl<A: GlobalAlloc> GlobalAlloc for TrackAlloc<A> {
	unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
		let ret = unsafe { self.alloc.alloc(layout) };
		if !ret.is_null() {
			CURRENT.fetch_add(layout.size(), Ordering::SeqCst);
			LIVE.fetch_add(1, Ordering::SeqCst);
		}
		ret
	}

	unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
		let ret = unsafe { self.alloc.alloc_zeroed(layout) };
		if !ret.is_null() {
			CURRENT.fetch_add(layout.size(), Ordering::SeqCst);
			LIVE.fetch_add(1, Ordering::SeqCst);
		}
		ret
	}

	unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
		CURRENT.fetch_sub(layout.size(), Ordering::SeqCst);
		LIVE.fetch_sub(1, Ordering::SeqCst);
		unsafe { self.alloc.dealloc(ptr, layout) };
	}

	unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
		let ret = unsafe { self.alloc.realloc(ptr, layout, new_size) };
		if !ret.is_null() {
			CURRENT.fetch_sub(layout.size(), Ordering::SeqCst);
			CURRENT.fetch_add(new_size, Ordering::SeqCst);
		}
		ret
	}
}

#[cfg(not(feature = "allocation-tracking"))]
unsafe impl<A: GlobalAlloc> GlobalAlloc for TrackAlloc<A> {
	unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
		unsafe { self.alloc.alloc(layout) }
	}

	unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
		unsafe { self.alloc.alloc_zeroed(layout) }
	}

	unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
		unsafe { self.alloc.dealloc(ptr, layout) }
	}

	unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
		unsafe { self.alloc.realloc(ptr, layout, new_size) }
	}
}
