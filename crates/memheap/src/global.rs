// Copyright (c) 2025-2026 Federico Hoerth <memparanoid@gmail.com>
// SPDX-License-Identifier: GPL-3.0-only
// See LICENSE in the repository root for full license text.

//! Process-wide secure-heap façade.
//!
//! One default [`SecureHeap`] behind a single write-mode lock. Every
//! entry point that touches heap structure takes the lock; only the
//! initialization flag and the used counter are readable without it.
//! While the heap is not installed, allocation and deallocation fall
//! through to the host allocator, so callers can use these functions
//! unconditionally.

use core::panic::Location;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockWriteGuard};

use log::trace;

use mempage::cleanse;

use crate::error::HeapError;
use crate::heap::{Hardening, SecureHeap};

static HEAP: RwLock<Option<SecureHeap>> = RwLock::new(None);
static INITIALIZED: AtomicBool = AtomicBool::new(false);
static USED: AtomicUsize = AtomicUsize::new(0);

/// A poisoned lock means a panic escaped mid-mutation and the heap
/// structure can no longer be trusted; propagating the panic here is
/// the abort the structural assertions call for.
fn heap() -> RwLockWriteGuard<'static, Option<SecureHeap>> {
    HEAP.write().expect("secure heap lock poisoned")
}

/// Installs the process-wide secure heap.
///
/// `size` and `minsize` must be positive powers of two; `minsize` is
/// raised until a free block can hold its link node.
///
/// # Errors
///
/// [`HeapError::AlreadyInitialized`] if the heap is installed (the
/// existing heap is left untouched), or the underlying configuration
/// and mapping errors. [`Hardening::Partial`] is a success: the heap
/// works, but one of the advisory hardening steps failed and was
/// logged.
pub fn secure_malloc_init(size: usize, minsize: usize) -> Result<Hardening, HeapError> {
    let mut heap = heap();
    if heap.is_some() {
        return Err(HeapError::AlreadyInitialized);
    }

    let installed = SecureHeap::new(size, minsize)?;
    let hardening = installed.hardening();

    *heap = Some(installed);
    USED.store(0, Ordering::Relaxed);
    INITIALIZED.store(true, Ordering::Release);

    Ok(hardening)
}

/// Tears down the process-wide heap.
///
/// Fails (and leaves the heap live) while allocations are
/// outstanding. Idempotent: succeeds when no heap is installed.
pub fn secure_malloc_done() -> bool {
    let mut heap = heap();
    if heap.as_ref().is_some_and(|h| h.used() > 0) {
        return false;
    }

    *heap = None;
    INITIALIZED.store(false, Ordering::Release);
    USED.store(0, Ordering::Relaxed);
    true
}

/// Whether the process-wide heap is installed.
pub fn secure_malloc_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

/// Allocates `size` bytes from the secure heap, or from the host
/// allocator while the heap is not installed. Returns null when the
/// heap has no free block wide enough (or the host allocator fails).
#[track_caller]
pub fn secure_malloc(size: usize) -> *mut u8 {
    if !secure_malloc_initialized() {
        return unsafe { libc::malloc(size) as *mut u8 };
    }

    trace!("secure_malloc({size}) at {}", Location::caller());

    let mut guard = heap();
    let Some(heap) = guard.as_mut() else {
        return unsafe { libc::malloc(size) as *mut u8 };
    };

    let chunk = heap
        .malloc(size)
        .map_or(ptr::null_mut(), |chunk| chunk.as_ptr());
    USED.store(heap.used(), Ordering::Relaxed);
    chunk
}

/// [`secure_malloc`] with the first `size` bytes zeroed.
#[track_caller]
pub fn secure_zalloc(size: usize) -> *mut u8 {
    let chunk = secure_malloc(size);
    if !chunk.is_null() {
        unsafe { chunk.write_bytes(0, size) };
    }
    chunk
}

/// Frees a pointer from [`secure_malloc`]/[`secure_zalloc`].
///
/// Arena pointers are cleansed over their full class width before
/// release; anything else is routed to the host allocator untouched.
/// Null is a no-op.
///
/// # Safety
///
/// `ptr` must be null, a live secure-heap allocation, or a live host
/// allocation obtained through this façade.
#[track_caller]
pub unsafe fn secure_free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    if !secure_allocated(ptr.cast_const()) {
        unsafe { libc::free(ptr as *mut libc::c_void) };
        return;
    }

    trace!("secure_free({ptr:p}) at {}", Location::caller());

    let mut guard = heap();
    if let Some(heap) = guard.as_mut() {
        unsafe { heap.free(ptr) };
        USED.store(heap.used(), Ordering::Relaxed);
    }
}

/// [`secure_free`] for buffers whose length the caller knows.
///
/// The arena branch cleanses the full class width exactly as
/// [`secure_free`] does; the host branch cleanses the `size` bytes
/// the caller vouches for before delegating, since the host
/// allocator will not.
///
/// # Safety
///
/// As [`secure_free`], and `ptr` must be valid for writes of `size`
/// bytes when it is a host allocation.
#[track_caller]
pub unsafe fn secure_clear_free(ptr: *mut u8, size: usize) {
    if ptr.is_null() {
        return;
    }
    if !secure_allocated(ptr.cast_const()) {
        unsafe {
            cleanse(ptr, size);
            libc::free(ptr as *mut libc::c_void);
        }
        return;
    }

    trace!("secure_clear_free({ptr:p}, {size}) at {}", Location::caller());

    let mut guard = heap();
    if let Some(heap) = guard.as_mut() {
        unsafe { heap.free(ptr) };
        USED.store(heap.used(), Ordering::Relaxed);
    }
}

/// Whether `ptr` lies inside the secure arena.
///
/// A residency predicate, not a liveness one: it decides which
/// deallocator a pointer belongs to. Always false while the heap is
/// not installed.
pub fn secure_allocated(ptr: *const u8) -> bool {
    if !secure_malloc_initialized() {
        return false;
    }
    heap().as_ref().is_some_and(|h| h.contains(ptr))
}

/// Bytes currently handed out from the arena, in class widths.
///
/// Read without the lock; concurrent mutations make this a statistics
/// snapshot, nothing more.
pub fn secure_used() -> usize {
    USED.load(Ordering::Relaxed)
}

/// Class width backing an arena pointer, or 0 while the heap is not
/// installed. `ptr` must lie inside the arena.
pub fn secure_actual_size(ptr: *const u8) -> usize {
    heap().as_ref().map_or(0, |h| h.actual_size(ptr))
}
