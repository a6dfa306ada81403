// Copyright (c) 2025-2026 Federico Hoerth <memparanoid@gmail.com>
// SPDX-License-Identifier: GPL-3.0-only
// See LICENSE in the repository root for full license text.

//! Tests for the process-wide façade.
//!
//! All of these share one singleton, so they run serialized and each
//! starts from (and returns to) the torn-down state.

use serial_test::serial;

use crate::error::HeapError;
use crate::global::{
    secure_actual_size, secure_allocated, secure_clear_free, secure_free, secure_malloc,
    secure_malloc_done, secure_malloc_init, secure_malloc_initialized, secure_used, secure_zalloc,
};
use crate::heap::Hardening;

fn reset() {
    assert!(secure_malloc_done());
    assert!(!secure_malloc_initialized());
}

// =============================================================================
// init() / done() lifecycle
// =============================================================================

#[test]
#[serial(secure_heap)]
fn test_init_installs_and_done_uninstalls() {
    reset();

    let hardening = secure_malloc_init(1 << 16, 16).expect("Failed to init");
    assert!(matches!(hardening, Hardening::Full | Hardening::Partial));
    assert!(secure_malloc_initialized());
    assert_eq!(secure_used(), 0);

    assert!(secure_malloc_done());
    assert!(!secure_malloc_initialized());
}

#[test]
#[serial(secure_heap)]
fn test_second_init_is_rejected() {
    reset();

    secure_malloc_init(1 << 16, 16).expect("Failed to init");
    assert!(matches!(
        secure_malloc_init(1 << 16, 16),
        Err(HeapError::AlreadyInitialized)
    ));

    // The installed heap is untouched by the failed attempt.
    assert!(secure_malloc_initialized());
    assert!(secure_malloc_done());
}

#[test]
#[serial(secure_heap)]
fn test_init_config_error_leaves_heap_uninstalled() {
    reset();

    assert!(matches!(
        secure_malloc_init(100, 16),
        Err(HeapError::BadArenaSize(100))
    ));
    assert!(!secure_malloc_initialized());
}

#[test]
#[serial(secure_heap)]
fn test_done_fails_with_outstanding_allocations() {
    reset();

    secure_malloc_init(1 << 16, 16).expect("Failed to init");
    let p = secure_malloc(32);
    assert!(!p.is_null());

    assert!(!secure_malloc_done());
    assert!(secure_malloc_initialized());

    unsafe { secure_free(p) };
    assert!(secure_malloc_done());
}

#[test]
#[serial(secure_heap)]
fn test_done_is_idempotent() {
    reset();
    assert!(secure_malloc_done());
    assert!(secure_malloc_done());
}

// =============================================================================
// malloc() / free() routing
// =============================================================================

#[test]
#[serial(secure_heap)]
fn test_uninstalled_heap_falls_back_to_host_allocator() {
    reset();

    let p = secure_malloc(32);
    assert!(!p.is_null());
    assert!(!secure_allocated(p));
    assert_eq!(secure_used(), 0);

    unsafe { secure_free(p) };
}

#[test]
#[serial(secure_heap)]
fn test_arena_pointers_are_recognized() {
    reset();

    secure_malloc_init(1 << 16, 16).expect("Failed to init");

    let arena_ptr = secure_malloc(32);
    let host_ptr = unsafe { libc::malloc(32) as *mut u8 };

    assert!(secure_allocated(arena_ptr));
    assert!(!secure_allocated(host_ptr));

    unsafe {
        secure_free(arena_ptr);
        secure_free(host_ptr);
    }
    assert!(secure_malloc_done());
}

#[test]
#[serial(secure_heap)]
fn test_free_null_is_noop() {
    reset();

    secure_malloc_init(1 << 16, 16).expect("Failed to init");
    unsafe {
        secure_free(core::ptr::null_mut());
        secure_clear_free(core::ptr::null_mut(), 64);
    }
    assert!(secure_malloc_done());
}

#[test]
#[serial(secure_heap)]
fn test_used_tracks_class_widths() {
    reset();

    secure_malloc_init(1 << 16, 16).expect("Failed to init");

    let p = secure_malloc(20);
    assert_eq!(secure_used(), 32);
    assert_eq!(secure_actual_size(p), 32);

    let q = secure_malloc(16);
    assert_eq!(secure_used(), 48);

    unsafe {
        secure_free(p);
        secure_free(q);
    }
    assert_eq!(secure_used(), 0);
    assert!(secure_malloc_done());
}

// =============================================================================
// zalloc() / clear_free()
// =============================================================================

#[test]
#[serial(secure_heap)]
fn test_zalloc_zeroes_requested_bytes() {
    reset();

    secure_malloc_init(1 << 16, 16).expect("Failed to init");

    // Dirty a block, free it, and take it back zeroed.
    let p = secure_malloc(64);
    unsafe { core::slice::from_raw_parts_mut(p, 64).fill(0xFF) };
    unsafe { secure_free(p) };

    let q = secure_zalloc(64);
    assert_eq!(q, p);
    assert!(unsafe { core::slice::from_raw_parts(q, 64) }
        .iter()
        .all(|&b| b == 0));

    unsafe { secure_free(q) };
    assert!(secure_malloc_done());
}

#[test]
#[serial(secure_heap)]
fn test_clear_free_arena_branch() {
    reset();

    secure_malloc_init(1 << 16, 16).expect("Failed to init");

    let p = secure_malloc(32);
    unsafe { core::slice::from_raw_parts_mut(p, 32).fill(0xAB) };
    unsafe { secure_clear_free(p, 32) };
    assert_eq!(secure_used(), 0);

    assert!(secure_malloc_done());
}

#[test]
#[serial(secure_heap)]
fn test_clear_free_host_branch() {
    reset();

    // With no heap installed, the caller-supplied length is cleansed
    // and the pointer goes back to the host allocator.
    let p = secure_malloc(32);
    unsafe { core::slice::from_raw_parts_mut(p, 32).fill(0xAB) };
    unsafe { secure_clear_free(p, 32) };
    assert_eq!(secure_used(), 0);
}
