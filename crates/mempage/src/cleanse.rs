// Copyright (c) 2025-2026 Federico Hoerth <memparanoid@gmail.com>
// SPDX-License-Identifier: GPL-3.0-only
// See LICENSE in the repository root for full license text.

//! Barrier-protected zeroisation of raw regions.

use zeroize::Zeroize;

/// Overwrites `len` bytes at `ptr` with zero.
///
/// Backed by `zeroize`, whose write-then-fence sequence the compiler
/// may not elide even when the region is never read again.
///
/// # Safety
///
/// `ptr` must be valid for writes of `len` bytes.
#[inline]
pub unsafe fn cleanse(ptr: *mut u8, len: usize) {
    if len == 0 {
        return;
    }

    let region = unsafe { core::slice::from_raw_parts_mut(ptr, len) };
    region.zeroize();
}
