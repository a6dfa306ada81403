// Copyright (c) 2025-2026 Federico Hoerth <memparanoid@gmail.com>
// SPDX-License-Identifier: GPL-3.0-only
// See LICENSE in the repository root for full license text.

//! memheap - Buddy-allocated secure heap for short-lived secrets.
//!
//! A fixed-size arena mapped with guard pages, locked resident and
//! excluded from core dumps, carved up by a binary buddy allocator
//! whose bookkeeping lives outside the arena. Freed blocks are
//! zeroised before they return to the free pool.
//!
//! [`SecureHeap`] is an independent arena handle; the `secure_*`
//! functions wrap one process-wide default instance behind a single
//! lock and fall back to the host allocator while uninstalled.

#![warn(missing_docs)]

#[cfg(test)]
mod tests;

mod bits;
mod error;
mod global;
mod heap;
mod list;

pub use error::HeapError;
pub use global::{
    secure_actual_size, secure_allocated, secure_clear_free, secure_free, secure_malloc,
    secure_malloc_done, secure_malloc_init, secure_malloc_initialized, secure_used, secure_zalloc,
};
pub use heap::{Hardening, SecureHeap};
