// Copyright (c) 2025-2026 Federico Hoerth <memparanoid@gmail.com>
// SPDX-License-Identifier: GPL-3.0-only
// See LICENSE in the repository root for full license text.

//! Error types for memheap.

use thiserror::Error;

use mempage::MapError;

/// Errors from building or installing a secure heap.
///
/// These cover configuration and resource failures at init only.
/// A full heap is reported as a `None` allocation, and structural
/// corruption (double free, out-of-arena write) is a programming
/// error that fails an assertion rather than returning.
#[derive(Debug, Error)]
pub enum HeapError {
    /// Arena size was zero or not a power of two.
    #[error("arena size must be a positive power of two, got {0}")]
    BadArenaSize(usize),

    /// Minimum block size was zero or not a power of two.
    #[error("minimum block size must be a positive power of two, got {0}")]
    BadMinSize(usize),

    /// The arena cannot hold even one minimum-sized block.
    #[error("arena of {arena} bytes cannot hold one {minsize}-byte block")]
    ArenaTooSmall {
        /// Requested arena size.
        arena: usize,
        /// Minimum block size after the link-node adjustment.
        minsize: usize,
    },

    /// The process-wide heap is already installed.
    #[error("secure heap is already initialized")]
    AlreadyInitialized,

    /// The arena mapping could not be established.
    #[error(transparent)]
    Map(#[from] MapError),
}
