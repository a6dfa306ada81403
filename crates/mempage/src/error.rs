// Copyright (c) 2025-2026 Federico Hoerth <memparanoid@gmail.com>
// SPDX-License-Identifier: GPL-3.0-only
// See LICENSE in the repository root for full license text.

//! Error types for mempage.

use thiserror::Error;

/// Errors from establishing the arena mapping.
///
/// Only mapping itself is fallible here. Guard installation, memory
/// locking and dump exclusion are advisory and reported as booleans
/// by [`crate::ArenaMap`], never as errors.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum MapError {
    /// Both the anonymous mapping and the `/dev/zero` fallback failed.
    #[error("mapping {0} bytes failed")]
    MapFailed(usize),
}
