// Copyright (c) 2025-2026 Federico Hoerth <memparanoid@gmail.com>
// SPDX-License-Identifier: GPL-3.0-only
// See LICENSE in the repository root for full license text.

//! mempage - Guarded, locked, dump-excluded mappings for secret storage.
//!
//! Provides the platform substrate for a secure heap: an anonymous
//! private mapping flanked by two `PROT_NONE` guard pages, with the
//! inner region locked resident (`mlock`/`mlock2`) and excluded from
//! core dumps (`MADV_DONTDUMP`), plus a barrier-protected `cleanse`
//! for zeroising freed secrets.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

#[cfg(test)]
mod tests;

mod arena;
mod cleanse;
mod error;

pub use arena::{page_size, ArenaMap, FALLBACK_PAGE_SIZE};
pub use cleanse::cleanse;
pub use error::MapError;
