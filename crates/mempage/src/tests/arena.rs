// Copyright (c) 2025-2026 Federico Hoerth <memparanoid@gmail.com>
// SPDX-License-Identifier: GPL-3.0-only
// See LICENSE in the repository root for full license text.

//! Tests for ArenaMap.

use crate::arena::{page_size, ArenaMap, FALLBACK_PAGE_SIZE};

// =============================================================================
// page_size()
// =============================================================================

#[test]
fn test_page_size_is_power_of_two() {
    let page = page_size();
    assert!(page >= FALLBACK_PAGE_SIZE);
    assert!(page.is_power_of_two());
}

// =============================================================================
// map()
// =============================================================================

#[test]
fn test_map_arena_is_writable() {
    let map = ArenaMap::map(page_size()).expect("Failed to map(..)");

    let arena = unsafe { core::slice::from_raw_parts_mut(map.arena(), map.arena_size()) };
    arena.fill(0xAB);
    assert!(arena.iter().all(|&b| b == 0xAB));
}

#[test]
fn test_map_arena_starts_one_page_in() {
    let map = ArenaMap::map(page_size()).expect("Failed to map(..)");

    assert_eq!(map.arena() as usize % map.page(), 0);
    assert_eq!(map.arena_size(), page_size());
}

#[test]
fn test_map_small_arena() {
    // Arenas far below a page still get a full mapping around them.
    let map = ArenaMap::map(64).expect("Failed to map(..)");

    let arena = unsafe { core::slice::from_raw_parts_mut(map.arena(), map.arena_size()) };
    arena.fill(0x5A);
    assert_eq!(map.arena_size(), 64);
}

// =============================================================================
// install_guards() / lock() / exclude_from_dump()
// =============================================================================

#[test]
fn test_install_guards_page_multiple() {
    let map = ArenaMap::map(2 * page_size()).expect("Failed to map(..)");
    assert!(map.install_guards());

    // Arena between the guards must stay writable.
    let arena = unsafe { core::slice::from_raw_parts_mut(map.arena(), map.arena_size()) };
    arena.fill(0x01);
}

#[test]
fn test_install_guards_sub_page_arena() {
    // Mappings are page-granular, so the trailing guard page exists
    // even when the arena itself is smaller than a page.
    let map = ArenaMap::map(64).expect("Failed to map(..)");
    assert!(map.install_guards());

    let arena = unsafe { core::slice::from_raw_parts_mut(map.arena(), map.arena_size()) };
    arena.fill(0x01);
}

#[test]
fn test_lock_and_dump_exclusion_are_advisory() {
    let map = ArenaMap::map(page_size()).expect("Failed to map(..)");

    // mlock can fail under RLIMIT_MEMLOCK; both calls must be safe to
    // issue regardless of outcome.
    let _ = map.lock();
    let _ = map.exclude_from_dump();
}

// =============================================================================
// Drop
// =============================================================================

#[test]
fn test_drop_after_guards() {
    let map = ArenaMap::map(page_size()).expect("Failed to map(..)");
    map.install_guards();
    drop(map);
}
