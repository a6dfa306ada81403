// Copyright (c) 2025-2026 Federico Hoerth <memparanoid@gmail.com>
// SPDX-License-Identifier: GPL-3.0-only
// See LICENSE in the repository root for full license text.

//! SecureHeap - Binary buddy allocator over a guarded, locked arena.
//!
//! The arena is viewed as a binary tree of potential blocks: class 0
//! is the whole arena, class `L` splits it into `2^L` blocks of
//! `arena_size >> L` bytes. All bookkeeping lives outside the arena:
//! per-class free-list heads plus two bit arrays indexed by
//! `(1 << L) + offset / (arena_size >> L)`, one recording which
//! blocks exist right now and one recording which of those are handed
//! out. The arena itself holds caller data and the link nodes of free
//! blocks, nothing else.
//!
//! Allocation splits the nearest larger free block down to the target
//! class; freeing cleanses the block and coalesces it with its buddy
//! for as long as the buddy is free. Freed memory is zeroised before
//! it returns to the free pool so stale secrets never outlive their
//! allocation.

use core::fmt;
use core::ptr;
use core::ptr::NonNull;

use log::warn;

use mempage::{cleanse, ArenaMap};

use crate::bits::BitTable;
use crate::error::HeapError;
use crate::list::{self, FreeNode};

/// Outcome of the hardening steps at init.
///
/// Guard pages, residency locking and dump exclusion are advisory:
/// when one of them fails the heap still works, but with weaker
/// guarantees. Callers that care should warn on [`Hardening::Partial`];
/// a warning is also logged per failed step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Hardening {
    /// Guards installed, arena locked resident and dump-excluded.
    Full,
    /// At least one advisory hardening step failed.
    Partial,
}

/// A secure heap over one fixed-size, power-of-two arena.
///
/// Each value owns an independent arena; the process-wide façade in
/// [`crate::global`] wraps a single default instance. All methods
/// take `&mut self`, so shared use requires external locking.
pub struct SecureHeap {
    map: ArenaMap,
    arena_size: usize,
    minsize: usize,
    used: usize,
    hardening: Hardening,
    /// Head pointers, one per size class, largest blocks first.
    freelist: Box<[*mut FreeNode]>,
    /// A block exists at this tree node (free or handed out).
    present: BitTable,
    /// The block at this tree node is handed out.
    allocated: BitTable,
}

// Safety: the heap exclusively owns its arena and bookkeeping, and
// every method requires `&mut self`.
unsafe impl Send for SecureHeap {}
unsafe impl Sync for SecureHeap {}

impl SecureHeap {
    /// Maps, seeds and hardens a new arena.
    ///
    /// `arena_size` and `minsize` must be positive powers of two.
    /// `minsize` is doubled until a free block can hold its own link
    /// node, and the arena must hold at least one such block.
    ///
    /// # Errors
    ///
    /// Configuration errors and mapping failure; see [`HeapError`].
    /// Advisory hardening failures are not errors and are reported
    /// via [`SecureHeap::hardening`].
    pub fn new(arena_size: usize, minsize: usize) -> Result<Self, HeapError> {
        if arena_size == 0 || !arena_size.is_power_of_two() {
            return Err(HeapError::BadArenaSize(arena_size));
        }
        if minsize == 0 || !minsize.is_power_of_two() {
            return Err(HeapError::BadMinSize(minsize));
        }

        let mut minsize = minsize;
        while minsize < list::MIN_BLOCK {
            minsize <<= 1;
        }

        if arena_size < minsize {
            return Err(HeapError::ArenaTooSmall {
                arena: arena_size,
                minsize,
            });
        }

        let bittable_size = 2 * (arena_size / minsize);
        let class_count = bittable_size.ilog2() as usize;

        let map = ArenaMap::map(arena_size)?;

        let mut heap = Self {
            map,
            arena_size,
            minsize,
            used: 0,
            hardening: Hardening::Full,
            freelist: vec![ptr::null_mut(); class_count].into_boxed_slice(),
            present: BitTable::new(bittable_size),
            allocated: BitTable::new(bittable_size),
        };

        // Seed: the whole arena is one free block at class 0.
        let arena = heap.arena();
        let root = heap.bit_of(arena, 0);
        heap.present.set(root);
        heap.push_free(0, arena);

        if !heap.map.install_guards() {
            warn!("secure heap: guard pages could not be installed");
            heap.hardening = Hardening::Partial;
        }
        if !heap.map.lock() {
            warn!("secure heap: arena could not be locked resident");
            heap.hardening = Hardening::Partial;
        }
        if !heap.map.exclude_from_dump() {
            warn!("secure heap: arena not excluded from core dumps");
            heap.hardening = Hardening::Partial;
        }

        Ok(heap)
    }

    /// Hands out a block of at least `size` bytes, or `None` when no
    /// class wide enough has a free block. A zero `size` is served
    /// from the smallest class.
    pub fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size > self.arena_size {
            return None;
        }

        // Deepest class whose width still holds `size`.
        let mut target = self.freelist.len() - 1;
        let mut width = self.minsize;
        while width < size {
            width <<= 1;
            target -= 1;
        }

        // Nearest class at or above that width with a free block.
        let start = (0..=target).rev().find(|&s| !self.freelist[s].is_null())?;

        // Split down, pushing the high half first so the low half is
        // popped next: allocations walk the arena front to back.
        let mut class = start;
        while class != target {
            let block = self.freelist[class] as *mut u8;
            let bit = self.bit_of(block, class);
            assert!(!self.allocated.test(bit));
            self.present.clear(bit);
            self.unlink_free(block);

            class += 1;

            let high = unsafe { block.add(self.arena_size >> class) };
            let bit = self.bit_of(high, class);
            self.present.set(bit);
            self.push_free(class, high);

            let bit = self.bit_of(block, class);
            self.present.set(bit);
            self.push_free(class, block);
        }

        let chunk = self.freelist[target] as *mut u8;
        let bit = self.bit_of(chunk, target);
        assert!(self.present.test(bit));
        self.allocated.set(bit);
        self.unlink_free(chunk);

        self.used += self.arena_size >> target;

        #[cfg(debug_assertions)]
        self.audit();

        NonNull::new(chunk)
    }

    /// [`SecureHeap::malloc`] with the first `size` bytes zeroed.
    pub fn zalloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        let chunk = self.malloc(size)?;
        unsafe { chunk.as_ptr().write_bytes(0, size) };
        Some(chunk)
    }

    /// Cleanses and returns a block to the free pool, coalescing with
    /// its buddy for as long as the buddy is whole and free. A null
    /// `ptr` is a no-op.
    ///
    /// The full class width is zeroised before the block is relinked,
    /// so a later reader of freed pages sees zeros (plus the link
    /// node), never stale secrets.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer previously handed out by this
    /// heap and not yet freed. Anything else fails the structural
    /// assertions.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        assert!(self.contains(ptr.cast_const()));

        let mut class = self.class_of(ptr.cast_const());
        let bit = self.bit_of(ptr, class);
        assert!(self.present.test(bit));
        self.allocated.clear(bit);

        let width = self.arena_size >> class;
        unsafe { cleanse(ptr, width) };
        self.used -= width;

        self.push_free(class, ptr);

        let mut block = ptr;
        while let Some(buddy) = self.free_buddy_of(block, class) {
            let bit = self.bit_of(block, class);
            self.present.clear(bit);
            self.unlink_free(block);

            let bit = self.bit_of(buddy, class);
            self.present.clear(bit);
            self.unlink_free(buddy);

            class -= 1;
            if buddy < block {
                block = buddy;
            }

            let bit = self.bit_of(block, class);
            self.present.set(bit);
            self.push_free(class, block);
        }

        #[cfg(debug_assertions)]
        self.audit();
    }

    /// Whether `ptr` falls inside the arena.
    ///
    /// This is a residency predicate: it says which deallocator owns
    /// the pointer, not whether the pointer is currently handed out.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let arena = self.arena() as usize;
        (ptr as usize) >= arena && (ptr as usize) < arena + self.arena_size
    }

    /// Width of the class `ptr` was handed out from (always at least
    /// the requested size). `ptr` must lie inside the arena.
    pub fn actual_size(&self, ptr: *const u8) -> usize {
        assert!(self.contains(ptr));
        self.arena_size >> self.class_of(ptr)
    }

    /// Total bytes currently handed out, counted in class widths.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Hardening outcome recorded at init.
    pub fn hardening(&self) -> Hardening {
        self.hardening
    }

    /// Arena width in bytes.
    pub fn arena_size(&self) -> usize {
        self.arena_size
    }

    /// Effective minimum block size after the link-node adjustment.
    pub fn minsize(&self) -> usize {
        self.minsize
    }

    fn arena(&self) -> *mut u8 {
        self.map.arena()
    }

    fn offset(&self, ptr: *const u8) -> usize {
        assert!(self.contains(ptr));
        ptr as usize - self.arena() as usize
    }

    /// Bit index of the block at `ptr` in class `class`. Asserts the
    /// bijection preconditions: a valid class, class-width alignment
    /// and an in-range index.
    fn bit_of(&self, ptr: *const u8, class: usize) -> usize {
        assert!(class < self.freelist.len());
        let width = self.arena_size >> class;
        let offset = self.offset(ptr);
        assert!(offset & (width - 1) == 0);

        let bit = (1usize << class) + offset / width;
        assert!(bit > 0 && bit < self.present.nbits());
        bit
    }

    /// Current class of the block containing `ptr`, found by walking
    /// up from the leaf until a present ancestor appears. Exactly one
    /// exists for every arena address; every skipped node must be a
    /// left child, or the registers have diverged.
    fn class_of(&self, ptr: *const u8) -> usize {
        let mut class = self.freelist.len() - 1;
        let mut bit = (self.arena_size + self.offset(ptr)) / self.minsize;

        loop {
            assert!(bit > 0);
            if self.present.test(bit) {
                break;
            }
            assert!(bit & 1 == 0);
            bit >>= 1;
            class -= 1;
        }

        class
    }

    /// The sibling of `block` at `class`, if it is currently a whole,
    /// free block. At class 0 the root has no sibling and the probe
    /// lands on the always-clear bit 0.
    fn free_buddy_of(&self, block: *const u8, class: usize) -> Option<*mut u8> {
        let width = self.arena_size >> class;
        let bit = ((1usize << class) + self.offset(block) / width) ^ 1;

        if self.present.test(bit) && !self.allocated.test(bit) {
            let offset = (bit & ((1 << class) - 1)) * width;
            Some(unsafe { self.arena().add(offset) })
        } else {
            None
        }
    }

    fn in_freelist(&self, slot: *mut *mut FreeNode) -> bool {
        let start = self.freelist.as_ptr() as usize;
        let end = start + core::mem::size_of_val(&*self.freelist);
        (slot as usize) >= start && (slot as usize) < end
    }

    fn push_free(&mut self, class: usize, block: *mut u8) {
        assert!(self.contains(block.cast_const()));
        let next = self.freelist[class];
        assert!(next.is_null() || self.contains(next as *const u8));

        let head: *mut *mut FreeNode = &mut self.freelist[class];
        unsafe { list::push(head, block) };
    }

    fn unlink_free(&mut self, block: *mut u8) {
        let next = unsafe { (*(block as *mut FreeNode)).next };
        unsafe { list::unlink(block) };

        if !next.is_null() {
            let slot = unsafe { (*next).p_next };
            assert!(self.in_freelist(slot) || self.contains(slot as *const u8));
        }
    }

    /// Full-state consistency check of the invariants the engine
    /// relies on. Runs after every mutation in debug builds.
    #[cfg(debug_assertions)]
    fn audit(&self) {
        let leaves = self.arena_size / self.minsize;

        // Every minimum-width slot is covered by exactly one present
        // block along its ancestor chain.
        for leaf in 0..leaves {
            let mut covering = 0;
            let mut bit = leaves + leaf;
            while bit > 0 {
                if self.present.test(bit) {
                    covering += 1;
                }
                bit >>= 1;
            }
            assert!(covering == 1, "slot {leaf} covered by {covering} blocks");
        }

        // Allocated implies present, no present node under a present
        // parent, and the used counter matches the allocated sum.
        let mut used = 0;
        for class in 0..self.freelist.len() {
            let width = self.arena_size >> class;
            for i in 0..(1usize << class) {
                let bit = (1usize << class) + i;
                if self.allocated.test(bit) {
                    assert!(self.present.test(bit));
                    used += width;
                }
                if class > 0 && self.present.test(bit) {
                    assert!(!self.present.test(bit >> 1));
                }
            }
        }
        assert!(used == self.used);

        // Each free list holds exactly the present-and-unallocated
        // blocks of its class, with intact link chains.
        for class in 0..self.freelist.len() {
            let mut expected = 0;
            for i in 0..(1usize << class) {
                let bit = (1usize << class) + i;
                if self.present.test(bit) && !self.allocated.test(bit) {
                    expected += 1;
                }
            }

            let mut walked = 0;
            let mut slot = self.freelist.as_ptr().wrapping_add(class) as *mut *mut FreeNode;
            let mut cur = self.freelist[class];
            while !cur.is_null() {
                walked += 1;
                assert!(walked <= leaves, "free list cycle at class {class}");
                assert!(self.contains(cur as *const u8));
                assert!(ptr::eq(unsafe { (*cur).p_next }, slot));

                let bit = self.bit_of(cur as *const u8, class);
                assert!(self.present.test(bit) && !self.allocated.test(bit));

                slot = unsafe { ptr::addr_of_mut!((*cur).next) };
                cur = unsafe { (*cur).next };
            }
            assert!(walked == expected);
        }
    }

    /// Free blocks of one class, head first.
    #[cfg(test)]
    pub(crate) fn free_blocks(&self, class: usize) -> Vec<*mut u8> {
        let mut blocks = Vec::new();
        let mut cur = self.freelist[class];
        while !cur.is_null() {
            blocks.push(cur as *mut u8);
            cur = unsafe { (*cur).next };
        }
        blocks
    }

    #[cfg(test)]
    pub(crate) fn class_count(&self) -> usize {
        self.freelist.len()
    }
}

impl fmt::Debug for SecureHeap {
    /// Geometry only; arena contents never appear in debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureHeap")
            .field("arena_size", &self.arena_size)
            .field("minsize", &self.minsize)
            .field("used", &self.used)
            .field("hardening", &self.hardening)
            .finish_non_exhaustive()
    }
}
