// Copyright (c) 2025-2026 Federico Hoerth <memparanoid@gmail.com>
// SPDX-License-Identifier: GPL-3.0-only
// See LICENSE in the repository root for full license text.

//! Intrusive free lists threaded through the free blocks themselves.
//!
//! A free block's first bytes hold its link node, so the arena carries
//! no bookkeeping for allocated blocks at all. `p_next` always points
//! at the slot that points at this node: the list head for the first
//! element, the predecessor's `next` field otherwise. That makes
//! unlinking O(1) without knowing which class list a block is on.

use core::mem::size_of;
use core::ptr;

/// Link node embedded in the leading bytes of every free block.
#[repr(C)]
pub(crate) struct FreeNode {
    pub(crate) next: *mut FreeNode,
    pub(crate) p_next: *mut *mut FreeNode,
}

/// Smallest block that can hold its own link node. Heap init doubles
/// the configured minimum block size until it reaches this.
pub(crate) const MIN_BLOCK: usize = size_of::<FreeNode>();

/// Inserts `block` at the head of the list rooted at `head`.
///
/// # Safety
///
/// `block` must point at least `MIN_BLOCK` writable bytes aligned for
/// `FreeNode`, and `head` must be a valid list head whose chain of
/// back-pointers is intact.
pub(crate) unsafe fn push(head: *mut *mut FreeNode, block: *mut u8) {
    let node = block as *mut FreeNode;

    unsafe {
        (*node).next = *head;
        (*node).p_next = head;

        if !(*node).next.is_null() {
            assert!(ptr::eq((*(*node).next).p_next, head));
            (*(*node).next).p_next = ptr::addr_of_mut!((*node).next);
        }

        *head = node;
    }
}

/// Removes `block` from whichever list it is linked into.
///
/// # Safety
///
/// `block` must currently be linked via [`push`].
pub(crate) unsafe fn unlink(block: *mut u8) {
    let node = block as *mut FreeNode;

    unsafe {
        if !(*node).next.is_null() {
            (*(*node).next).p_next = (*node).p_next;
        }
        *(*node).p_next = (*node).next;
    }
}
