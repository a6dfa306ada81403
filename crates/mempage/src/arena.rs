// Copyright (c) 2025-2026 Federico Hoerth <memparanoid@gmail.com>
// SPDX-License-Identifier: GPL-3.0-only
// See LICENSE in the repository root for full license text.

//! ArenaMap - Guard-page-flanked anonymous mapping.
//!
//! The mapping is one page, the arena, one page: the flanking pages
//! become `PROT_NONE` guards so a linear overrun or underrun faults
//! before it can leave the arena. Locking and dump exclusion are
//! best-effort; the caller decides how to report a downgrade.

use core::ptr;

use crate::cleanse::cleanse;
use crate::error::MapError;

/// Page size used when the runtime query fails.
pub const FALLBACK_PAGE_SIZE: usize = 4096;

/// Queries the platform page size, falling back to
/// [`FALLBACK_PAGE_SIZE`] if `sysconf` reports nonsense.
pub fn page_size() -> usize {
    let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if raw < 1 {
        FALLBACK_PAGE_SIZE
    } else {
        raw as usize
    }
}

/// An anonymous private mapping of `page + arena_size + page` bytes.
///
/// The inner `arena_size` bytes start one page into the mapping and
/// hold caller data; the flanking pages are reserved for guards.
/// Unmapped (after cleansing and unlocking the arena) on drop.
#[derive(Debug)]
pub struct ArenaMap {
    map: *mut u8,
    map_size: usize,
    page: usize,
    arena_size: usize,
}

// Safety: the mapping is exclusively owned and callers serialize
// all access to the arena region.
unsafe impl Send for ArenaMap {}
unsafe impl Sync for ArenaMap {}

impl ArenaMap {
    /// Maps a new arena of `arena_size` bytes plus two guard slots.
    ///
    /// Tries an anonymous private mapping first and falls back to a
    /// privately mapped `/dev/zero` descriptor. The arena is readable
    /// and writable; guards are installed separately via
    /// [`ArenaMap::install_guards`].
    ///
    /// # Errors
    ///
    /// Returns [`MapError::MapFailed`] if no mapping could be obtained.
    pub fn map(arena_size: usize) -> Result<Self, MapError> {
        let page = page_size();
        let map_size = page + arena_size + page;

        let map = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        let map = if map == libc::MAP_FAILED {
            Self::map_dev_zero(map_size)?
        } else {
            map as *mut u8
        };

        Ok(Self {
            map,
            map_size,
            page,
            arena_size,
        })
    }

    fn map_dev_zero(map_size: usize) -> Result<*mut u8, MapError> {
        let fd = unsafe { libc::open(c"/dev/zero".as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return Err(MapError::MapFailed(map_size));
        }

        let map = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };

        if map == libc::MAP_FAILED {
            return Err(MapError::MapFailed(map_size));
        }

        Ok(map as *mut u8)
    }

    /// Base of the arena region (one page into the mapping).
    pub fn arena(&self) -> *mut u8 {
        unsafe { self.map.add(self.page) }
    }

    /// Size of the arena region in bytes.
    pub fn arena_size(&self) -> usize {
        self.arena_size
    }

    /// Page size recorded at mapping time.
    pub fn page(&self) -> usize {
        self.page
    }

    /// Sets both flanking pages to `PROT_NONE`.
    ///
    /// The leading guard is page-aligned from `mmap`; the trailing
    /// guard starts at the next page boundary after the arena.
    /// Returns whether both guards are in place.
    pub fn install_guards(&self) -> bool {
        let mut ok =
            unsafe { libc::mprotect(self.map as *mut libc::c_void, self.page, libc::PROT_NONE) }
                == 0;

        let tail = (self.page + self.arena_size + self.page - 1) & !(self.page - 1);
        ok &= unsafe {
            libc::mprotect(
                self.map.add(tail) as *mut libc::c_void,
                self.page,
                libc::PROT_NONE,
            )
        } == 0;

        ok
    }

    /// Locks the arena resident.
    ///
    /// Prefers `mlock2(MLOCK_ONFAULT)` so untouched pages fault in
    /// lazily; falls back to `mlock` where the syscall is missing.
    /// Returns whether the lock is in place.
    #[cfg(target_os = "linux")]
    pub fn lock(&self) -> bool {
        let arena = self.arena() as *const libc::c_void;

        if unsafe { libc::mlock2(arena, self.arena_size, libc::MLOCK_ONFAULT) } == 0 {
            return true;
        }

        let errno = unsafe { *libc::__errno_location() };
        if errno == libc::ENOSYS {
            return unsafe { libc::mlock(arena, self.arena_size) } == 0;
        }

        false
    }

    /// Locks the arena resident via `mlock`.
    #[cfg(not(target_os = "linux"))]
    pub fn lock(&self) -> bool {
        unsafe { libc::mlock(self.arena() as *const libc::c_void, self.arena_size) == 0 }
    }

    /// Asks the kernel to omit the arena from core dumps.
    #[cfg(target_os = "linux")]
    pub fn exclude_from_dump(&self) -> bool {
        unsafe {
            libc::madvise(
                self.arena() as *mut libc::c_void,
                self.arena_size,
                libc::MADV_DONTDUMP,
            ) == 0
        }
    }

    /// No dump-exclusion hint exists off Linux; reports success.
    #[cfg(not(target_os = "linux"))]
    pub fn exclude_from_dump(&self) -> bool {
        true
    }
}

impl Drop for ArenaMap {
    fn drop(&mut self) {
        // The arena stays readable/writable for its whole life, so the
        // final cleanse cannot fault. Guards are torn down with the
        // mapping itself.
        unsafe {
            cleanse(self.arena(), self.arena_size);
            libc::munlock(self.arena() as *const libc::c_void, self.arena_size);
            libc::munmap(self.map as *mut libc::c_void, self.map_size);
        }
    }
}
