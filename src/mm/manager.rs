//! Memory manager.
//!
//! Owns the page bitmap and frame table; the only component that talks
//! directly to the boot memory map. Extracts usable regions once at
//! init, logs the total, and stores everything behind a single owned
//! structure instead of file-scope statics, skipping the kernel image
//! and multiboot info exactly once, at boot.

use super::frame_table::FrameTable;
use super::page_bitmap::{PageBitmap, PAGE_SIZE};
use crate::boot_info::BootMemoryMap;

/// Kernel virtual address space is bounded: pages above this split are
/// only reachable via transient mappings, pages below are
/// identity-mapped and directly accessible.
pub const HIGH_MEM_START: u64 = 896 * 1024 * 1024;

/// Allocation request flags for [`MemoryManager::alloc_pages`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocFlags {
    /// Prefer memory above [`HIGH_MEM_START`], falling back below it.
    pub highmem: bool,
    /// A mandatory kernel allocation: out-of-memory is fatal, not `None`.
    pub kernel: bool,
}

impl AllocFlags {
    /// No special placement; failure returns `None`.
    pub const NONE: AllocFlags = AllocFlags { highmem: false, kernel: false };
    /// Mandatory kernel allocation below [`HIGH_MEM_START`]; OOM panics.
    pub const KERNEL: AllocFlags = AllocFlags { highmem: false, kernel: true };
}

/// Owns the physical page bitmap and the frame descriptor table.
pub struct MemoryManager {
    bitmap: PageBitmap,
    frame_table: FrameTable,
}

impl MemoryManager {
    /// Validates the boot map is present, finds `mem_end` as the last
    /// available region's end (capped at 2^32), lays the frame table
    /// and bitmap out starting at `kernel_end` (just past the static
    /// kernel image — callers provide this rather than the crate
    /// reading linker symbols itself), and excludes every hole between
    /// successive available regions.
    ///
    /// Panics if the boot map has no usable region at all.
    pub fn init(boot_map: &BootMemoryMap, kernel_end: u64) -> Self {
        assert!(boot_map.has_usable_region(), "memory manager: no usable region in boot map");
        let mem_end = boot_map.highest_usable_end().expect("checked above");

        let (mut bitmap, _usable_start) = PageBitmap::init(kernel_end, mem_end);

        let mut regions: alloc::vec::Vec<_> = boot_map.usable_regions().collect();
        regions.sort_by_key(|r| r.start);

        let mut prev_end = bitmap.mem_start();
        for region in &regions {
            let start = region.start.max(bitmap.mem_start());
            let end = region.end.min(bitmap.mem_end());
            if start >= end {
                continue;
            }
            if start > prev_end {
                bitmap.exclude(prev_end, start);
            }
            prev_end = prev_end.max(end);
        }
        if prev_end < bitmap.mem_end() {
            bitmap.exclude(prev_end, bitmap.mem_end());
        }

        let npages = ((bitmap.mem_end() - bitmap.mem_start()) / PAGE_SIZE) as usize;
        let frame_table = FrameTable::new(bitmap.mem_start(), PAGE_SIZE, npages);

        log::info!(
            "memory manager initialized: {:#x}..{:#x} ({} pages)",
            bitmap.mem_start(),
            bitmap.mem_end(),
            npages
        );

        MemoryManager { bitmap, frame_table }
    }

    /// Try high memory first when asked, otherwise (or on fallback)
    /// allocate below [`HIGH_MEM_START`]. Panics on out-of-memory if
    /// `flags.kernel` is set.
    pub fn alloc_pages(&mut self, n: usize, flags: AllocFlags) -> Option<u64> {
        let addr = if flags.highmem {
            self.bitmap
                .alloc_above(n, HIGH_MEM_START)
                .or_else(|| self.bitmap.alloc_below(n, HIGH_MEM_START))
        } else {
            self.bitmap.alloc_below(n, HIGH_MEM_START)
        };

        if addr.is_none() && flags.kernel {
            panic!("memory manager: out of memory allocating {} kernel pages", n);
        }
        addr
    }

    /// Return `n` pages starting at `addr` to the free pool.
    pub fn free_pages(&mut self, addr: u64, n: usize) {
        self.bitmap.free(addr, n);
    }

    /// Read-only access to the frame table, for slab reverse lookups.
    pub fn frame_table(&self) -> &FrameTable {
        &self.frame_table
    }

    /// Mutable access to the frame table, for slab stamping.
    pub fn frame_table_mut(&mut self) -> &mut FrameTable {
        &mut self.frame_table
    }
}
