//! Page-granular bitmap allocator.
//!
//! One bit per physical page frame in `[mem_start, mem_end)`. Backed by
//! [`super::bitmap`]'s run-finding routines; this module only adds the
//! page<->address translation and the placement rules around `init` and
//! `exclude`. Storage is a heap `Vec<u8>` rather than a raw pointer into
//! the region it describes — a real kernel target places the bitmap's
//! backing bytes at `mem_start` itself (see `DESIGN.md`), but the
//! allocation algorithm is identical either way and this keeps the type
//! host-testable.

use super::bitmap;
use alloc::vec;
use alloc::vec::Vec;

/// Size of one page frame.
pub const PAGE_SIZE: u64 = 4096;

fn align_up(addr: u64, align: u64) -> u64 {
    (addr + align - 1) & !(align - 1)
}

fn align_down(addr: u64, align: u64) -> u64 {
    addr & !(align - 1)
}

/// A bit-per-page allocator over `[mem_start, mem_end)`.
pub struct PageBitmap {
    mem_start: u64,
    mem_end: u64,
    npages: usize,
    words: Vec<u8>,
}

impl PageBitmap {
    /// Aligns `mem_start` up to machine-word size and `mem_end` down
    /// to a page boundary, then returns the first address past the
    /// bitmap's own storage (`usable_start`) — in a real kernel this
    /// is where the caller may start handing frames out; here it is
    /// purely informational since storage is heap-allocated rather
    /// than placed in-region.
    ///
    /// Panics if `mem_start >= mem_end` after alignment.
    pub fn init(mem_start: u64, mem_end: u64) -> (Self, u64) {
        let mem_start = align_up(mem_start, core::mem::size_of::<usize>() as u64);
        let mem_end = align_down(mem_end, PAGE_SIZE);
        assert!(mem_start < mem_end, "page bitmap: mem_start >= mem_end");

        let npages = ((mem_end - mem_start) / PAGE_SIZE) as usize;
        let nwords = bitmap::words_for_bits(npages);
        let mut words = vec![0u8; nwords.max(1)];

        // The last word may cover tail bits with no corresponding real
        // frame (npages not a multiple of WORD_BITS); mark them used so
        // a scan never hands one out.
        let tail_bits = nwords * bitmap::WORD_BITS - npages;
        if tail_bits > 0 {
            bitmap::set_range(&mut words, npages, tail_bits);
        }

        let usable_start = mem_start + (nwords as u64 * PAGE_SIZE).min(mem_end - mem_start);
        let bmap = PageBitmap { mem_start, mem_end, npages, words };
        (bmap, align_up(usable_start, PAGE_SIZE))
    }

    /// Lowest address managed by this bitmap.
    pub fn mem_start(&self) -> u64 {
        self.mem_start
    }

    /// First address past the region managed by this bitmap.
    pub fn mem_end(&self) -> u64 {
        self.mem_end
    }

    fn page_index(&self, addr: u64) -> Option<usize> {
        if addr < self.mem_start || addr >= self.mem_end {
            return None;
        }
        Some(((addr - self.mem_start) / PAGE_SIZE) as usize)
    }

    fn index_to_addr(&self, idx: usize) -> u64 {
        self.mem_start + idx as u64 * PAGE_SIZE
    }

    /// Mark `[floor(lo), ceil(hi))` used. Called only before any
    /// allocation.
    pub fn exclude(&mut self, lo: u64, hi: u64) {
        let lo = align_down(lo.max(self.mem_start), PAGE_SIZE);
        let hi = align_up(hi.min(self.mem_end), PAGE_SIZE);
        if lo >= hi {
            return;
        }
        let start = ((lo - self.mem_start) / PAGE_SIZE) as usize;
        let len = ((hi - lo) / PAGE_SIZE) as usize;
        bitmap::set_range(&mut self.words, start, len);
    }

    /// Allocate `n` contiguous frames anywhere in the managed range.
    pub fn alloc(&mut self, n: usize) -> Option<u64> {
        self.alloc_range(n, self.mem_start, self.mem_end)
    }

    /// Allocate `n` contiguous frames at or above `lo`.
    pub fn alloc_above(&mut self, n: usize, lo: u64) -> Option<u64> {
        self.alloc_range(n, lo, self.mem_end)
    }

    /// Allocate `n` contiguous frames below `hi`.
    pub fn alloc_below(&mut self, n: usize, hi: u64) -> Option<u64> {
        self.alloc_range(n, self.mem_start, hi)
    }

    /// Allocate `n` contiguous frames within `[lo, hi)`.
    pub fn alloc_range(&mut self, n: usize, lo: u64, hi: u64) -> Option<u64> {
        if n == 0 {
            return None;
        }
        let lo = lo.max(self.mem_start);
        let hi = hi.min(self.mem_end);
        if lo >= hi {
            return None;
        }
        let lo_idx = self.page_index(lo)?;
        let hi_idx = ((hi - self.mem_start) / PAGE_SIZE) as usize;
        let start = bitmap::alloc_run(&mut self.words, self.npages, n, lo_idx, hi_idx, None)?;
        Some(self.index_to_addr(start))
    }

    /// Free `n` frames starting at `addr`. Idempotent on an
    /// already-free run.
    pub fn free(&mut self, addr: u64, n: usize) {
        if let Some(idx) = self.page_index(addr) {
            bitmap::free_run(&mut self.words, idx, n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_returns_distinct_runs() {
        let (mut bmap, _) = PageBitmap::init(0, 16 * PAGE_SIZE);
        let a = bmap.alloc(2).unwrap();
        let b = bmap.alloc(2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn free_then_realloc_returns_same_run() {
        let (mut bmap, _) = PageBitmap::init(0, 16 * PAGE_SIZE);
        let a = bmap.alloc(4).unwrap();
        bmap.free(a, 4);
        let b = bmap.alloc(4).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_page_alloc_fails_without_mutating() {
        let (mut bmap, _) = PageBitmap::init(0, 4 * PAGE_SIZE);
        assert_eq!(bmap.alloc(0), None);
        // Bitmap is still entirely free.
        assert_eq!(bmap.alloc(4), Some(bmap.mem_start()));
    }

    #[test]
    fn exclude_removes_region_from_allocation() {
        let (mut bmap, _) = PageBitmap::init(0, 4 * PAGE_SIZE);
        bmap.exclude(0, 2 * PAGE_SIZE);
        let a = bmap.alloc(1).unwrap();
        assert_eq!(a, 2 * PAGE_SIZE);
    }

    #[test]
    fn alloc_above_respects_floor() {
        let (mut bmap, _) = PageBitmap::init(0, 8 * PAGE_SIZE);
        let a = bmap.alloc_above(1, 4 * PAGE_SIZE).unwrap();
        assert!(a >= 4 * PAGE_SIZE);
    }

    #[test]
    fn alloc_below_respects_ceiling() {
        let (mut bmap, _) = PageBitmap::init(0, 8 * PAGE_SIZE);
        let a = bmap.alloc_below(1, 4 * PAGE_SIZE).unwrap();
        assert!(a < 4 * PAGE_SIZE);
    }

    #[test]
    fn window_outside_managed_memory_fails() {
        let (mut bmap, _) = PageBitmap::init(0, 4 * PAGE_SIZE);
        assert_eq!(bmap.alloc_range(1, 100 * PAGE_SIZE, 200 * PAGE_SIZE), None);
    }

    #[test]
    fn invariant_allocated_bits_were_clear_before_call() {
        let (mut bmap, _) = PageBitmap::init(0, 64 * PAGE_SIZE);
        let a = bmap.alloc(5).unwrap();
        let idx = ((a - bmap.mem_start()) / PAGE_SIZE) as usize;
        for i in idx..idx + 5 {
            assert!(bitmap::is_set(&bmap.words, i));
        }
    }

    #[test]
    #[should_panic(expected = "mem_start >= mem_end")]
    fn init_panics_on_empty_region() {
        let _ = PageBitmap::init(PAGE_SIZE, 0);
    }
}
