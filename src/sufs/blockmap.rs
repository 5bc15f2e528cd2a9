//! Direct and indirect data-block addressing: translating a file's
//! logical block index into a physical filesystem block, and growing
//! the indirect tree on write.

use super::dinode::{Dinode, NDADDR};
use super::{read_fs_block_raw, Sufs};
use crate::block::BlockDevice;
use crate::errno::{Errno, SufsResult};

/// Outcome of allocating a data block: either it succeeded (returning
/// the physical block number) or the device is out of data blocks.
pub enum BlockAllocOutcome {
    Allocated(u32),
    NoSpace,
}

/// Which indirection level `idx` (a logical block index already past
/// the direct range) falls into, and the per-level sub-indices needed
/// to walk down to it.
enum Tier {
    Single { l1: u32 },
    Double { l1: u32, l2: u32 },
    Triple { l1: u32, l2: u32, l3: u32 },
}

/// All arithmetic here is widened to `u64`: `nindir` can be up to
/// 16384 (64 KiB blocks / 4-byte pointers), so `nindir^3` overflows
/// `u32` well before it overflows a logical block index.
fn classify(idx: u32, nindir: u32) -> SufsResult<Tier> {
    let nindir = nindir as u64;
    let idx = idx as u64 - NDADDR as u64;
    if idx < nindir {
        return Ok(Tier::Single { l1: idx as u32 });
    }
    let idx = idx - nindir;
    if idx < nindir * nindir {
        return Ok(Tier::Double { l1: (idx / nindir) as u32, l2: (idx % nindir) as u32 });
    }
    let idx = idx - nindir * nindir;
    if idx < nindir * nindir * nindir {
        let l1 = idx / (nindir * nindir);
        let rem = idx % (nindir * nindir);
        return Ok(Tier::Triple { l1: l1 as u32, l2: (rem / nindir) as u32, l3: (rem % nindir) as u32 });
    }
    Err(Errno::Efbig)
}

impl<D: BlockDevice> Sufs<D> {
    pub(crate) fn nindir(&self) -> u32 {
        self.sb.nindir() as u32
    }

    /// Read block-pointer entry `entry_idx` out of indirect block
    /// `block`, using the shared indirect-block scratch buffer so the
    /// caller's own block buffer (holding file payload) is untouched.
    fn read_indirect_entry(&mut self, block: u32, entry_idx: u32) -> SufsResult<u32> {
        read_fs_block_raw(&self.device, &self.sb, block, &mut self.indirect_buf)?;
        let off = entry_idx as usize * 4;
        Ok(u32::from_le_bytes(self.indirect_buf[off..off + 4].try_into().unwrap()))
    }

    fn write_indirect_entry(&mut self, block: u32, entry_idx: u32, value: u32) -> SufsResult<()> {
        read_fs_block_raw(&self.device, &self.sb, block, &mut self.indirect_buf)?;
        let off = entry_idx as usize * 4;
        self.indirect_buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
        let buf = core::mem::take(&mut self.indirect_buf);
        let result = self.write_fs_block(block, &buf);
        self.indirect_buf = buf;
        result
    }

    /// Translate the `idx`-th logical data block of `inode` into a
    /// physical filesystem block number, or `0` if that slot (or an
    /// ancestor indirect block) has never been allocated — a sparse
    /// hole, not an error.
    pub(crate) fn get_data_block(&mut self, inode: &Dinode, idx: u32) -> SufsResult<u32> {
        if idx < NDADDR as u32 {
            return Ok(inode.di_db[idx as usize]);
        }
        let nindir = self.nindir();
        match classify(idx, nindir)? {
            Tier::Single { l1 } => {
                let root = inode.di_ib[0];
                if root == 0 {
                    return Ok(0);
                }
                self.read_indirect_entry(root, l1)
            }
            Tier::Double { l1, l2 } => {
                let root = inode.di_ib[1];
                if root == 0 {
                    return Ok(0);
                }
                let mid = self.read_indirect_entry(root, l1)?;
                if mid == 0 {
                    return Ok(0);
                }
                self.read_indirect_entry(mid, l2)
            }
            Tier::Triple { l1, l2, l3 } => {
                let root = inode.di_ib[2];
                if root == 0 {
                    return Ok(0);
                }
                let mid = self.read_indirect_entry(root, l1)?;
                if mid == 0 {
                    return Ok(0);
                }
                let leaf = self.read_indirect_entry(mid, l2)?;
                if leaf == 0 {
                    return Ok(0);
                }
                self.read_indirect_entry(leaf, l3)
            }
        }
    }

    /// Ensure an indirect block exists at `*slot`, allocating one
    /// (zero-filled) if not, and return it.
    fn ensure_indirect_block(&mut self, slot: &mut u32) -> SufsResult<u32> {
        if *slot != 0 {
            return Ok(*slot);
        }
        let block = match self.dballoc()? {
            Some(b) => b,
            None => return Err(Errno::Enospc),
        };
        let zero = alloc::vec![0u8; self.sb.block_size as usize];
        self.write_fs_block(block, &zero)?;
        *slot = block;
        Ok(block)
    }

    /// Mirror of [`get_data_block`](Self::get_data_block) that
    /// allocates any missing indirect pages and the final data block
    /// along the way. `di_nblocks` is only updated for direct slots,
    /// matching the distinct bookkeeping of "blocks directly reachable
    /// from the inode" versus "blocks reachable at all".
    pub(crate) fn alloc_data_block(&mut self, inode: &mut Dinode, idx: u32) -> SufsResult<BlockAllocOutcome> {
        if idx < NDADDR as u32 {
            if inode.di_db[idx as usize] != 0 {
                return Ok(BlockAllocOutcome::Allocated(inode.di_db[idx as usize]));
            }
            let block = match self.dballoc()? {
                Some(b) => b,
                None => return Ok(BlockAllocOutcome::NoSpace),
            };
            inode.di_db[idx as usize] = block;
            inode.nblocks += 1;
            return Ok(BlockAllocOutcome::Allocated(block));
        }

        let nindir = self.nindir();
        let tier = classify(idx, nindir)?;
        let outcome = match tier {
            Tier::Single { l1 } => self.alloc_through_level(&mut inode.di_ib[0], &[l1])?,
            Tier::Double { l1, l2 } => self.alloc_through_level(&mut inode.di_ib[1], &[l1, l2])?,
            Tier::Triple { l1, l2, l3 } => self.alloc_through_level(&mut inode.di_ib[2], &[l1, l2, l3])?,
        };
        Ok(outcome)
    }

    /// Walk `root` down through `path` (one index per indirection
    /// level), allocating any missing indirect block or final data
    /// block as it goes.
    fn alloc_through_level(&mut self, root: &mut u32, path: &[u32]) -> SufsResult<BlockAllocOutcome> {
        let mut block = match self.ensure_indirect_block(root) {
            Ok(b) => b,
            Err(Errno::Enospc) => return Ok(BlockAllocOutcome::NoSpace),
            Err(e) => return Err(e),
        };
        for (depth, &entry_idx) in path.iter().enumerate() {
            let is_last = depth == path.len() - 1;
            let mut next = self.read_indirect_entry(block, entry_idx)?;
            if next == 0 {
                let new_block = match self.dballoc()? {
                    Some(b) => b,
                    None => return Ok(BlockAllocOutcome::NoSpace),
                };
                if !is_last {
                    let zero = alloc::vec![0u8; self.sb.block_size as usize];
                    self.write_fs_block(new_block, &zero)?;
                }
                self.write_indirect_entry(block, entry_idx, new_block)?;
                next = new_block;
            }
            block = next;
        }
        Ok(BlockAllocOutcome::Allocated(block))
    }

    #[cfg_attr(not(test), allow(dead_code))]
    fn max_addressable_blocks(&self) -> u64 {
        let nindir = self.nindir() as u64;
        NDADDR as u64 + nindir + nindir * nindir + nindir * nindir * nindir
    }

    /// Release every data block reachable from `inode`, direct and
    /// indirect alike, including the indirect pointer blocks
    /// themselves. Used by `unlink`/`rmdir` to reclaim a file's full
    /// block tree.
    pub(crate) fn free_all_blocks(&mut self, inode: &Dinode) -> SufsResult<()> {
        for &direct in inode.di_db.iter() {
            if direct != 0 {
                self.dbfree(direct)?;
            }
        }
        for (level, &root) in inode.di_ib.iter().enumerate() {
            if root != 0 {
                self.free_indirect_tree(root, level as u32 + 1)?;
            }
        }
        Ok(())
    }

    /// Free an indirect block at indirection `depth` (1 = points
    /// directly at data blocks, 2/3 = points at further indirect
    /// blocks), then the block itself. Pointer values are read out
    /// into a local buffer before any recursive call, since recursion
    /// reuses the same scratch buffer this read just filled.
    fn free_indirect_tree(&mut self, block: u32, depth: u32) -> SufsResult<()> {
        let nindir = self.nindir();
        read_fs_block_raw(&self.device, &self.sb, block, &mut self.indirect_buf)?;
        let mut entries = alloc::vec::Vec::with_capacity(nindir as usize);
        for i in 0..nindir {
            let off = i as usize * 4;
            entries.push(u32::from_le_bytes(self.indirect_buf[off..off + 4].try_into().unwrap()));
        }
        for ptr in entries {
            if ptr == 0 {
                continue;
            }
            if depth == 1 {
                self.dbfree(ptr)?;
            } else {
                self.free_indirect_tree(ptr, depth - 1)?;
            }
        }
        self.dbfree(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemoryBlockDevice;
    use crate::sufs::Sufs;

    fn fresh() -> Sufs<MemoryBlockDevice> {
        let dev = MemoryBlockDevice::new(512, 16 * 1024 * 1024 / 512);
        Sufs::format(dev, 256).unwrap()
    }

    #[test]
    fn direct_block_allocates_and_reads_back() {
        let mut fs = fresh();
        let mut inode = Dinode::new_file(5, 0o644);
        let BlockAllocOutcome::Allocated(b) = fs.alloc_data_block(&mut inode, 0).unwrap() else { panic!() };
        assert_ne!(b, 0);
        assert_eq!(fs.get_data_block(&inode, 0).unwrap(), b);
        assert_eq!(inode.nblocks, 1);
    }

    #[test]
    fn single_indirect_block_round_trips() {
        let mut fs = fresh();
        let mut inode = Dinode::new_file(5, 0o644);
        let idx = NDADDR as u32 + 3;
        let BlockAllocOutcome::Allocated(b) = fs.alloc_data_block(&mut inode, idx).unwrap() else { panic!() };
        assert_ne!(b, 0);
        assert_eq!(fs.get_data_block(&inode, idx).unwrap(), b);
        assert_ne!(inode.di_ib[0], 0);
    }

    #[test]
    fn double_indirect_block_round_trips() {
        let mut fs = fresh();
        let mut inode = Dinode::new_file(5, 0o644);
        let nindir = fs.nindir();
        let idx = NDADDR as u32 + nindir + 5;
        let BlockAllocOutcome::Allocated(b) = fs.alloc_data_block(&mut inode, idx).unwrap() else { panic!() };
        assert_ne!(b, 0);
        assert_eq!(fs.get_data_block(&inode, idx).unwrap(), b);
        assert_ne!(inode.di_ib[1], 0);
    }

    #[test]
    fn triple_indirect_block_round_trips() {
        let mut fs = fresh();
        let mut inode = Dinode::new_file(5, 0o644);
        let nindir = fs.nindir() as u64;
        let idx = NDADDR as u64 + nindir + nindir * nindir + 7;
        let BlockAllocOutcome::Allocated(b) = fs.alloc_data_block(&mut inode, idx as u32).unwrap() else { panic!() };
        assert_ne!(b, 0);
        assert_eq!(fs.get_data_block(&inode, idx as u32).unwrap(), b);
        assert_ne!(inode.di_ib[2], 0);
    }

    #[test]
    fn unallocated_slot_reads_back_as_sparse_hole() {
        let mut fs = fresh();
        let inode = Dinode::new_file(5, 0o644);
        assert_eq!(fs.get_data_block(&inode, 2).unwrap(), 0);
    }

    #[test]
    fn addressing_past_triple_indirect_range_is_efbig() {
        let mut fs = fresh();
        let mut inode = Dinode::new_file(5, 0o644);
        let past_max = fs.max_addressable_blocks() as u32;
        assert!(matches!(fs.alloc_data_block(&mut inode, past_max), Err(Errno::Efbig)));
    }
}
