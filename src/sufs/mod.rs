//! SUFS: a small Unix-style on-disk file system. Superblock-validated
//! mount, path resolution, direct/indirect block addressing, directory
//! maintenance, and file read/write/create/unlink/mkdir/rmdir.
//!
//! Everything here is write-through: there is no in-memory page cache,
//! so every mutator that changes on-disk state issues its block writes
//! before returning.

pub mod bitmap_alloc;
pub mod blockmap;
pub mod dinode;
pub mod dir;
pub mod file_ops;
pub mod superblock;

pub use dinode::Dinode;
pub use dir::DirEntry;
pub use superblock::Superblock;

use crate::block::BlockDevice;
use crate::errno::{Errno, SufsResult};
use alloc::vec;
use alloc::vec::Vec;

/// Default forbidden-byte set for path component validation. Empty: the
/// on-disk 28-byte name field and its NUL termination are the only real
/// constraint SUFS itself imposes. Callers that want to additionally
/// reject bytes like `/` or control characters before a name ever
/// reaches SUFS can pass their own set to `crate::path::is_valid_filename`.
pub const ROOT_FORBIDDEN_CHARS: &[u8] = &[];

/// A mounted SUFS volume: the device, the in-memory superblock, and
/// the three scratch buffers used across reads, writes and indirect
/// block walks. The block buffer and indirect buffer must stay
/// distinct allocations — an indirect walk reads a level of pointers
/// into the indirect buffer while still needing the block buffer free
/// for the eventual data block.
pub struct Sufs<D: BlockDevice> {
    pub(crate) device: D,
    pub(crate) sb: Superblock,
    pub(crate) block_buf: Vec<u8>,
    pub(crate) map_buf: Vec<u8>,
    pub(crate) indirect_buf: Vec<u8>,
}

/// Free function rather than a `&self` method, so callers that also
/// need a disjoint mutable borrow of another field (the indirect-block
/// walk in [`super::blockmap`] reading into `self.indirect_buf`) can
/// call it with `&self.device`/`&self.sb` without the whole-`self`
/// borrow a method call would require.
pub(crate) fn read_fs_block_raw<D: BlockDevice>(device: &D, sb: &Superblock, fs_block: u32, buf: &mut [u8]) -> SufsResult<()> {
    let secpb = sb.secpb() as u64;
    let first_sector = fs_block as u64 * secpb;
    for i in 0..secpb {
        let dev_block_size = device.block_size();
        let start = i as usize * dev_block_size;
        device.read_block(first_sector + i, &mut buf[start..start + dev_block_size]).map_err(|_| Errno::Eio)?;
    }
    Ok(())
}

impl<D: BlockDevice> Sufs<D> {
    /// Read one filesystem block (which may span several device sectors).
    pub(crate) fn read_fs_block(&self, fs_block: u32, buf: &mut [u8]) -> SufsResult<()> {
        read_fs_block_raw(&self.device, &self.sb, fs_block, buf)
    }

    pub(crate) fn write_fs_block(&self, fs_block: u32, buf: &[u8]) -> SufsResult<()> {
        let secpb = self.sb.secpb() as u64;
        let first_sector = fs_block as u64 * secpb;
        for i in 0..secpb {
            let dev_block_size = self.device.block_size();
            let start = i as usize * dev_block_size;
            self.device
                .write_block(first_sector + i, &buf[start..start + dev_block_size])
                .map_err(|_| Errno::Eio)?;
        }
        Ok(())
    }

    pub(crate) fn write_superblock(&self) -> SufsResult<()> {
        let mut buf = vec![0u8; self.sb.block_size as usize];
        self.sb.write_to(&mut buf);
        let sb_fs_block = (superblock::SUPERBLOCK_OFFSET / self.sb.block_size as u64) as u32;
        self.write_fs_block(sb_fs_block, &buf)
    }

    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mount an existing volume: read and validate the superblock,
    /// self-heal `max_file_size` if it disagrees, and allocate scratch
    /// buffers. Only 512-byte device sectors are supported.
    pub fn mount(device: D) -> SufsResult<Sufs<D>> {
        if device.block_size() as u32 != superblock::SECTOR_SIZE {
            return Err(Errno::Einval);
        }
        let mut sector = vec![0u8; device.block_size()];
        device.read_block(superblock::SUPERBLOCK_OFFSET / device.block_size() as u64, &mut sector).map_err(|_| Errno::Eio)?;
        let sb = Superblock::read_from(&sector)?;
        sb.validate(device.num_blocks())?;

        let block_size = sb.block_size as usize;
        let mut fs = Sufs {
            device,
            sb,
            block_buf: vec![0u8; block_size],
            map_buf: vec![0u8; block_size],
            indirect_buf: vec![0u8; block_size],
        };

        let computed = fs.sb.computed_max_file_size();
        if computed != fs.sb.max_file_size {
            log::warn!("sufs: stored max_file_size disagreed with computed value, rewriting superblock");
            fs.sb.max_file_size = computed;
            fs.write_superblock()?;
        }

        log::info!("sufs: mounted volume, {} inodes ({} free), {} data blocks ({} free)",
            fs.sb.inode_count, fs.sb.inode_free_count, fs.sb.dblock_count, fs.sb.dblock_free_count);
        Ok(fs)
    }

    /// Format a fresh volume: build a superblock, zero both maps except
    /// their sentinel bit 0, and write a root directory inode holding
    /// `.` and `..`.
    pub fn format(device: D, inode_count: u32) -> SufsResult<Sufs<D>> {
        if device.block_size() as u32 != superblock::SECTOR_SIZE {
            return Err(Errno::Einval);
        }
        let block_size = 1024u32;
        let root_inum = 1u32;
        let sb = Superblock::format(device.num_blocks(), block_size, inode_count, root_inum);

        let mut fs = Sufs {
            device,
            sb,
            block_buf: vec![0u8; block_size as usize],
            map_buf: vec![0u8; block_size as usize],
            indirect_buf: vec![0u8; block_size as usize],
        };

        // Zero both bitmaps, then reserve bit 0 as the sentinel.
        let zero_block = vec![0u8; block_size as usize];
        for b in 0..fs.sb.inode_map_bsize {
            fs.write_fs_block(fs.sb.inode_map_boff + b, &zero_block)?;
        }
        for b in 0..fs.sb.dblock_map_bsize {
            fs.write_fs_block(fs.sb.dblock_map_boff + b, &zero_block)?;
        }
        {
            let mut map = zero_block.clone();
            crate::mm::bitmap::set_range(&mut map, 0, 1);
            fs.write_fs_block(fs.sb.inode_map_boff, &map)?;
            fs.write_fs_block(fs.sb.dblock_map_boff, &map)?;
        }

        // Allocate the root inode and its `.`/`..` block directly
        // (bypassing ialloc/dballoc's free-count bookkeeping dance,
        // since we already know inode 1 / data block 1 are free on a
        // freshly zeroed map with only bit 0 reserved).
        let root_dblock = fs.sb.dblocks_boff + 1;
        {
            let mut map = vec![0u8; block_size as usize];
            fs.read_fs_block(fs.sb.inode_map_boff, &mut map)?;
            crate::mm::bitmap::set_range(&mut map, root_inum as usize, 1);
            fs.write_fs_block(fs.sb.inode_map_boff, &map)?;
            let mut map = vec![0u8; block_size as usize];
            fs.read_fs_block(fs.sb.dblock_map_boff, &mut map)?;
            crate::mm::bitmap::set_range(&mut map, 1, 1);
            fs.write_fs_block(fs.sb.dblock_map_boff, &map)?;
        }
        fs.sb.inode_free_count -= 1;
        fs.sb.dblock_free_count -= 1;

        let mut root = Dinode::new_dir(root_inum, 0o755);
        root.di_db[0] = root_dblock;
        root.nblocks = 1;
        root.size = fs.sb.block_size as u64;

        let mut dirblock = vec![0u8; block_size as usize];
        dir::DirEntry { inumber: root_inum, name: dir::entry_name(".") }.write_to(&mut dirblock[0..dir::DENTRY_SIZE]);
        dir::DirEntry { inumber: root_inum, name: dir::entry_name("..") }.write_to(&mut dirblock[dir::DENTRY_SIZE..2 * dir::DENTRY_SIZE]);
        fs.write_fs_block(root_dblock, &dirblock)?;

        let inode_fs_block = fs.sb.inodes_boff + root_inum / fs.sb.inopb();
        let slot = (root_inum % fs.sb.inopb()) as usize;
        let mut iblock = vec![0u8; block_size as usize];
        fs.read_fs_block(inode_fs_block, &mut iblock)?;
        root.write_to(&mut iblock[slot * dinode::DINODE_SIZE..(slot + 1) * dinode::DINODE_SIZE]);
        fs.write_fs_block(inode_fs_block, &iblock)?;

        fs.write_superblock()?;
        log::info!("sufs: formatted volume with {} inodes, {} data blocks", fs.sb.inode_count, fs.sb.dblock_count);
        Ok(fs)
    }
}
