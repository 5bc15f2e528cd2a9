//! On-disk superblock: fixed 512-byte record at byte offset 1024 of
//! the volume.

use super::dinode::{DINODE_SIZE, NDADDR};
use super::dir::DENTRY_SIZE;
use crate::errno::{Errno, SufsResult};

/// Byte offset of the superblock within the volume.
pub const SUPERBLOCK_OFFSET: u64 = 1024;
/// On-disk size of the superblock record.
pub const SUPERBLOCK_SIZE: usize = 512;
/// Only sector size this version understands.
pub const SECTOR_SIZE: u32 = 512;

pub const MAGIC: u32 = 0xB270_8A7E;

const VOLNAME_LEN: usize = 16;

/// The SUFS superblock, held in memory for the lifetime of a mount and
/// written back through to disk whenever a mutator changes free counts
/// or the maximum file size.
#[derive(Debug, Clone, Copy)]
pub struct Superblock {
    pub magic: u32,
    pub block_size: u32,
    pub total_blocks: u32,
    pub inode_count: u32,
    pub inode_free_count: u32,
    pub dblock_count: u32,
    pub dblock_free_count: u32,
    pub inode_map_boff: u32,
    pub inode_map_bsize: u32,
    pub dblock_map_boff: u32,
    pub dblock_map_bsize: u32,
    pub inodes_boff: u32,
    pub dblocks_boff: u32,
    pub root_inum: u32,
    pub mtime: u64,
    pub max_file_size: u64,
    pub volume_name: [u8; VOLNAME_LEN],
}

impl Superblock {
    /// Block pointers are 4 bytes on disk: entries per indirect block.
    pub fn nindir(&self) -> u64 {
        self.block_size as u64 / 4
    }

    /// Sectors making up one filesystem block.
    pub fn secpb(&self) -> u32 {
        self.block_size / SECTOR_SIZE
    }

    /// Dinodes per block.
    pub fn inopb(&self) -> u32 {
        self.block_size / DINODE_SIZE as u32
    }

    /// Bitmap entries (inodes or data blocks) represented per map block.
    pub fn mapentpb(&self) -> u32 {
        self.block_size * 8
    }

    /// Directory entries per data block.
    pub fn dentpb(&self) -> u32 {
        self.block_size / DENTRY_SIZE as u32
    }

    /// `NDADDR + nindir + nindir^2 + nindir^3` blocks, in bytes.
    pub fn computed_max_file_size(&self) -> u64 {
        let nindir = self.nindir();
        let blocks = NDADDR as u64 + nindir + nindir * nindir + nindir * nindir * nindir;
        blocks * self.block_size as u64
    }

    fn iblock_count(&self) -> u32 {
        (self.inode_count + self.inopb() - 1) / self.inopb()
    }

    fn sb_block(&self) -> u32 {
        (SUPERBLOCK_OFFSET / self.block_size as u64) as u32
    }

    /// Validate every layout invariant against a device with
    /// `total_sectors` 512-byte sectors. Does not touch the max-file-size
    /// self-heal — callers recompute and rewrite that separately, since
    /// it mutates the superblock and must be followed by a disk write.
    pub fn validate(&self, total_sectors: u64) -> SufsResult<()> {
        if self.magic != MAGIC {
            return Err(Errno::Einval);
        }
        if !self.block_size.is_power_of_two() || self.block_size < SECTOR_SIZE || self.block_size > 65536 {
            return Err(Errno::Einval);
        }
        let device_blocks = total_sectors / self.secpb() as u64;
        if self.total_blocks as u64 > device_blocks {
            return Err(Errno::Einval);
        }
        let sb_block = self.sb_block();
        if sb_block + 1 > self.inode_map_boff {
            return Err(Errno::Einval);
        }
        if self.inode_map_boff + self.inode_map_bsize > self.dblock_map_boff {
            return Err(Errno::Einval);
        }
        if self.dblock_map_boff + self.dblock_map_bsize > self.inodes_boff {
            return Err(Errno::Einval);
        }
        if self.inodes_boff + self.iblock_count() > self.dblocks_boff {
            return Err(Errno::Einval);
        }
        if self.dblocks_boff as u64 + self.dblock_count as u64 > self.total_blocks as u64 {
            return Err(Errno::Einval);
        }
        if self.inode_free_count >= self.inode_count || self.dblock_free_count >= self.dblock_count {
            return Err(Errno::Einval);
        }
        Ok(())
    }

    pub fn read_from(buf: &[u8]) -> SufsResult<Superblock> {
        if buf.len() < SUPERBLOCK_SIZE {
            return Err(Errno::Einval);
        }
        let mut volume_name = [0u8; VOLNAME_LEN];
        volume_name.copy_from_slice(&buf[92..92 + VOLNAME_LEN]);
        Ok(Superblock {
            magic: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            block_size: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            total_blocks: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            inode_count: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            inode_free_count: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            dblock_count: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            dblock_free_count: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
            inode_map_boff: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
            inode_map_bsize: u32::from_le_bytes(buf[32..36].try_into().unwrap()),
            dblock_map_boff: u32::from_le_bytes(buf[36..40].try_into().unwrap()),
            dblock_map_bsize: u32::from_le_bytes(buf[40..44].try_into().unwrap()),
            inodes_boff: u32::from_le_bytes(buf[44..48].try_into().unwrap()),
            dblocks_boff: u32::from_le_bytes(buf[48..52].try_into().unwrap()),
            root_inum: u32::from_le_bytes(buf[52..56].try_into().unwrap()),
            mtime: u64::from_le_bytes(buf[56..64].try_into().unwrap()),
            max_file_size: u64::from_le_bytes(buf[64..72].try_into().unwrap()),
            volume_name,
        })
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        buf[..SUPERBLOCK_SIZE].fill(0);
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.block_size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.total_blocks.to_le_bytes());
        buf[12..16].copy_from_slice(&self.inode_count.to_le_bytes());
        buf[16..20].copy_from_slice(&self.inode_free_count.to_le_bytes());
        buf[20..24].copy_from_slice(&self.dblock_count.to_le_bytes());
        buf[24..28].copy_from_slice(&self.dblock_free_count.to_le_bytes());
        buf[28..32].copy_from_slice(&self.inode_map_boff.to_le_bytes());
        buf[32..36].copy_from_slice(&self.inode_map_bsize.to_le_bytes());
        buf[36..40].copy_from_slice(&self.dblock_map_boff.to_le_bytes());
        buf[40..44].copy_from_slice(&self.dblock_map_bsize.to_le_bytes());
        buf[44..48].copy_from_slice(&self.inodes_boff.to_le_bytes());
        buf[48..52].copy_from_slice(&self.dblocks_boff.to_le_bytes());
        buf[52..56].copy_from_slice(&self.root_inum.to_le_bytes());
        buf[56..64].copy_from_slice(&self.mtime.to_le_bytes());
        buf[64..72].copy_from_slice(&self.max_file_size.to_le_bytes());
        buf[92..92 + VOLNAME_LEN].copy_from_slice(&self.volume_name);
    }

    /// Build the superblock a formatter would write for a device of
    /// `total_sectors` 512-byte sectors, `block_size` bytes per block,
    /// and `inode_count` inodes. Splits the remaining blocks between
    /// the data-block map and data-block region. Bit 0 of each map is
    /// reserved, so the free counts start one below the totals.
    pub fn format(total_sectors: u64, block_size: u32, inode_count: u32, root_inum: u32) -> Superblock {
        let secpb = block_size / SECTOR_SIZE;
        let total_blocks = (total_sectors / secpb as u64) as u32;
        let inopb = block_size / DINODE_SIZE as u32;
        let mapentpb = block_size * 8;

        let sb_block = (SUPERBLOCK_OFFSET / block_size as u64) as u32;
        let inode_map_boff = sb_block + 1;
        let inode_map_bsize = (inode_count + mapentpb - 1) / mapentpb;
        let dblock_map_boff = inode_map_boff + inode_map_bsize;
        let iblock_count = (inode_count + inopb - 1) / inopb;

        // Reserve a data-block map sized against the remaining device;
        // iterate once since map size depends on the data region it
        // describes and vice versa (both small relative to block_size^2,
        // so two passes converge in practice, but a single estimate
        // using the full remaining space is within one map block of
        // optimal and simplifies the formatter).
        let remaining_after_inode_region = |dblock_map_bsize: u32| -> u32 {
            let inodes_boff = dblock_map_boff + dblock_map_bsize;
            let dblocks_boff = inodes_boff + iblock_count;
            total_blocks.saturating_sub(dblocks_boff)
        };
        let mut dblock_count = remaining_after_inode_region(1);
        let mut dblock_map_bsize = (dblock_count + mapentpb - 1) / mapentpb.max(1);
        dblock_count = remaining_after_inode_region(dblock_map_bsize.max(1));
        dblock_map_bsize = ((dblock_count + mapentpb - 1) / mapentpb.max(1)).max(1);
        dblock_count = remaining_after_inode_region(dblock_map_bsize);

        let inodes_boff = dblock_map_boff + dblock_map_bsize;
        let dblocks_boff = inodes_boff + iblock_count;

        let mut sb = Superblock {
            magic: MAGIC,
            block_size,
            total_blocks,
            inode_count,
            inode_free_count: inode_count - 1,
            dblock_count,
            dblock_free_count: dblock_count - 1,
            inode_map_boff,
            inode_map_bsize,
            dblock_map_boff,
            dblock_map_bsize,
            inodes_boff,
            dblocks_boff,
            root_inum,
            mtime: 0,
            max_file_size: 0,
            volume_name: [0u8; VOLNAME_LEN],
        };
        sb.max_file_size = sb.computed_max_file_size();
        sb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Superblock {
        Superblock::format(16 * 1024 * 1024 / 512, 1024, 256, 1)
    }

    #[test]
    fn round_trips_through_bytes() {
        let sb = sample();
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        sb.write_to(&mut buf);
        let back = Superblock::read_from(&buf).unwrap();
        assert_eq!(back.magic, MAGIC);
        assert_eq!(back.block_size, sb.block_size);
        assert_eq!(back.inode_count, sb.inode_count);
        assert_eq!(back.dblocks_boff, sb.dblocks_boff);
        assert_eq!(back.max_file_size, sb.max_file_size);
    }

    #[test]
    fn formatted_layout_passes_validation() {
        let sb = sample();
        sb.validate(16 * 1024 * 1024 / 512).unwrap();
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut sb = sample();
        sb.magic = 0xdead_beef;
        assert_eq!(sb.validate(16 * 1024 * 1024 / 512), Err(Errno::Einval));
    }

    #[test]
    fn computed_max_file_size_matches_formatted_value() {
        let sb = sample();
        assert_eq!(sb.computed_max_file_size(), sb.max_file_size);
    }

    #[test]
    fn bit_zero_reserved_so_free_counts_start_one_below_total() {
        let sb = sample();
        assert_eq!(sb.inode_free_count, sb.inode_count - 1);
        assert_eq!(sb.dblock_free_count, sb.dblock_count - 1);
    }
}
