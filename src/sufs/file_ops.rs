//! Mount-level file operations: path resolution, open/close, read,
//! write, and the create/unlink/mkdir/rmdir family.

use super::dinode::{Dinode, DINODE_SIZE};
use super::Sufs;
use crate::block::BlockDevice;
use crate::errno::{Errno, SufsResult};
use crate::path;
use alloc::string::String;
use alloc::vec;

/// An open file: the resolved inumber plus the in-memory copy of its
/// inode. Carries no cursor — callers pass an explicit offset to every
/// read/write, mirroring the contract of `pread`/`pwrite`.
pub struct OpenFile {
    pub inum: u32,
    pub inode: Dinode,
}

impl<D: BlockDevice> Sufs<D> {
    fn inode_location(&self, inum: u32) -> (u32, usize) {
        let inopb = self.sb.inopb();
        (self.sb.inodes_boff + inum / inopb, (inum % inopb) as usize)
    }

    pub(crate) fn iget(&mut self, inum: u32) -> SufsResult<Dinode> {
        let (block, slot) = self.inode_location(inum);
        let block_size = self.sb.block_size as usize;
        let mut buf = vec![0u8; block_size];
        self.read_fs_block(block, &mut buf)?;
        Dinode::read_from(&buf[slot * DINODE_SIZE..(slot + 1) * DINODE_SIZE])
    }

    pub(crate) fn iput(&mut self, inode: &Dinode) -> SufsResult<()> {
        let (block, slot) = self.inode_location(inode.inumber);
        let block_size = self.sb.block_size as usize;
        let mut buf = vec![0u8; block_size];
        self.read_fs_block(block, &mut buf)?;
        inode.write_to(&mut buf[slot * DINODE_SIZE..(slot + 1) * DINODE_SIZE]);
        self.write_fs_block(block, &buf)
    }

    /// Resolve an already-normalized absolute path to an inumber.
    pub(crate) fn namei(&mut self, path: &str) -> SufsResult<u32> {
        if path == "/" {
            return Ok(self.sb.root_inum);
        }
        let mut cur = self.sb.root_inum;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let dir = self.iget(cur)?;
            if !dir.is_dir() {
                return Err(Errno::Enotdir);
            }
            let next = self.search_dir(&dir, component)?;
            if next == 0 {
                return Err(Errno::Enoent);
            }
            cur = next;
        }
        Ok(cur)
    }

    fn normalize(path: &str) -> String {
        crate::path::format_path_owned(path, "/")
    }

    /// Split a normalized absolute path into its parent directory path
    /// and final component name.
    fn split_last(path: &str) -> (String, &str) {
        match path.rsplit_once('/') {
            Some(("", name)) => (String::from("/"), name),
            Some((parent, name)) => (String::from(parent), name),
            None => (String::from("/"), path),
        }
    }

    /// `open(path)`: normalize, resolve, and load the inode.
    pub fn open(&mut self, path: &str) -> SufsResult<OpenFile> {
        let normalized = Self::normalize(path);
        let inum = self.namei(&normalized)?;
        let inode = self.iget(inum)?;
        Ok(OpenFile { inum, inode })
    }

    /// `close(fd)`: write the inode back, releasing the in-memory copy.
    pub fn close(&mut self, file: OpenFile) -> SufsResult<()> {
        self.iput(&file.inode)
    }

    /// `read(fd, buf, offset, n)`.
    pub fn read(&mut self, file: &OpenFile, buf: &mut [u8], offset: u64, n: usize) -> SufsResult<usize> {
        if offset >= file.inode.size {
            return Err(Errno::Einval);
        }
        let n = n.min((file.inode.size - offset) as usize);
        let block_size = self.sb.block_size as u64;
        let mut done = 0usize;
        while done < n {
            let pos = offset + done as u64;
            let block_idx = (pos / block_size) as u32;
            let block_off = (pos % block_size) as usize;
            let chunk = (block_size as usize - block_off).min(n - done);

            let fs_block = self.get_data_block(&file.inode, block_idx)?;
            if fs_block == 0 {
                buf[done..done + chunk].fill(0);
            } else {
                let block_size_usize = self.sb.block_size as usize;
                let mut tmp = vec![0u8; block_size_usize];
                self.read_fs_block(fs_block, &mut tmp)?;
                buf[done..done + chunk].copy_from_slice(&tmp[block_off..block_off + chunk]);
            }
            done += chunk;
        }
        Ok(done)
    }

    /// `write(fd, data, offset, n)`. Allocates new data blocks as the
    /// write extends past `di_nblocks`. An allocation failure mid-write
    /// returns the partial byte count if any bytes landed, else `-1`
    /// (here: `Err(Errno::Enospc)`) with nothing written for that call.
    pub fn write(&mut self, file: &mut OpenFile, data: &[u8], offset: u64, n: usize) -> SufsResult<usize> {
        if file.inode.is_dir() {
            return Err(Errno::Eisdir);
        }
        let n = n.min(data.len());
        if offset.checked_add(n as u64).map(|end| end > self.sb.max_file_size).unwrap_or(true) {
            return Err(Errno::Efbig);
        }

        let block_size = self.sb.block_size as u64;
        let mut done = 0usize;
        while done < n {
            let pos = offset + done as u64;
            let block_idx = (pos / block_size) as u32;
            let block_off = (pos % block_size) as usize;
            let chunk = (block_size as usize - block_off).min(n - done);

            let fs_block = match self.alloc_data_block(&mut file.inode, block_idx) {
                Ok(super::blockmap::BlockAllocOutcome::Allocated(b)) => b,
                Ok(super::blockmap::BlockAllocOutcome::NoSpace) => {
                    break;
                }
                Err(e) => return Err(e),
            };

            let block_size_usize = self.sb.block_size as usize;
            let mut tmp = vec![0u8; block_size_usize];
            if block_off != 0 || chunk != block_size_usize {
                self.read_fs_block(fs_block, &mut tmp)?;
            }
            tmp[block_off..block_off + chunk].copy_from_slice(&data[done..done + chunk]);
            self.write_fs_block(fs_block, &tmp)?;
            done += chunk;
        }

        if done == 0 && n > 0 {
            return Err(Errno::Enospc);
        }

        let end_offset = offset + done as u64;
        if end_offset > file.inode.size {
            file.inode.size = end_offset;
        }
        file.inode.mtime += 1;
        self.iput(&file.inode)?;
        Ok(done)
    }

    fn prologue(&mut self, path: &str, max_name: usize) -> SufsResult<(u32, Dinode, String)> {
        let normalized = Self::normalize(path);
        let (parent_path, name) = Self::split_last(&normalized);
        if !path::is_valid_filename(name, super::ROOT_FORBIDDEN_CHARS, max_name) {
            return Err(Errno::Enametoolong);
        }
        let parent_inum = self.namei(&parent_path)?;
        let parent = self.iget(parent_inum)?;
        if !parent.is_dir() {
            return Err(Errno::Enotdir);
        }
        Ok((parent_inum, parent, String::from(name)))
    }

    /// `create(path, mode)`: allocate a regular-file inode and link it
    /// into its parent directory.
    pub fn create(&mut self, path: &str, mode: u16) -> SufsResult<u32> {
        let (_, mut parent, name) = self.prologue(path, path::MAX_FILENAME_LEN)?;
        if self.search_dir(&parent, &name)? != 0 {
            return Err(Errno::Eexist);
        }
        let inum = self.ialloc()?.ok_or(Errno::Enospc)?;
        let inode = Dinode::new_file(inum, mode);
        if let Err(e) = self.write_to_dir(&mut parent, inum, &name) {
            self.ifree(inum)?;
            return Err(e);
        }
        self.iput(&parent)?;
        self.iput(&inode)?;
        Ok(inum)
    }

    /// `mkdir(path)`: allocate a directory inode, write `.`/`..`, and
    /// bump the parent's link count for the new `..` reference.
    pub fn mkdir(&mut self, path: &str) -> SufsResult<u32> {
        let (_, mut parent, name) = self.prologue(path, path::MAX_FILENAME_LEN)?;
        if self.search_dir(&parent, &name)? != 0 {
            return Err(Errno::Eexist);
        }
        let inum = self.ialloc()?.ok_or(Errno::Enospc)?;
        let mut inode = Dinode::new_dir(inum, 0o755);

        let block = match self.dballoc()? {
            Some(b) => b,
            None => {
                self.ifree(inum)?;
                return Err(Errno::Enospc);
            }
        };
        inode.di_db[0] = block;
        inode.nblocks = 1;
        inode.size = self.sb.block_size as u64;

        let block_size = self.sb.block_size as usize;
        let mut dirblock = vec![0u8; block_size];
        super::dir::DirEntry { inumber: inum, name: super::dir::entry_name(".") }.write_to(&mut dirblock[0..super::dir::DENTRY_SIZE]);
        super::dir::DirEntry { inumber: parent.inumber, name: super::dir::entry_name("..") }
            .write_to(&mut dirblock[super::dir::DENTRY_SIZE..2 * super::dir::DENTRY_SIZE]);
        self.write_fs_block(block, &dirblock)?;

        if let Err(e) = self.write_to_dir(&mut parent, inum, &name) {
            self.dbfree(block)?;
            self.ifree(inum)?;
            return Err(e);
        }
        parent.nlink += 1;
        parent.itime += 1;
        self.iput(&parent)?;
        self.iput(&inode)?;
        Ok(inum)
    }

    /// `unlink(path)`: refuse a directory target, free every data
    /// block reachable from the file, remove it from its parent, and
    /// release its inode.
    pub fn unlink(&mut self, path: &str) -> SufsResult<()> {
        let (_, mut parent, name) = self.prologue(path, path::MAX_FILENAME_LEN)?;
        let inum = self.search_dir(&parent, &name)?;
        if inum == 0 {
            return Err(Errno::Enoent);
        }
        let inode = self.iget(inum)?;
        if inode.is_dir() {
            return Err(Errno::Eisdir);
        }
        self.free_all_blocks(&inode)?;
        self.remove_from_dir(&mut parent, inum)?;
        self.iput(&parent)?;
        self.ifree(inum)
    }

    /// Is `dir`'s first data block holding only `.` and `..`, and no
    /// other block allocated?
    fn dir_is_empty(&mut self, dir: &Dinode) -> SufsResult<bool> {
        let n_blocks = (dir.size as u32 + self.sb.block_size - 1) / self.sb.block_size;
        if n_blocks > 1 {
            return Ok(false);
        }
        let first = self.get_data_block(dir, 0)?;
        if first == 0 {
            return Ok(true);
        }
        let block_size = self.sb.block_size as usize;
        let mut buf = vec![0u8; block_size];
        self.read_fs_block(first, &mut buf)?;
        let dentpb = self.sb.dentpb() as usize;
        for slot in 0..dentpb {
            let entry = super::dir::DirEntry::read_from(&buf[slot * super::dir::DENTRY_SIZE..(slot + 1) * super::dir::DENTRY_SIZE]);
            if entry.is_free() {
                continue;
            }
            if entry.name_str() != "." && entry.name_str() != ".." {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// `rmdir(path)`: refuse the root, a non-directory target, or a
    /// non-empty directory; otherwise proceed like `unlink` plus
    /// dropping the parent's link count.
    pub fn rmdir(&mut self, path: &str) -> SufsResult<()> {
        let normalized = Self::normalize(path);
        if normalized == "/" {
            return Err(Errno::Ebusy);
        }
        let (_, mut parent, name) = self.prologue(path, path::MAX_FILENAME_LEN)?;
        let inum = self.search_dir(&parent, &name)?;
        if inum == 0 {
            return Err(Errno::Enoent);
        }
        let inode = self.iget(inum)?;
        if !inode.is_dir() {
            return Err(Errno::Enotdir);
        }
        if !self.dir_is_empty(&inode)? {
            return Err(Errno::Enotempty);
        }
        self.free_all_blocks(&inode)?;
        self.remove_from_dir(&mut parent, inum)?;
        parent.nlink -= 1;
        parent.itime += 1;
        self.iput(&parent)?;
        self.ifree(inum)
    }
}
