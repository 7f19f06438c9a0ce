//! The volume: mount/format/sync lifecycle and the namespace operations.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, warn};

use crate::bitmap::Bitmap;
use crate::block_dev::BlockDevice;
use crate::cache::BufferCache;
use crate::config::*;
use crate::directory;
use crate::error::{FsError, Result};
use crate::file;
use crate::inode::InodeCache;
use crate::structs::{FileKind, Inode, Superblock, S_IFDIR, S_IFMT, S_IFREG};
use crate::superblock::{read_superblock, write_superblock, SbInfo};

/// A mounted filesystem instance. All mutable state hangs off the
/// volume; independently mounted volumes share nothing.
///
/// Namespace mutations, `sync` and the consistency check serialize on
/// the volume write lock; `lookup` and `readdir` share the read side.
/// The buffer and inode caches carry their own short-lived locks, so a
/// read-side caller can still fault blocks in.
pub struct Volume<D: BlockDevice> {
    device: Arc<D>,
    cache: BufferCache<D>,
    inodes: InodeCache,
    state: RwLock<SbInfo>,
}

impl<D: BlockDevice> Volume<D> {
    /// Load the superblock, both bitmaps and the root inode.
    pub fn mount(device: Arc<D>) -> Result<Self> {
        let sb = match read_superblock(&*device) {
            Ok(sb) => sb,
            Err(err) => {
                warn!("mount refused: {err}");
                return Err(err);
            }
        };
        let mut info = SbInfo::new(sb);
        let (ifree_start, bfree_start) = (info.ifree_start(), info.bfree_start());
        info.ifree.load(&*device, ifree_start, sb.nr_ifree_blocks)?;
        info.bfree.load(&*device, bfree_start, sb.nr_bfree_blocks)?;
        let volume = Volume {
            cache: BufferCache::new(Arc::clone(&device)),
            inodes: InodeCache::new(sb.nr_inodes),
            device,
            state: RwLock::new(info),
        };
        let root = volume.inodes.get(&volume.cache, ROOT_INO)?;
        if !root.is_dir() {
            warn!("mount refused: root inode is not a directory");
            return Err(FsError::BadImage);
        }
        debug!(
            "mounted: {} blocks, {} inodes, {}/{} free",
            sb.nr_blocks, sb.nr_inodes, sb.nr_free_blocks, sb.nr_free_inodes
        );
        Ok(volume)
    }

    /// Write a fresh image and mount it: superblock, a zeroed inode
    /// store holding only the root record, bitmaps with the metadata
    /// area and the root's resources marked allocated, and a zeroed
    /// root directory block.
    pub fn format(device: Arc<D>, nr_blocks: u32, nr_inodes: u32) -> Result<Self> {
        if nr_blocks > device.nr_blocks() {
            return Err(FsError::BadImage);
        }
        let sb = Superblock::new(nr_blocks, nr_inodes)?;
        let data_start = 1 + sb.nr_istore_blocks + sb.nr_ifree_blocks + sb.nr_bfree_blocks;

        let mut ifree = Bitmap::all_free(sb.nr_ifree_blocks, nr_inodes);
        let mut bfree = Bitmap::all_free(sb.nr_bfree_blocks, nr_blocks);
        ifree.reserve(ROOT_INO);
        for block in 0..=data_start {
            bfree.reserve(block);
        }

        write_superblock(&*device, &sb)?;
        let zero = Box::new([0u8; BLOCK_SIZE]);
        let mut istore = zero.clone();
        let root = Inode {
            mode: S_IFDIR | 0o755,
            index_block: data_start,
            filesize: 0,
            nr_entries: 0,
        };
        root.encode(&mut istore[..], 0);
        device.write_block(1, &istore)?;
        for block in 2..1 + sb.nr_istore_blocks {
            device.write_block(block, &zero)?;
        }
        ifree.store(&*device, 1 + sb.nr_istore_blocks, sb.nr_ifree_blocks)?;
        bfree.store(
            &*device,
            1 + sb.nr_istore_blocks + sb.nr_ifree_blocks,
            sb.nr_bfree_blocks,
        )?;
        device.write_block(data_start, &zero)?;
        device.flush()?;
        debug!("formatted: {nr_blocks} blocks, {nr_inodes} inodes");
        Self::mount(device)
    }

    /// Push every completed mutation to the device: superblock counters
    /// first, then the bitmaps, then dirty metadata blocks, each group
    /// committed behind a durability barrier before the next starts.
    pub fn sync(&self) -> Result<()> {
        let state = self.write_state();
        write_superblock(&*self.device, &state.sb)?;
        self.device.flush()?;
        state
            .ifree
            .store(&*self.device, state.ifree_start(), state.sb.nr_ifree_blocks)?;
        state
            .bfree
            .store(&*self.device, state.bfree_start(), state.sb.nr_bfree_blocks)?;
        self.device.flush()?;
        self.inodes.write_back(&self.cache)?;
        self.cache.flush_all()?;
        debug!("sync complete");
        Ok(())
    }

    /// Sync and release the volume. Consuming `self` makes use after
    /// unmount, and a second unmount, unrepresentable.
    pub fn unmount(self) -> Result<()> {
        self.sync()
    }

    pub fn root_ino(&self) -> u32 {
        ROOT_INO
    }

    pub fn free_inodes(&self) -> u32 {
        self.read_state().sb.nr_free_inodes
    }

    pub fn free_blocks(&self) -> u32 {
        self.read_state().sb.nr_free_blocks
    }

    pub fn superblock(&self) -> Superblock {
        self.read_state().sb
    }

    /// Current (possibly unflushed) record of `ino`.
    pub fn inode(&self, ino: u32) -> Result<Inode> {
        let _state = self.read_state();
        self.inodes.get(&self.cache, ino)
    }

    /// Resolve `name` in directory `dir` to an inode number.
    pub fn lookup(&self, dir: u32, name: &[u8]) -> Result<u32> {
        let _state = self.read_state();
        let d = self.dir_inode(dir)?;
        match directory::find(&self.cache, d.index_block, d.nr_entries, name)? {
            Some((_, ino)) => Ok(ino),
            None => Err(FsError::NotFound),
        }
    }

    /// Create a regular file. Returns the new inode number.
    pub fn create(&self, dir: u32, name: &[u8], mode: u32) -> Result<u32> {
        self.create_entry(dir, name, mode & !S_IFMT | S_IFREG)
    }

    /// Create an empty subdirectory. Returns the new inode number.
    pub fn mkdir(&self, dir: u32, name: &[u8], mode: u32) -> Result<u32> {
        self.create_entry(dir, name, mode & !S_IFMT | S_IFDIR)
    }

    fn create_entry(&self, dir: u32, name: &[u8], mode: u32) -> Result<u32> {
        if name.len() > FILENAME_LEN {
            return Err(FsError::NameTooLong);
        }
        let mut state = self.write_state();
        let d = self.dir_inode(dir)?;
        if d.nr_entries as usize == MAX_DIR_ENTRIES {
            return Err(FsError::DirFull);
        }
        if directory::find(&self.cache, d.index_block, d.nr_entries, name)?.is_some() {
            return Err(FsError::NameExists);
        }

        let ino = state.alloc_inode()?;
        let index_block = match state.alloc_block() {
            Ok(block) => block,
            Err(err) => {
                state.free_inode(ino);
                return Err(err);
            }
        };
        // The child is fully in place before its directory entry exists;
        // unwinding reverses that order.
        let installed = self.cache.zero(index_block).and_then(|()| {
            self.inodes.store(
                ino,
                Inode {
                    mode,
                    index_block,
                    filesize: 0,
                    nr_entries: 0,
                },
            );
            directory::insert(&self.cache, d.index_block, d.nr_entries as usize, name, ino)
        });
        if let Err(err) = installed {
            self.inodes.forget(ino);
            self.cache.discard(index_block);
            state.free_block(index_block);
            state.free_inode(ino);
            return Err(err);
        }
        self.inodes.store(
            dir,
            Inode {
                nr_entries: d.nr_entries + 1,
                ..d
            },
        );
        Ok(ino)
    }

    /// Remove a regular file: its directory entry first, then its data
    /// blocks, index block and inode. A crash in between leaks blocks
    /// but never leaves an entry naming a freed inode.
    pub fn unlink(&self, dir: u32, name: &[u8]) -> Result<()> {
        let mut state = self.write_state();
        let d = self.dir_inode(dir)?;
        let (slot, ino) = directory::find(&self.cache, d.index_block, d.nr_entries, name)?
            .ok_or(FsError::NotFound)?;
        let target = self.inodes.get(&self.cache, ino)?;
        if target.is_dir() {
            return Err(FsError::IsADirectory);
        }
        self.remove_entry(&d, dir, slot)?;
        self.release_file(&mut state, ino, &target)
    }

    /// Remove an empty subdirectory.
    pub fn rmdir(&self, dir: u32, name: &[u8]) -> Result<()> {
        let mut state = self.write_state();
        let d = self.dir_inode(dir)?;
        let (slot, ino) = directory::find(&self.cache, d.index_block, d.nr_entries, name)?
            .ok_or(FsError::NotFound)?;
        let target = self.inodes.get(&self.cache, ino)?;
        if !target.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if target.nr_entries != 0 {
            return Err(FsError::NotEmpty);
        }
        self.remove_entry(&d, dir, slot)?;
        self.release_dir(&mut state, ino, &target);
        Ok(())
    }

    /// Move `old_name` to `new_name`, replacing an existing target.
    /// Renaming an entry onto itself is a no-op; a non-empty directory
    /// target fails `NotEmpty`. The displaced target's resources are
    /// freed before the entry moves.
    pub fn rename(
        &self,
        old_dir: u32,
        old_name: &[u8],
        new_dir: u32,
        new_name: &[u8],
        _flags: u32,
    ) -> Result<()> {
        if new_name.len() > FILENAME_LEN {
            return Err(FsError::NameTooLong);
        }
        let mut state = self.write_state();
        let od = self.dir_inode(old_dir)?;
        let (_, ino) = directory::find(&self.cache, od.index_block, od.nr_entries, old_name)?
            .ok_or(FsError::NotFound)?;
        if old_dir == new_dir && old_name == new_name {
            return Ok(());
        }

        let nd = self.dir_inode(new_dir)?;
        match directory::find(&self.cache, nd.index_block, nd.nr_entries, new_name)? {
            Some((slot, displaced)) => {
                let target = self.inodes.get(&self.cache, displaced)?;
                if target.is_dir() && target.nr_entries != 0 {
                    return Err(FsError::NotEmpty);
                }
                self.remove_entry(&nd, new_dir, slot)?;
                if target.is_dir() {
                    self.release_dir(&mut state, displaced, &target);
                } else {
                    self.release_file(&mut state, displaced, &target)?;
                }
            }
            None => {
                if nd.nr_entries as usize == MAX_DIR_ENTRIES {
                    return Err(FsError::DirFull);
                }
            }
        }

        // Re-resolve both directories: displacing the target above may
        // have shifted slots and counts, and old_dir can be new_dir.
        let od = self.inodes.get(&self.cache, old_dir)?;
        let (slot, _) = directory::find(&self.cache, od.index_block, od.nr_entries, old_name)?
            .ok_or(FsError::NotFound)?;
        self.remove_entry(&od, old_dir, slot)?;
        let nd = self.inodes.get(&self.cache, new_dir)?;
        directory::insert(&self.cache, nd.index_block, nd.nr_entries as usize, new_name, ino)?;
        self.inodes.store(
            new_dir,
            Inode {
                nr_entries: nd.nr_entries + 1,
                ..nd
            },
        );
        Ok(())
    }

    /// Enumerate `dir` from `pos`. Positions 0 and 1 synthesize `.` and
    /// `..`; stored entries follow. `emit` returns false to stop early.
    /// The entry count is sampled once, so enumeration interleaved with
    /// mutation may skip or repeat an entry.
    pub fn readdir<F>(&self, dir: u32, pos: u64, mut emit: F) -> Result<()>
    where
        F: FnMut(&[u8], u32, FileKind) -> bool,
    {
        let _state = self.read_state();
        let d = self.dir_inode(dir)?;
        let mut pos = pos;
        if pos == 0 {
            if !emit(b".", dir, FileKind::Directory) {
                return Ok(());
            }
            pos = 1;
        }
        if pos == 1 {
            // Parent linkage lives in the host's dentry cache; the ino
            // reported here is the directory's own.
            if !emit(b"..", dir, FileKind::Directory) {
                return Ok(());
            }
            pos = 2;
        }
        for slot in pos - 2..d.nr_entries as u64 {
            let (ino, name) = directory::entry_at(&self.cache, d.index_block, slot as usize)?;
            let kind = self.inodes.get(&self.cache, ino)?.kind();
            if !emit(&name, ino, kind) {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Map a logical block of regular file `ino` to its physical block.
    /// With `create`, exactly one block may be appended at the current
    /// end of the file; the byte copy into it stays with the host.
    pub fn map_file_block(&self, ino: u32, index: u32, create: bool) -> Result<u32> {
        if create {
            let mut state = self.write_state();
            self.map_file_block_locked(Some(&mut state), ino, index)
        } else {
            let _state = self.read_state();
            self.map_file_block_locked(None, ino, index)
        }
    }

    fn map_file_block_locked(
        &self,
        state: Option<&mut SbInfo>,
        ino: u32,
        index: u32,
    ) -> Result<u32> {
        let f = self.inodes.get(&self.cache, ino)?;
        if f.is_dir() {
            return Err(FsError::IsADirectory);
        }
        if index < f.nr_entries {
            return file::entry(&self.cache, f.index_block, index as usize);
        }
        let Some(state) = state else {
            return Err(FsError::NotFound);
        };
        if index as usize >= MAX_FILE_INDEX_ENTRIES {
            return Err(FsError::FileTooLarge);
        }
        if index != f.nr_entries {
            // Growth is append-only; a hole cannot be mapped.
            return Err(FsError::NotFound);
        }
        let block = state.alloc_block()?;
        if let Err(err) = self
            .cache
            .zero(block)
            .and_then(|()| file::set_entry(&self.cache, f.index_block, index as usize, block))
        {
            self.cache.discard(block);
            state.free_block(block);
            return Err(err);
        }
        self.inodes.store(
            ino,
            Inode {
                nr_entries: f.nr_entries + 1,
                ..f
            },
        );
        Ok(block)
    }

    /// Record the byte length of regular file `ino`. The host owns byte
    /// granularity; the volume only bounds it to the mapped blocks.
    pub fn set_filesize(&self, ino: u32, filesize: u32) -> Result<()> {
        let _state = self.write_state();
        let f = self.inodes.get(&self.cache, ino)?;
        if f.is_dir() {
            return Err(FsError::IsADirectory);
        }
        if filesize as u64 > f.nr_entries as u64 * BLOCK_SIZE as u64 {
            return Err(FsError::FileTooLarge);
        }
        self.inodes.store(ino, Inode { filesize, ..f });
        Ok(())
    }

    /// Revalidate the structural invariants on demand: counters equal
    /// bitmap popcounts, and no live metadata names a free resource.
    pub fn check(&self) -> Result<()> {
        let state = self.read_state();
        if state.ifree.popcount() != state.sb.nr_free_inodes
            || state.bfree.popcount() != state.sb.nr_free_blocks
        {
            return Err(FsError::InconsistentBitmap);
        }
        self.check_tree(&state, ROOT_INO)
    }

    fn check_tree(&self, state: &SbInfo, dir: u32) -> Result<()> {
        let d = self.inodes.get(&self.cache, dir)?;
        if state.ifree.is_free(dir)
            || state.bfree.is_free(d.index_block)
            || d.nr_entries as usize > MAX_DIR_ENTRIES
        {
            return Err(FsError::InconsistentBitmap);
        }
        for slot in 0..d.nr_entries as usize {
            let (ino, _) = directory::entry_at(&self.cache, d.index_block, slot)?;
            let child = self.inodes.get(&self.cache, ino)?;
            if state.ifree.is_free(ino) {
                return Err(FsError::InconsistentBitmap);
            }
            if child.is_dir() {
                // The namespace is a tree, so the recursion terminates.
                self.check_tree(state, ino)?;
            } else {
                if state.bfree.is_free(child.index_block)
                    || child.nr_entries as usize > MAX_FILE_INDEX_ENTRIES
                {
                    return Err(FsError::InconsistentBitmap);
                }
                for block in file::read_map(&self.cache, child.index_block, child.nr_entries)? {
                    if state.bfree.is_free(block) {
                        return Err(FsError::InconsistentBitmap);
                    }
                }
            }
        }
        Ok(())
    }

    fn dir_inode(&self, ino: u32) -> Result<Inode> {
        let inode = self.inodes.get(&self.cache, ino)?;
        if !inode.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(inode)
    }

    fn remove_entry(&self, d: &Inode, dir: u32, slot: usize) -> Result<()> {
        directory::remove(&self.cache, d.index_block, d.nr_entries, slot)?;
        self.inodes.store(
            dir,
            Inode {
                nr_entries: d.nr_entries - 1,
                ..*d
            },
        );
        Ok(())
    }

    /// Return a dead file's resources: every mapped data block, the
    /// index block, then the inode.
    fn release_file(&self, state: &mut SbInfo, ino: u32, inode: &Inode) -> Result<()> {
        for block in file::read_map(&self.cache, inode.index_block, inode.nr_entries)? {
            self.cache.discard(block);
            state.free_block(block);
        }
        self.cache.discard(inode.index_block);
        state.free_block(inode.index_block);
        state.free_inode(ino);
        self.inodes.forget(ino);
        Ok(())
    }

    fn release_dir(&self, state: &mut SbInfo, ino: u32, inode: &Inode) {
        self.cache.discard(inode.index_block);
        state.free_block(inode.index_block);
        state.free_inode(ino);
        self.inodes.forget(ino);
    }

    fn read_state(&self) -> RwLockReadGuard<'_, SbInfo> {
        self.state.read().expect("volume lock poisoned")
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SbInfo> {
        self.state.write().expect("volume lock poisoned")
    }
}
