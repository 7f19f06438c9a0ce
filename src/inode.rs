//! Inode store access and the per-volume inode cache.
//!
//! The cached record is the source of truth while the volume is mounted;
//! dirty records are encoded back into their store blocks on write-back.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::block_dev::BlockDevice;
use crate::cache::BufferCache;
use crate::config::{INODES_PER_BLOCK, INODE_SIZE};
use crate::error::{FsError, Result};
use crate::structs::Inode;

/// Inode store block holding `ino`. The store begins right after the
/// superblock.
pub(crate) fn istore_block(ino: u32) -> u32 {
    1 + ino / INODES_PER_BLOCK as u32
}

fn slot_offset(ino: u32) -> usize {
    ino as usize % INODES_PER_BLOCK * INODE_SIZE
}

struct Slot {
    inode: Inode,
    dirty: bool,
}

pub(crate) struct InodeCache {
    nr_inodes: u32,
    slots: Mutex<BTreeMap<u32, Slot>>,
}

impl InodeCache {
    pub fn new(nr_inodes: u32) -> Self {
        InodeCache {
            nr_inodes,
            slots: Mutex::new(BTreeMap::new()),
        }
    }

    /// Current record of `ino`, reading the store on first touch.
    pub fn get<D: BlockDevice>(&self, cache: &BufferCache<D>, ino: u32) -> Result<Inode> {
        if ino >= self.nr_inodes {
            return Err(FsError::BadImage);
        }
        let mut slots = self.slots.lock().expect("inode cache poisoned");
        if let Some(slot) = slots.get(&ino) {
            return Ok(slot.inode);
        }
        let inode = cache.with(istore_block(ino), |buf| Inode::decode(buf, slot_offset(ino)))?;
        slots.insert(ino, Slot { inode, dirty: false });
        Ok(inode)
    }

    /// Install or overwrite the record of `ino`. A freshly allocated
    /// inode goes through here with every field initialized, before
    /// anything else can observe it.
    pub fn store(&self, ino: u32, inode: Inode) {
        let mut slots = self.slots.lock().expect("inode cache poisoned");
        slots.insert(ino, Slot { inode, dirty: true });
    }

    /// Drop a dead inode so its record never reaches the store again.
    pub fn forget(&self, ino: u32) {
        let mut slots = self.slots.lock().expect("inode cache poisoned");
        slots.remove(&ino);
    }

    /// Encode every dirty record into its store block.
    pub fn write_back<D: BlockDevice>(&self, cache: &BufferCache<D>) -> Result<()> {
        let mut slots = self.slots.lock().expect("inode cache poisoned");
        for (ino, slot) in slots.iter_mut().filter(|(_, s)| s.dirty) {
            cache.with_mut(istore_block(*ino), |buf| {
                slot.inode.encode(buf, slot_offset(*ino))
            })?;
            slot.dirty = false;
        }
        Ok(())
    }
}
