//! Directory-entry service. A directory is exactly one block of
//! fixed-size `{inode, filename}` records; the owning inode's
//! `nr_entries` bounds the live, insertion-ordered prefix.

use crate::block_dev::BlockDevice;
use crate::cache::BufferCache;
use crate::config::{DIR_ENTRY_SIZE, FILENAME_LEN, MAX_DIR_ENTRIES};
use crate::error::Result;
use crate::structs::{get_u32, put_u32};

fn entry_offset(slot: usize) -> usize {
    slot * DIR_ENTRY_SIZE
}

/// Length of the null-delimited prefix of a stored filename.
fn stored_len(name: &[u8]) -> usize {
    name.iter().position(|&b| b == 0).unwrap_or(FILENAME_LEN)
}

/// Scan the live slots of the directory block for `name`; first match
/// wins. Returns the slot and the entry's inode number.
pub(crate) fn find<D: BlockDevice>(
    cache: &BufferCache<D>,
    block: u32,
    nr_entries: u32,
    name: &[u8],
) -> Result<Option<(usize, u32)>> {
    cache.with(block, |buf| {
        for slot in 0..nr_entries as usize {
            let off = entry_offset(slot);
            let stored = &buf[off + 4..off + 4 + FILENAME_LEN];
            if &stored[..stored_len(stored)] == name {
                return Some((slot, get_u32(buf, off)));
            }
        }
        None
    })
}

/// Write `{ino, name}` at `slot`, null-padding the filename. The caller
/// checked capacity and duplicates and bumps `nr_entries` afterwards.
pub(crate) fn insert<D: BlockDevice>(
    cache: &BufferCache<D>,
    block: u32,
    slot: usize,
    name: &[u8],
    ino: u32,
) -> Result<()> {
    debug_assert!(slot < MAX_DIR_ENTRIES);
    debug_assert!(!name.is_empty() && name.len() <= FILENAME_LEN);
    cache.with_mut(block, |buf| {
        let off = entry_offset(slot);
        put_u32(buf, off, ino);
        let stored = &mut buf[off + 4..off + 4 + FILENAME_LEN];
        stored.fill(0);
        stored[..name.len()].copy_from_slice(name);
    })
}

/// Remove slot `k`, shifting the live tail left one slot. When `k` is the
/// last live slot the shift is empty; the vacated trailing slot keeps its
/// stale bytes either way.
pub(crate) fn remove<D: BlockDevice>(
    cache: &BufferCache<D>,
    block: u32,
    nr_entries: u32,
    k: usize,
) -> Result<()> {
    debug_assert!(k < nr_entries as usize);
    cache.with_mut(block, |buf| {
        let tail = entry_offset(k + 1)..entry_offset(nr_entries as usize);
        buf.copy_within(tail, entry_offset(k));
    })
}

/// Entry at `slot`: its inode number and the filename without padding.
pub(crate) fn entry_at<D: BlockDevice>(
    cache: &BufferCache<D>,
    block: u32,
    slot: usize,
) -> Result<(u32, Vec<u8>)> {
    cache.with(block, |buf| {
        let off = entry_offset(slot);
        let stored = &buf[off + 4..off + 4 + FILENAME_LEN];
        (get_u32(buf, off), stored[..stored_len(stored)].to_vec())
    })
}
