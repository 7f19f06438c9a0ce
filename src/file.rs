//! File-index block service: the logical-to-physical mapping of a
//! regular file's data blocks. The byte copy into mapped blocks is the
//! host's concern; only the mapping lives here.

use crate::block_dev::BlockDevice;
use crate::cache::BufferCache;
use crate::error::Result;
use crate::structs::{get_u32, put_u32};

fn index_offset(slot: usize) -> usize {
    slot * 4
}

/// The physical block recorded at `slot` of the index block.
pub(crate) fn entry<D: BlockDevice>(
    cache: &BufferCache<D>,
    index_block: u32,
    slot: usize,
) -> Result<u32> {
    cache.with(index_block, |buf| get_u32(buf, index_offset(slot)))
}

pub(crate) fn set_entry<D: BlockDevice>(
    cache: &BufferCache<D>,
    index_block: u32,
    slot: usize,
    block: u32,
) -> Result<()> {
    cache.with_mut(index_block, |buf| put_u32(buf, index_offset(slot), block))
}

/// All physical blocks addressed by the file, in logical order. Unlink
/// walks this to return them to the allocator.
pub(crate) fn read_map<D: BlockDevice>(
    cache: &BufferCache<D>,
    index_block: u32,
    nr_entries: u32,
) -> Result<Vec<u32>> {
    cache.with(index_block, |buf| {
        (0..nr_entries as usize)
            .map(|slot| get_u32(buf, index_offset(slot)))
            .collect()
    })
}
