//! Superblock access and the in-memory volume metadata derived from it.

use crate::bitmap::Bitmap;
use crate::block_dev::BlockDevice;
use crate::config::*;
use crate::error::{FsError, Result};
use crate::structs::Superblock;

pub fn read_superblock<D: BlockDevice>(device: &D) -> Result<Superblock> {
    let mut buf = Box::new([0u8; BLOCK_SIZE]);
    device.read_block(SB_BLOCK_NR, &mut buf)?;
    Superblock::decode(&buf)
}

/// The unencoded remainder of the superblock's block is written as zero.
pub fn write_superblock<D: BlockDevice>(device: &D, sb: &Superblock) -> Result<()> {
    let mut buf = Box::new([0u8; BLOCK_SIZE]);
    sb.encode(&mut buf);
    device.write_block(SB_BLOCK_NR, &buf)
}

impl Superblock {
    /// Geometry for a fresh image: one bit per resource rounded up to
    /// whole bitmap blocks, the inode store sized to `nr_inodes`, and the
    /// root directory already accounted for in the free counters.
    pub fn new(nr_blocks: u32, nr_inodes: u32) -> Result<Self> {
        if nr_blocks == 0 || nr_inodes == 0 {
            return Err(FsError::BadImage);
        }
        let nr_istore_blocks = nr_inodes.div_ceil(INODES_PER_BLOCK as u32);
        let nr_ifree_blocks = nr_inodes.div_ceil(BITS_PER_BLOCK as u32);
        let nr_bfree_blocks = nr_blocks.div_ceil(BITS_PER_BLOCK as u32);
        let data_start = 1 + nr_istore_blocks + nr_ifree_blocks + nr_bfree_blocks;
        // The metadata area plus the root directory block must fit.
        if data_start >= nr_blocks {
            return Err(FsError::BadImage);
        }
        Ok(Superblock {
            magic: MAGIC,
            nr_blocks,
            nr_inodes,
            nr_istore_blocks,
            nr_ifree_blocks,
            nr_bfree_blocks,
            nr_free_inodes: nr_inodes - 1,
            nr_free_blocks: nr_blocks - data_start - 1,
        })
    }
}

/// Everything a mounted volume keeps in memory about itself: the
/// superblock mirror and both free bitmaps. Invariant: each `nr_free_*`
/// counter equals the popcount of its bitmap.
pub struct SbInfo {
    pub sb: Superblock,
    pub(crate) ifree: Bitmap,
    pub(crate) bfree: Bitmap,
}

impl SbInfo {
    /// Bitmaps start out all-allocated; `mount` loads them from disk and
    /// `format` builds them from scratch.
    pub fn new(sb: Superblock) -> Self {
        SbInfo {
            ifree: Bitmap::new(sb.nr_ifree_blocks, sb.nr_inodes),
            bfree: Bitmap::new(sb.nr_bfree_blocks, sb.nr_blocks),
            sb,
        }
    }

    pub fn istore_start(&self) -> u32 {
        1
    }

    pub fn ifree_start(&self) -> u32 {
        self.istore_start() + self.sb.nr_istore_blocks
    }

    pub fn bfree_start(&self) -> u32 {
        self.ifree_start() + self.sb.nr_ifree_blocks
    }

    pub fn data_start(&self) -> u32 {
        self.bfree_start() + self.sb.nr_bfree_blocks
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn geometry_for_small_image() {
        let sb = Superblock::new(64, 32).unwrap();
        assert_eq!(sb.nr_istore_blocks, 1);
        assert_eq!(sb.nr_ifree_blocks, 1);
        assert_eq!(sb.nr_bfree_blocks, 1);
        assert_eq!(sb.nr_free_inodes, 31);
        // Blocks 0..=3 are metadata, block 4 is the root directory.
        assert_eq!(sb.nr_free_blocks, 59);
    }

    #[test]
    fn geometry_rejects_metadata_only_device() {
        assert_eq!(Superblock::new(4, 32), Err(FsError::BadImage));
        assert_eq!(Superblock::new(0, 32), Err(FsError::BadImage));
        assert_eq!(Superblock::new(64, 0), Err(FsError::BadImage));
    }
}
