//! Free-resource bitmaps for inodes and data blocks. Bit set = free,
//! bit clear = allocated.

use log::warn;

use crate::block_dev::BlockDevice;
use crate::config::{BLOCK_SIZE, WORDS_PER_BLOCK};
use crate::error::{FsError, Result};
use crate::superblock::SbInfo;

/// In-memory rendering of one on-disk bitmap: whole blocks of 64-bit
/// words, packed little-endian on disk. Allocation resumes at the word
/// the previous success stopped on, so repeated allocation does not
/// rescan the exhausted prefix.
pub struct Bitmap {
    words: Vec<u64>,
    nbits: u32,
    cursor: usize,
}

impl Bitmap {
    /// All bits allocated. `nr_blocks` is the bitmap's on-disk length.
    pub fn new(nr_blocks: u32, nbits: u32) -> Self {
        debug_assert!(nbits as usize <= nr_blocks as usize * WORDS_PER_BLOCK * 64);
        Bitmap {
            words: vec![0; nr_blocks as usize * WORDS_PER_BLOCK],
            nbits,
            cursor: 0,
        }
    }

    /// All `nbits` resources free. The word tail beyond `nbits` stays
    /// clear so a scan can never hand out a resource that does not exist.
    pub fn all_free(nr_blocks: u32, nbits: u32) -> Self {
        let mut bm = Self::new(nr_blocks, nbits);
        for bit in 0..nbits {
            bm.set(bit);
        }
        bm
    }

    pub fn is_free(&self, bit: u32) -> bool {
        self.words[bit as usize / 64] & (1u64 << (bit % 64)) != 0
    }

    fn set(&mut self, bit: u32) {
        self.words[bit as usize / 64] |= 1u64 << (bit % 64);
    }

    /// Mark `bit` allocated without going through `alloc`. The formatter
    /// uses this for the metadata area and the root's resources.
    pub fn reserve(&mut self, bit: u32) {
        self.words[bit as usize / 64] &= !(1u64 << (bit % 64));
    }

    /// Claim the lowest set bit at or after the cursor word, searching
    /// circularly. `None` only after a full wrap finds nothing.
    pub fn alloc(&mut self) -> Option<u32> {
        let nr_words = self.words.len();
        for i in 0..nr_words {
            let w = (self.cursor + i) % nr_words;
            if self.words[w] == 0 {
                continue;
            }
            let tz = self.words[w].trailing_zeros();
            let bit = w as u32 * 64 + tz;
            debug_assert!(bit < self.nbits);
            self.words[w] &= !(1u64 << tz);
            self.cursor = w;
            return Some(bit);
        }
        None
    }

    /// Return `bit` to the free pool. Releasing an already-free bit is a
    /// caller bug; the release stays idempotent and reports `false` so
    /// the caller does not double-count.
    pub fn release(&mut self, bit: u32) -> bool {
        debug_assert!(!self.is_free(bit), "bit {bit} released twice");
        if self.is_free(bit) {
            return false;
        }
        self.set(bit);
        true
    }

    pub fn popcount(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Fill from `count` consecutive device blocks starting at `start`,
    /// word-swapping from little-endian.
    pub fn load(&mut self, device: &impl BlockDevice, start: u32, count: u32) -> Result<()> {
        let mut buf = Box::new([0u8; BLOCK_SIZE]);
        for i in 0..count {
            device.read_block(start + i, &mut buf)?;
            let base = i as usize * WORDS_PER_BLOCK;
            for (w, raw) in buf.chunks_exact(8).enumerate() {
                let mut word = [0u8; 8];
                word.copy_from_slice(raw);
                self.words[base + w] = u64::from_le_bytes(word);
            }
        }
        Ok(())
    }

    /// Inverse of `load`.
    pub fn store(&self, device: &impl BlockDevice, start: u32, count: u32) -> Result<()> {
        let mut buf = Box::new([0u8; BLOCK_SIZE]);
        for i in 0..count {
            let base = i as usize * WORDS_PER_BLOCK;
            for (w, raw) in buf.chunks_exact_mut(8).enumerate() {
                raw.copy_from_slice(&self.words[base + w].to_le_bytes());
            }
            device.write_block(start + i, &buf)?;
        }
        Ok(())
    }
}

// Allocator entry points. These keep the superblock counters equal to
// the bitmap popcounts, which sync later persists.
impl SbInfo {
    pub fn alloc_inode(&mut self) -> Result<u32> {
        let ino = self.ifree.alloc().ok_or(FsError::NoFreeInode)?;
        self.sb.nr_free_inodes -= 1;
        Ok(ino)
    }

    pub fn alloc_block(&mut self) -> Result<u32> {
        let block = self.bfree.alloc().ok_or(FsError::NoFreeBlock)?;
        self.sb.nr_free_blocks -= 1;
        Ok(block)
    }

    pub fn free_inode(&mut self, ino: u32) {
        if self.ifree.release(ino) {
            self.sb.nr_free_inodes += 1;
        } else {
            warn!("inode {ino} was already free");
        }
    }

    pub fn free_block(&mut self, block: u32) {
        if self.bfree.release(block) {
            self.sb.nr_free_blocks += 1;
        } else {
            warn!("block {block} was already free");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn alloc_in_order_until_exhausted() {
        let mut bm = Bitmap::all_free(1, 5);
        for expected in 0..5 {
            assert_eq!(bm.alloc(), Some(expected));
        }
        assert_eq!(bm.alloc(), None);
        assert_eq!(bm.popcount(), 0);
    }

    #[test]
    fn release_makes_bit_allocatable_again() {
        let mut bm = Bitmap::all_free(1, 4);
        while bm.alloc().is_some() {}
        assert!(bm.release(2));
        assert!(bm.is_free(2));
        assert_eq!(bm.alloc(), Some(2));
        assert_eq!(bm.alloc(), None);
    }

    #[test]
    fn cursor_resumes_past_allocated_prefix() {
        // Spill into a second word so the cursor actually moves.
        let mut bm = Bitmap::all_free(1, 130);
        for _ in 0..70 {
            bm.alloc();
        }
        assert_eq!(bm.alloc(), Some(70));
        // A release behind the cursor is found on the wrap-around.
        assert!(bm.release(3));
        for expected in 71..130 {
            assert_eq!(bm.alloc(), Some(expected));
        }
        assert_eq!(bm.alloc(), Some(3));
        assert_eq!(bm.alloc(), None);
    }

    #[test]
    fn popcount_matches_free_count() {
        let mut bm = Bitmap::all_free(1, 100);
        assert_eq!(bm.popcount(), 100);
        for _ in 0..40 {
            bm.alloc();
        }
        assert_eq!(bm.popcount(), 60);
    }
}
