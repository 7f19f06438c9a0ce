//! Build-time constants of the on-disk format. Changing any of them is a
//! format break; `MAGIC` is the version gate.

pub const MAGIC: u32 = 0x434f5746;

pub const BLOCK_SIZE: usize = 4096;
pub const SB_BLOCK_NR: u32 = 0; // Block holding the superblock
pub const ROOT_INO: u32 = 0; // Inode of the root directory, always allocated

/// Bytes reserved for a filename in a directory entry. Names are
/// null-padded; a name of exactly this length carries no terminator.
pub const FILENAME_LEN: usize = 28;
pub const DIR_ENTRY_SIZE: usize = 4 + FILENAME_LEN;
pub const MAX_DIR_ENTRIES: usize = BLOCK_SIZE / DIR_ENTRY_SIZE;

pub const INODE_SIZE: usize = 16;
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// A regular file is addressed through a single index block of 32-bit
/// block numbers, which caps its size.
pub const MAX_FILE_INDEX_ENTRIES: usize = BLOCK_SIZE / 4;
pub const MAX_FILESIZE: usize = MAX_FILE_INDEX_ENTRIES * BLOCK_SIZE;

/// Free bitmaps are 64-bit words, little-endian on disk.
pub const WORDS_PER_BLOCK: usize = BLOCK_SIZE / 8;
pub const BITS_PER_BLOCK: usize = BLOCK_SIZE * 8;
