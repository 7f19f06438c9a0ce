//! PNLFS is a small block-backed hierarchical filesystem: a tree of
//! directories and regular files over a fixed-size block device, with
//! free-bitmap allocators for inodes and data blocks.
//!
//! On-disk layout, contiguous from block 0:
//! - Superblock
//! - Inode store
//! - Inode free-bitmap
//! - Block free-bitmap
//! - Data blocks
//!
//! Every directory and every regular file owns exactly one index block:
//! a directory block of `{inode, filename}` records, or a file-index
//! block of data-block numbers.
//!
//! Layers, bottom to top:
//! 1. Block device: host-implemented capability (hardware-specific).
//! 2. Buffer cache: write-back block buffers owned by the volume.
//! 3. Codec: little-endian views of the on-disk structures.
//! 4. Allocators: free bitmaps for inodes and data blocks.
//! 5. Inode store, directory and file-index services.
//! 6. Volume: mount/sync lifecycle and the namespace operations.

mod bitmap;
mod block_dev;
mod cache;
mod config;
mod directory;
mod error;
mod file;
mod fs;
mod inode;
mod structs;
mod superblock;

pub use bitmap::Bitmap;
pub use block_dev::BlockDevice;
pub use config::*;
pub use error::{FsError, Result};
pub use fs::Volume;
pub use structs::{FileKind, Inode, Superblock, S_IFDIR, S_IFMT, S_IFREG};
pub use superblock::{read_superblock, write_superblock, SbInfo};
