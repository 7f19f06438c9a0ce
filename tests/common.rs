//! Shared fixtures for the integration tests.
#![allow(unused)]

use std::sync::{Arc, Mutex};

use pnlfs::{BlockDevice, FsError, Result, Volume, BLOCK_SIZE};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug)]
pub struct RamDisk {
    inner: Mutex<Vec<u8>>,
    nr_blocks: u32,
}

impl RamDisk {
    pub fn new(nr_blocks: u32) -> Self {
        RamDisk {
            inner: Mutex::new(vec![0u8; nr_blocks as usize * BLOCK_SIZE]),
            nr_blocks,
        }
    }

    /// Raw image bytes, for byte-identity assertions.
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.lock().unwrap().clone()
    }
}

impl BlockDevice for RamDisk {
    fn nr_blocks(&self) -> u32 {
        self.nr_blocks
    }

    fn read_block(&self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        if block >= self.nr_blocks {
            return Err(FsError::BlockIo(block));
        }
        let start = block as usize * BLOCK_SIZE;
        let data = self.inner.lock().unwrap();
        buf.copy_from_slice(&data[start..start + BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&self, block: u32, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        if block >= self.nr_blocks {
            return Err(FsError::BlockIo(block));
        }
        let start = block as usize * BLOCK_SIZE;
        let mut data = self.inner.lock().unwrap();
        data[start..start + BLOCK_SIZE].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        // Memory-backed, nothing to persist.
        Ok(())
    }
}

/// 64-block, 32-inode image: the inode store and both bitmaps take one
/// block each, so data starts at block 4.
pub fn small_volume() -> (Arc<RamDisk>, Volume<RamDisk>) {
    volume(64, 32)
}

pub fn volume(nr_blocks: u32, nr_inodes: u32) -> (Arc<RamDisk>, Volume<RamDisk>) {
    init_logging();
    let disk = Arc::new(RamDisk::new(nr_blocks));
    let vol = Volume::format(Arc::clone(&disk), nr_blocks, nr_inodes).unwrap();
    (disk, vol)
}

/// Every name `readdir` emits for `dir`, dots included, in order.
pub fn read_names<D: BlockDevice>(vol: &Volume<D>, dir: u32) -> Vec<String> {
    let mut names = Vec::new();
    vol.readdir(dir, 0, |name, _ino, _kind| {
        names.push(String::from_utf8_lossy(name).into_owned());
        true
    })
    .unwrap();
    names
}
