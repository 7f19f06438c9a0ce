//! Write-back buffer cache. The volume reads and mutates metadata blocks
//! through here; dirty buffers reach the device on eviction or on
//! `flush_all`, which ends with the device barrier.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::block_dev::BlockDevice;
use crate::config::BLOCK_SIZE;
use crate::error::Result;

const CAPACITY: usize = 16;

struct Buffer {
    block: u32,
    data: Box<[u8; BLOCK_SIZE]>,
    dirty: bool,
}

/// Per-volume cache of block buffers. Buffers are owned here and handed
/// to callers only inside closures, so a buffer can never outlive its
/// slot; the internal lock makes each access atomic.
pub(crate) struct BufferCache<D> {
    device: Arc<D>,
    buffers: Mutex<VecDeque<Buffer>>,
}

impl<D: BlockDevice> BufferCache<D> {
    pub fn new(device: Arc<D>) -> Self {
        BufferCache {
            device,
            buffers: Mutex::new(VecDeque::with_capacity(CAPACITY)),
        }
    }

    /// Run `f` over the contents of `block`, loading it on a miss.
    pub fn with<R>(&self, block: u32, f: impl FnOnce(&[u8; BLOCK_SIZE]) -> R) -> Result<R> {
        let mut buffers = self.buffers.lock().expect("buffer cache poisoned");
        let slot = self.load_slot(&mut buffers, block)?;
        Ok(f(&buffers[slot].data))
    }

    /// Mutable access; the buffer is marked dirty.
    pub fn with_mut<R>(&self, block: u32, f: impl FnOnce(&mut [u8; BLOCK_SIZE]) -> R) -> Result<R> {
        let mut buffers = self.buffers.lock().expect("buffer cache poisoned");
        let slot = self.load_slot(&mut buffers, block)?;
        buffers[slot].dirty = true;
        Ok(f(&mut buffers[slot].data))
    }

    /// Install `block` as all-zeroes without reading the stale contents.
    pub fn zero(&self, block: u32) -> Result<()> {
        let mut buffers = self.buffers.lock().expect("buffer cache poisoned");
        if let Some(slot) = buffers.iter().position(|b| b.block == block) {
            buffers[slot].data.fill(0);
            buffers[slot].dirty = true;
            return Ok(());
        }
        self.make_room(&mut buffers)?;
        buffers.push_back(Buffer {
            block,
            data: Box::new([0u8; BLOCK_SIZE]),
            dirty: true,
        });
        Ok(())
    }

    /// Forget `block` without writing it back. For blocks returned to the
    /// free bitmap, whose contents are garbage by definition.
    pub fn discard(&self, block: u32) {
        let mut buffers = self.buffers.lock().expect("buffer cache poisoned");
        buffers.retain(|b| b.block != block);
    }

    /// Write every dirty buffer and issue the device barrier.
    pub fn flush_all(&self) -> Result<()> {
        let mut buffers = self.buffers.lock().expect("buffer cache poisoned");
        for buf in buffers.iter_mut() {
            if buf.dirty {
                self.device.write_block(buf.block, &buf.data)?;
                buf.dirty = false;
            }
        }
        self.device.flush()
    }

    fn load_slot(&self, buffers: &mut VecDeque<Buffer>, block: u32) -> Result<usize> {
        if let Some(slot) = buffers.iter().position(|b| b.block == block) {
            return Ok(slot);
        }
        self.make_room(buffers)?;
        let mut data = Box::new([0u8; BLOCK_SIZE]);
        self.device.read_block(block, &mut data)?;
        buffers.push_back(Buffer {
            block,
            data,
            dirty: false,
        });
        Ok(buffers.len() - 1)
    }

    // Oldest-first eviction, with write-back for dirty victims.
    fn make_room(&self, buffers: &mut VecDeque<Buffer>) -> Result<()> {
        if buffers.len() == CAPACITY {
            if let Some(victim) = buffers.pop_front() {
                if victim.dirty {
                    self.device.write_block(victim.block, &victim.data)?;
                }
            }
        }
        Ok(())
    }
}
