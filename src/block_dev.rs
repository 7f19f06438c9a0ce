use crate::config::BLOCK_SIZE;
use crate::error::Result;

/// Capability consumed from the host: fixed-size blocks addressed by a
/// 32-bit number. Buffer ownership and dirty tracking live above this
/// trait, in the volume's cache layer.
pub trait BlockDevice: Send + Sync {
    /// Total number of addressable blocks on the device.
    fn nr_blocks(&self) -> u32;

    fn read_block(&self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<()>;

    fn write_block(&self, block: u32, buf: &[u8; BLOCK_SIZE]) -> Result<()>;

    /// Durability barrier: every block written before this call survives
    /// a crash once it returns.
    fn flush(&self) -> Result<()>;
}
