//! Work-group geometry helpers shared by the algorithms.

use kiln_device::DeviceInfo;

/// Largest power of two `<= n` (`0` for `0`).
pub fn prev_power_of_two(n: usize) -> usize {
    if n == 0 { 0 } else { 1 << (usize::BITS - 1 - n.leading_zeros()) }
}

/// `n` rounded up to a multiple of `multiple`.
pub fn round_up(n: usize, multiple: usize) -> usize {
    n.div_ceil(multiple) * multiple
}

/// A power-of-two work-group size no larger than `requested` or the device maximum.
pub fn clamp_work_group(requested: usize, device: &DeviceInfo) -> usize {
    prev_power_of_two(requested.min(device.max_work_group_size)).max(1)
}

/// Split `count` elements into blocks of `block_size`; only the last block may be short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPartition {
    pub count: usize,
    pub block_size: usize,
}

impl BlockPartition {
    pub fn new(count: usize, block_size: usize) -> Self {
        Self { count, block_size: block_size.max(1) }
    }

    pub fn num_blocks(&self) -> usize {
        self.count.div_ceil(self.block_size)
    }

    /// Global work size covering every block with whole work-groups.
    pub fn global_size(&self) -> usize {
        self.num_blocks() * self.block_size
    }

    /// `(offset, len)` of each block.
    pub fn blocks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.num_blocks()).map(|block| {
            let offset = block * self.block_size;
            (offset, self.block_size.min(self.count - offset))
        })
    }
}
