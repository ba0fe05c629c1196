//! Fixed-block memory pool
//!
//! One static arena of 32-byte slots serves both directions of the stack:
//! reception sessions chain [`Segment`] blocks while reassembling multi-frame
//! payloads, and the transmit queue stores each outbound [`Frame`] in a block
//! of its own. Blocks are addressed by index, never by pointer; the `next`
//! links live in a parallel array inside the pool and thread the free list,
//! the reception chains, and the transmit queue order alike. A block is owned
//! by exactly one of those structures at any time and returns to the free
//! list in O(1).
//!
//! Exhaustion is an ordinary condition under load: callers drop the affected
//! transfer and the bus carries on.

use crate::frame::Frame;

/// Size of one pool slot in bytes.
pub const BLOCK_SIZE: usize = 32;

/// Payload bytes carried by one chained [`Segment`] block.
pub const SEGMENT_DATA_SIZE: usize = 26;

pub(crate) type BlockIndex = u16;

/// Contents of an allocated pool block.
pub(crate) enum Block {
    /// Slice of a multi-frame payload, owned by a reception session.
    Segment(Segment),
    /// Outbound frame, owned by the transmit queue.
    Frame(Frame),
}

const _BLOCK_FITS_SLOT: () = ::core::assert!(core::mem::size_of::<Option<Block>>() <= BLOCK_SIZE);

pub(crate) struct Segment {
    pub len: u8,
    pub data: [u8; SEGMENT_DATA_SIZE],
}

impl Segment {
    pub const fn empty() -> Self {
        Self {
            len: 0,
            data: [0; SEGMENT_DATA_SIZE],
        }
    }
}

/// The free list is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutOfMemory;

/// Usage counters of the pool
///
/// The peak value never decreases; measure it after a stress test to size
/// the arena for the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Statistics {
    pub capacity_blocks: u16,
    pub current_usage_blocks: u16,
    pub peak_usage_blocks: u16,
}

/// Index-linked arena of `N` fixed-size blocks
pub struct Pool<const N: usize> {
    slots: [Option<Block>; N],
    next: [Option<BlockIndex>; N],
    free_head: Option<BlockIndex>,
    statistics: Statistics,
}

impl<const N: usize> Pool<N> {
    const _ASSERT: usize = BlockIndex::MAX as usize - N;

    pub fn new() -> Self {
        let mut next = [None; N];
        for i in 0..N.saturating_sub(1) {
            next[i] = Some((i + 1) as BlockIndex);
        }
        Self {
            slots: core::array::from_fn(|_| None),
            next,
            free_head: if N > 0 { Some(0) } else { None },
            statistics: Statistics {
                capacity_blocks: N as u16,
                current_usage_blocks: 0,
                peak_usage_blocks: 0,
            },
        }
    }

    pub(crate) fn allocate(&mut self, block: Block) -> Result<BlockIndex, OutOfMemory> {
        let index = self.free_head.ok_or(OutOfMemory)?;
        self.free_head = self.next[usize::from(index)];
        self.next[usize::from(index)] = None;
        self.slots[usize::from(index)] = Some(block);

        self.statistics.current_usage_blocks += 1;
        if self.statistics.current_usage_blocks > self.statistics.peak_usage_blocks {
            self.statistics.peak_usage_blocks = self.statistics.current_usage_blocks;
        }
        Ok(index)
    }

    pub(crate) fn free(&mut self, index: BlockIndex) {
        // A block is released exactly once; a free slot here is a bug.
        let _ = unwrap!(self.slots[usize::from(index)].take());
        self.next[usize::from(index)] = self.free_head;
        self.free_head = Some(index);
        self.statistics.current_usage_blocks -= 1;
    }

    pub(crate) fn block(&self, index: BlockIndex) -> &Block {
        unwrap!(self.slots[usize::from(index)].as_ref())
    }

    pub(crate) fn block_mut(&mut self, index: BlockIndex) -> &mut Block {
        unwrap!(self.slots[usize::from(index)].as_mut())
    }

    pub(crate) fn next(&self, index: BlockIndex) -> Option<BlockIndex> {
        self.next[usize::from(index)]
    }

    pub(crate) fn set_next(&mut self, index: BlockIndex, next: Option<BlockIndex>) {
        self.next[usize::from(index)] = next;
    }

    pub fn statistics(&self) -> Statistics {
        self.statistics
    }
}

impl<const N: usize> Default for Pool<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Dynamic view of the pool, so that borrowed structures (e.g. a delivered
/// transfer) need not carry the arena size parameter.
pub(crate) trait BlockStore {
    fn block(&self, index: BlockIndex) -> &Block;
    fn next(&self, index: BlockIndex) -> Option<BlockIndex>;
    fn free(&mut self, index: BlockIndex);
}

impl<const N: usize> BlockStore for Pool<N> {
    fn block(&self, index: BlockIndex) -> &Block {
        Pool::block(self, index)
    }

    fn next(&self, index: BlockIndex) -> Option<BlockIndex> {
        Pool::next(self, index)
    }

    fn free(&mut self, index: BlockIndex) {
        Pool::free(self, index)
    }
}

/// Returns every block of a chain to the free list.
pub(crate) fn free_chain(store: &mut dyn BlockStore, head: Option<BlockIndex>) {
    let mut cursor = head;
    while let Some(index) = cursor {
        cursor = store.next(index);
        store.free(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment() -> Block {
        Block::Segment(Segment::empty())
    }

    #[test]
    fn test_exhaustion_after_capacity() {
        let mut pool: Pool<4> = Pool::new();
        let mut held = [0; 4];
        for slot in held.iter_mut() {
            *slot = pool.allocate(segment()).unwrap();
        }
        assert_eq!(pool.allocate(segment()), Err(OutOfMemory));

        pool.free(held[2]);
        assert!(pool.allocate(segment()).is_ok());
        assert_eq!(pool.allocate(segment()), Err(OutOfMemory));
    }

    #[test]
    fn test_peak_never_decreases() {
        let mut pool: Pool<4> = Pool::new();
        let a = pool.allocate(segment()).unwrap();
        let b = pool.allocate(segment()).unwrap();
        assert_eq!(pool.statistics().peak_usage_blocks, 2);

        pool.free(a);
        pool.free(b);
        assert_eq!(pool.statistics().current_usage_blocks, 0);
        assert_eq!(pool.statistics().peak_usage_blocks, 2);

        let c = pool.allocate(segment()).unwrap();
        assert_eq!(pool.statistics().peak_usage_blocks, 2);
        pool.free(c);
    }

    #[test]
    fn test_free_chain() {
        let mut pool: Pool<4> = Pool::new();
        let a = pool.allocate(segment()).unwrap();
        let b = pool.allocate(segment()).unwrap();
        let c = pool.allocate(segment()).unwrap();
        pool.set_next(a, Some(b));
        pool.set_next(b, Some(c));

        free_chain(&mut pool, Some(a));
        assert_eq!(pool.statistics().current_usage_blocks, 0);
    }
}
