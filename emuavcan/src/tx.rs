//! Transmit queue
//!
//! Outbound transfers are fragmented into frames and kept sorted by CAN
//! identifier, so the driver always transmits the frame that would win bus
//! arbitration next. Each queued frame occupies one pool block; the block is
//! freed when the driver pops the frame.

use crate::core::TransferId;
use crate::format::{TailByte, TransferCrc, SOT_TOGGLE_BIT};
use crate::frame::{CanId, Data, Frame};
use crate::pool::{Block, BlockIndex, OutOfMemory, Pool};

/// Payload bytes per frame once the tail byte is reserved.
pub(crate) const FRAME_PAYLOAD_CAPACITY: usize = Data::MAX - 1;

/// Longest payload one transfer can carry.
pub(crate) const MAX_TRANSFER_PAYLOAD: usize = 1023;

/// Splits one outbound transfer into tail-byted frame data units.
///
/// A payload that fits a single frame goes out as-is, without a CRC. Longer
/// payloads are streamed as payload followed by the big-endian CRC, in
/// 7-byte slices, the toggle bit alternating from frame to frame.
struct Fragmenter<'a> {
    transfer_id: TransferId,
    payload: &'a [u8],
    crc_bytes: [u8; TransferCrc::LENGTH],
    offset: usize,
    toggle: bool,
}

impl<'a> Fragmenter<'a> {
    /// `crc` must be seeded and already fed the whole payload.
    fn new(transfer_id: TransferId, payload: &'a [u8], crc: TransferCrc) -> Self {
        Self {
            transfer_id,
            payload,
            crc_bytes: crc.get().to_be_bytes(),
            offset: 0,
            toggle: SOT_TOGGLE_BIT,
        }
    }

    fn next_frame_data(&mut self) -> Option<Data> {
        // single frame transfer
        if self.offset == 0 && self.payload.len() <= FRAME_PAYLOAD_CAPACITY {
            let mut bytes = [0u8; Data::MAX];
            bytes[..self.payload.len()].copy_from_slice(self.payload);
            bytes[self.payload.len()] =
                TailByte::new(true, true, SOT_TOGGLE_BIT, self.transfer_id).into();
            self.offset = self.payload.len() + TransferCrc::LENGTH;
            return Some(unwrap!(Data::new(&bytes[..self.payload.len() + 1])));
        }

        let total = self.payload.len() + TransferCrc::LENGTH;
        if self.offset >= total {
            return None;
        }

        let chunk = core::cmp::min(FRAME_PAYLOAD_CAPACITY, total - self.offset);
        let mut bytes = [0u8; Data::MAX];
        for (slot, stream_index) in bytes[..chunk].iter_mut().zip(self.offset..) {
            *slot = if stream_index < self.payload.len() {
                self.payload[stream_index]
            } else {
                self.crc_bytes[stream_index - self.payload.len()]
            };
        }
        let sot = self.offset == 0;
        self.offset += chunk;
        bytes[chunk] = TailByte::new(sot, self.offset == total, self.toggle, self.transfer_id).into();
        self.toggle = !self.toggle;

        Some(unwrap!(Data::new(&bytes[..chunk + 1])))
    }
}

/// Priority-ordered collection of frames awaiting transmission
pub(crate) struct TxQueue {
    head: Option<BlockIndex>,
}

impl TxQueue {
    pub const fn new() -> Self {
        Self { head: None }
    }

    /// Fragments `payload` and inserts the resulting frames, returning how
    /// many were queued.
    ///
    /// On pool exhaustion the frames queued so far stay queued; the caller
    /// sees the error and decides whether to retry the transfer later.
    pub fn enqueue_transfer<const N: usize>(
        &mut self,
        pool: &mut Pool<N>,
        id: CanId,
        transfer_id: TransferId,
        crc: TransferCrc,
        payload: &[u8],
    ) -> Result<u8, OutOfMemory> {
        let mut fragmenter = Fragmenter::new(transfer_id, payload, crc);
        let mut count: u8 = 0;
        while let Some(data) = fragmenter.next_frame_data() {
            let block = pool.allocate(Block::Frame(Frame::new(id, data)))?;
            self.insert(pool, block);
            count += 1;
        }
        Ok(count)
    }

    /// Highest-priority frame, left in place.
    ///
    /// No enqueue may happen between a peek and the pop that consumes the
    /// same frame; the caller owns that exclusion.
    pub fn peek<'p, const N: usize>(&self, pool: &'p Pool<N>) -> Option<&'p Frame> {
        let head = self.head?;
        match pool.block(head) {
            Block::Frame(frame) => Some(frame),
            Block::Segment(_) => unreachable!(),
        }
    }

    /// Removes the highest-priority frame and frees its block.
    pub fn pop<const N: usize>(&mut self, pool: &mut Pool<N>) -> Option<Frame> {
        let head = self.head?;
        let frame = match pool.block(head) {
            Block::Frame(frame) => *frame,
            Block::Segment(_) => unreachable!(),
        };
        self.head = pool.next(head);
        pool.free(head);
        Some(frame)
    }

    /// Inserts before the first queued frame with a numerically greater
    /// identifier; a greater identifier loses arbitration. Frames with an
    /// equal identifier keep enqueue order, which keeps the frames of one
    /// transfer in sequence.
    fn insert<const N: usize>(&mut self, pool: &mut Pool<N>, block: BlockIndex) {
        let id = match pool.block(block) {
            Block::Frame(frame) => frame.id,
            Block::Segment(_) => unreachable!(),
        };

        let mut previous: Option<BlockIndex> = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            let current_id = match pool.block(current) {
                Block::Frame(frame) => frame.id,
                Block::Segment(_) => unreachable!(),
            };
            if current_id > id {
                break;
            }
            previous = Some(current);
            cursor = pool.next(current);
        }

        pool.set_next(block, cursor);
        match previous {
            None => self.head = Some(block),
            Some(previous) => pool.set_next(previous, Some(block)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataTypeSignature, MessageTypeId, NodeId, Priority};

    fn crc_for(payload: &[u8]) -> TransferCrc {
        let mut crc = TransferCrc::with_signature(DataTypeSignature::new(0xd654_a48e_0c90_d449));
        crc.add_bytes(payload);
        crc
    }

    fn tid() -> TransferId {
        TransferId::new(27).unwrap()
    }

    #[test]
    fn test_single_frame_fragmentation() {
        let payload = [0u8, 1, 2, 3, 4, 5];
        let mut fragmenter = Fragmenter::new(tid(), &payload, crc_for(&payload));

        let data = fragmenter.next_frame_data().unwrap();
        assert_eq!(&*data, &[0, 1, 2, 3, 4, 5, 0b1100_0000 + 27]);
        assert!(fragmenter.next_frame_data().is_none());
    }

    #[test]
    fn test_empty_payload_fragmentation() {
        let payload = [];
        let mut fragmenter = Fragmenter::new(tid(), &payload, crc_for(&payload));

        let data = fragmenter.next_frame_data().unwrap();
        assert_eq!(&*data, &[0b1100_0000 + 27]);
        assert!(fragmenter.next_frame_data().is_none());
    }

    #[test]
    fn test_double_frame_fragmentation() {
        let payload = [0u8, 1, 2, 3, 4, 5, 6, 7];
        let crc = crc_for(&payload);
        let [crc_hi, crc_lo] = crc.get().to_be_bytes();
        let mut fragmenter = Fragmenter::new(tid(), &payload, crc);

        let data = fragmenter.next_frame_data().unwrap();
        assert_eq!(&*data, &[0, 1, 2, 3, 4, 5, 6, 0b1000_0000 + 27]);
        let data = fragmenter.next_frame_data().unwrap();
        assert_eq!(&*data, &[7, crc_hi, crc_lo, 0b0110_0000 + 27]);
        assert!(fragmenter.next_frame_data().is_none());
    }

    #[test]
    fn test_crc_straddles_frames() {
        // 13 payload bytes: frame 1 carries 7, frame 2 carries 6 plus the
        // first CRC byte, frame 3 the second CRC byte alone.
        let payload: [u8; 13] = core::array::from_fn(|i| i as u8);
        let crc = crc_for(&payload);
        let [crc_hi, crc_lo] = crc.get().to_be_bytes();
        let mut fragmenter = Fragmenter::new(tid(), &payload, crc);

        let data = fragmenter.next_frame_data().unwrap();
        assert_eq!(&*data, &[0, 1, 2, 3, 4, 5, 6, 0b1000_0000 + 27]);
        let data = fragmenter.next_frame_data().unwrap();
        assert_eq!(&*data, &[7, 8, 9, 10, 11, 12, crc_hi, 0b0010_0000 + 27]);
        let data = fragmenter.next_frame_data().unwrap();
        assert_eq!(&*data, &[crc_lo, 0b0100_0000 + 27]);
        assert!(fragmenter.next_frame_data().is_none());
    }

    #[test]
    fn test_queue_orders_by_identifier() {
        let mut pool: Pool<8> = Pool::new();
        let mut queue = TxQueue::new();
        let node = NodeId::new(9).unwrap();
        let payload = [0xaa];

        for priority in [Priority::LOW, Priority::HIGHEST, Priority::MEDIUM] {
            let id = CanId::message(priority, MessageTypeId::new(7), node);
            queue
                .enqueue_transfer(&mut pool, id, tid(), crc_for(&payload), &payload)
                .unwrap();
        }

        let order: [Priority; 3] =
            core::array::from_fn(|_| queue.pop(&mut pool).unwrap().id.priority());
        assert_eq!(order, [Priority::HIGHEST, Priority::MEDIUM, Priority::LOW]);
        assert!(queue.pop(&mut pool).is_none());
        assert_eq!(pool.statistics().current_usage_blocks, 0);
    }

    #[test]
    fn test_equal_identifiers_keep_enqueue_order() {
        let mut pool: Pool<8> = Pool::new();
        let mut queue = TxQueue::new();
        let id = CanId::message(
            Priority::MEDIUM,
            MessageTypeId::new(7),
            NodeId::new(9).unwrap(),
        );

        for marker in [1u8, 2, 3] {
            let payload = [marker];
            queue
                .enqueue_transfer(&mut pool, id, tid(), crc_for(&payload), &payload)
                .unwrap();
        }

        for marker in [1u8, 2, 3] {
            assert_eq!(queue.pop(&mut pool).unwrap().data[0], marker);
        }
    }

    #[test]
    fn test_multi_frame_transfer_stays_in_sequence() {
        let mut pool: Pool<8> = Pool::new();
        let mut queue = TxQueue::new();
        let id = CanId::message(
            Priority::MEDIUM,
            MessageTypeId::new(7),
            NodeId::new(9).unwrap(),
        );
        let payload: [u8; 20] = core::array::from_fn(|i| i as u8);

        let count = queue
            .enqueue_transfer(&mut pool, id, tid(), crc_for(&payload), &payload)
            .unwrap();
        assert_eq!(count, 4);

        let first = queue.pop(&mut pool).unwrap();
        assert!(TailByte::from(*first.data.last().unwrap()).sot());
        queue.pop(&mut pool);
        queue.pop(&mut pool);
        let last = queue.pop(&mut pool).unwrap();
        assert!(TailByte::from(*last.data.last().unwrap()).eot());
    }

    #[test]
    fn test_partial_enqueue_on_exhaustion() {
        let mut pool: Pool<2> = Pool::new();
        let mut queue = TxQueue::new();
        let id = CanId::message(
            Priority::MEDIUM,
            MessageTypeId::new(7),
            NodeId::new(9).unwrap(),
        );
        let payload: [u8; 20] = core::array::from_fn(|i| i as u8);

        let result = queue.enqueue_transfer(&mut pool, id, tid(), crc_for(&payload), &payload);
        assert_eq!(result, Err(OutOfMemory));
        // The two frames that fit stay queued.
        assert!(queue.pop(&mut pool).is_some());
        assert!(queue.pop(&mut pool).is_some());
        assert!(queue.pop(&mut pool).is_none());
    }
}
