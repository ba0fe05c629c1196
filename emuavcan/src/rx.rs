//! Transfer reception engine
//!
//! One session per active inbound descriptor reassembles multi-frame
//! payloads into the inline head buffer plus chained pool blocks, verifies
//! the transfer CRC, and invokes the application delivery callback. The
//! engine holds no reference to the pool or the handler; the instance passes
//! both into every call, keeping the borrows disjoint.
//!
//! Session lifecycle: created by an accepted start-of-transfer frame,
//! destroyed by a protocol violation (bad toggle, CRC mismatch), by pool
//! exhaustion mid-transfer, or by the staleness sweep. A completed delivery
//! keeps the session, primed with the next transfer id, so that duplicated
//! frames of the finished transfer are recognized and dropped rather than
//! delivered twice.

use crate::core::{NodeId, TransferId};
use crate::format::{SOT_TOGGLE_BIT, TailByte, TransferCrc};
use crate::frame::{DataSpecifier, Frame, Header};
use crate::instance::{TRANSFER_TIMEOUT, TransferHandler};
use crate::pool::{
    Block, BlockIndex, BlockStore, OutOfMemory, Pool, SEGMENT_DATA_SIZE, Segment, free_chain,
};
use crate::time::{Duration, Instant};
use crate::transfer::{PAYLOAD_HEAD_SIZE, Transfer};
use crate::tx::MAX_TRANSFER_PAYLOAD;

struct RxSession {
    header: Header,
    /// Reception time of the current transfer's first frame; delivered to
    /// the application.
    transfer_timestamp: Instant,
    /// Time of the last accepted frame; drives restart and staleness.
    updated_at: Instant,
    crc: TransferCrc,
    head: [u8; PAYLOAD_HEAD_SIZE],
    /// Bytes accumulated in head and chain so far.
    payload_len: u16,
    chain: Option<BlockIndex>,
    chain_tail: Option<BlockIndex>,
    /// Expected transfer id.
    transfer_id: TransferId,
    /// Expected toggle bit of the next frame.
    next_toggle: bool,
}

impl RxSession {
    fn new(header: Header, transfer_id: TransferId, timestamp: Instant) -> Self {
        Self {
            header,
            transfer_timestamp: timestamp,
            updated_at: timestamp,
            crc: TransferCrc::new(),
            head: [0; PAYLOAD_HEAD_SIZE],
            payload_len: 0,
            chain: None,
            chain_tail: None,
            transfer_id,
            next_toggle: SOT_TOGGLE_BIT,
        }
    }

    /// Frees the reassembly progress while keeping the session keyed.
    fn discard_assembly(&mut self, store: &mut dyn BlockStore) {
        free_chain(store, self.chain.take());
        self.chain_tail = None;
        self.payload_len = 0;
        self.crc = TransferCrc::new();
    }

    /// Primes the session for the transfer following `completed`.
    fn prepare_next(&mut self, completed: TransferId) {
        self.transfer_id = completed.next();
        self.next_toggle = SOT_TOGGLE_BIT;
        self.payload_len = 0;
        self.crc = TransferCrc::new();
    }

    /// Appends payload bytes: inline head first, then chained pool blocks.
    fn append(&mut self, pool: &mut dyn AllocStore, mut bytes: &[u8]) -> Result<(), OutOfMemory> {
        // The on-wire length field bounds a transfer; anything longer is
        // garbage that would otherwise drain the pool.
        let limit = MAX_TRANSFER_PAYLOAD + TransferCrc::LENGTH;
        if usize::from(self.payload_len) + bytes.len() > limit {
            return Err(OutOfMemory);
        }

        let head_used = core::cmp::min(usize::from(self.payload_len), PAYLOAD_HEAD_SIZE);
        if head_used < PAYLOAD_HEAD_SIZE {
            let take = core::cmp::min(PAYLOAD_HEAD_SIZE - head_used, bytes.len());
            self.head[head_used..head_used + take].copy_from_slice(&bytes[..take]);
            self.payload_len += take as u16;
            bytes = &bytes[take..];
        }

        while !bytes.is_empty() {
            let tail = match self.chain_tail {
                Some(index) if self.segment_space(pool, index) > 0 => index,
                _ => {
                    let index = pool.allocate_segment()?;
                    match self.chain_tail {
                        Some(previous) => pool.set_next(previous, Some(index)),
                        None => self.chain = Some(index),
                    }
                    self.chain_tail = Some(index);
                    index
                }
            };

            let Block::Segment(segment) = pool.block_mut(tail) else {
                unreachable!();
            };
            let used = usize::from(segment.len);
            let take = core::cmp::min(SEGMENT_DATA_SIZE - used, bytes.len());
            segment.data[used..used + take].copy_from_slice(&bytes[..take]);
            segment.len += take as u8;
            self.payload_len += take as u16;
            bytes = &bytes[take..];
        }
        Ok(())
    }

    fn segment_space(&self, pool: &dyn AllocStore, index: BlockIndex) -> usize {
        match pool.block(index) {
            Block::Segment(segment) => SEGMENT_DATA_SIZE - usize::from(segment.len),
            Block::Frame(_) => unreachable!(),
        }
    }
}

/// [`BlockStore`] plus allocation and mutation, erased over the arena size.
trait AllocStore: BlockStore {
    fn allocate_segment(&mut self) -> Result<BlockIndex, OutOfMemory>;
    fn block_mut(&mut self, index: BlockIndex) -> &mut Block;
    fn set_next(&mut self, index: BlockIndex, next: Option<BlockIndex>);
}

impl<const N: usize> AllocStore for Pool<N> {
    fn allocate_segment(&mut self) -> Result<BlockIndex, OutOfMemory> {
        self.allocate(Block::Segment(Segment::empty()))
    }

    fn block_mut(&mut self, index: BlockIndex) -> &mut Block {
        Pool::block_mut(self, index)
    }

    fn set_next(&mut self, index: BlockIndex, next: Option<BlockIndex>) {
        Pool::set_next(self, index, next)
    }
}

/// Per-descriptor reception state machine table
pub(crate) struct RxEngine<const SESSIONS: usize> {
    sessions: [Option<RxSession>; SESSIONS],
}

impl<const SESSIONS: usize> RxEngine<SESSIONS> {
    pub fn new() -> Self {
        Self {
            sessions: core::array::from_fn(|_| None),
        }
    }

    /// Feeds one received frame through the state machine, delivering to
    /// `handler` when a transfer completes.
    pub fn handle_frame<H: TransferHandler, const BLOCKS: usize>(
        &mut self,
        pool: &mut Pool<BLOCKS>,
        local_node_id: Option<NodeId>,
        handler: &mut H,
        frame: &Frame,
        timestamp: Instant,
    ) {
        let Some(header) = frame.id.header() else {
            return;
        };
        // A frame without a tail byte carries no transfer id and cannot
        // participate in reassembly.
        let Some((tail_byte, payload)) = frame.data.split_last() else {
            return;
        };
        let tail = TailByte::from(*tail_byte);

        match header.data_spec {
            DataSpecifier::Message(_) => {}
            DataSpecifier::Request(_) | DataSpecifier::Response(_) => {
                // Service frames for other nodes, or arriving before a node
                // id is assigned, are not ours.
                if header.destination != local_node_id {
                    return;
                }
            }
        }

        // Anonymous senders have no transfer id epoch to track across
        // frames; only self-contained transfers are representable.
        if header.source.is_none() && !(tail.sot() && tail.eot()) {
            return;
        }

        // The accept filter runs once per transfer start and supplies the
        // CRC seed. An unknown descriptor costs nothing.
        let signature = if tail.sot() {
            match handler.should_accept(&header) {
                Some(signature) => Some(signature),
                None => return,
            }
        } else {
            None
        };

        let index = match self.find_session(&header) {
            Some(index) => index,
            None => {
                if !tail.sot() {
                    // Middle of a transfer this node never started on.
                    return;
                }
                match self.create_session(header, tail.transfer_id(), timestamp) {
                    Some(index) => index,
                    None => {
                        warn!("rx session table full, transfer dropped");
                        return;
                    }
                }
            }
        };
        let session = unwrap!(self.sessions[index].as_mut());

        let timed_out = timestamp
            .checked_duration_since(session.updated_at)
            .map_or(false, |age| age > TRANSFER_TIMEOUT);
        // A start frame whose id is neither the expected transfer nor a
        // duplicate of the previous one begins a new epoch (supersession,
        // or a restarted sender).
        let new_epoch = tail.sot() && tail.transfer_id().forward_distance(session.transfer_id) > 1;

        if timed_out || new_epoch {
            session.discard_assembly(pool);
            session.transfer_id = tail.transfer_id();
            session.next_toggle = SOT_TOGGLE_BIT;
            if !tail.sot() {
                // The start frame was missed; resynchronize on the next one.
                session.transfer_id = tail.transfer_id().next();
                return;
            }
        }

        // single frame transfer
        if tail.sot() && tail.eot() {
            if tail.transfer_id() != session.transfer_id {
                // Duplicate of a transfer already delivered.
                return;
            }
            if tail.toggle() != SOT_TOGGLE_BIT {
                // Malformed tail byte, not recoverable.
                free_chain(pool, session.chain.take());
                self.sessions[index] = None;
                return;
            }
            session.discard_assembly(pool);
            session.transfer_timestamp = timestamp;
            session.updated_at = timestamp;
            let completed = session.transfer_id;
            session.prepare_next(completed);

            let mut transfer = Transfer::single(timestamp, header, completed, payload);
            handler.on_transfer(&mut transfer);
            return;
        }

        if tail.transfer_id() != session.transfer_id {
            // Stale frame of a superseded or completed transfer.
            return;
        }
        if tail.toggle() != session.next_toggle {
            // Protocol violation on the current transfer: a lost or
            // duplicated frame would corrupt the reassembly even if the CRC
            // happened to match.
            free_chain(pool, session.chain.take());
            self.sessions[index] = None;
            return;
        }

        if tail.sot() {
            session.crc = TransferCrc::with_signature(unwrap!(signature));
            session.transfer_timestamp = timestamp;
        }
        session.crc.add_bytes(payload);

        if !tail.eot() {
            if session.append(pool, payload).is_err() {
                // Pool pressure or an oversized transfer; drop it whole.
                free_chain(pool, session.chain.take());
                self.sessions[index] = None;
                return;
            }
            session.next_toggle = !session.next_toggle;
            session.updated_at = timestamp;
            return;
        }

        // End of transfer: the running CRC over signature, payload, and the
        // trailing CRC bytes comes to zero residual on an intact transfer.
        let total = usize::from(session.payload_len) + payload.len();
        if session.crc.get() != 0 || total < TransferCrc::LENGTH {
            free_chain(pool, session.chain.take());
            self.sessions[index] = None;
            return;
        }

        // Absorb the final frame into remaining head or last-segment space;
        // the leftover is presented as the borrowed tail region. No new
        // block is allocated for the closing frame.
        let stored = usize::from(session.payload_len);
        let mut absorbed = 0;
        if stored < PAYLOAD_HEAD_SIZE {
            absorbed = core::cmp::min(PAYLOAD_HEAD_SIZE - stored, payload.len());
            session.head[stored..stored + absorbed].copy_from_slice(&payload[..absorbed]);
        } else if let Some(last) = session.chain_tail {
            let Block::Segment(segment) = pool.block_mut(last) else {
                unreachable!();
            };
            let used = usize::from(segment.len);
            absorbed = core::cmp::min(SEGMENT_DATA_SIZE - used, payload.len());
            segment.data[used..used + absorbed].copy_from_slice(&payload[..absorbed]);
            segment.len += absorbed as u8;
        }
        let head_len = core::cmp::min(stored + absorbed, PAYLOAD_HEAD_SIZE);
        let tail_region = &payload[absorbed..];

        let chain = session.chain.take();
        session.chain_tail = None;
        let transfer_timestamp = session.transfer_timestamp;
        let completed = session.transfer_id;
        session.updated_at = timestamp;
        session.prepare_next(completed);

        let head = &session.head[..head_len];
        let mut transfer = Transfer::scattered(
            transfer_timestamp,
            header,
            completed,
            head,
            chain,
            tail_region,
            total - TransferCrc::LENGTH,
            pool,
        );
        handler.on_transfer(&mut transfer);
        // Dropping the view returns any chained blocks the handler did not
        // already release.
    }

    /// Removes and frees every session whose last update is older than
    /// `timeout`. A sender that died mid-transfer leaks no blocks.
    pub fn cleanup_stale<const BLOCKS: usize>(
        &mut self,
        pool: &mut Pool<BLOCKS>,
        now: Instant,
        timeout: Duration,
    ) {
        for slot in self.sessions.iter_mut() {
            if let Some(session) = slot {
                let stale = now
                    .checked_duration_since(session.updated_at)
                    .map_or(false, |age| age > timeout);
                if stale {
                    free_chain(pool, session.chain.take());
                    *slot = None;
                }
            }
        }
    }

    fn find_session(&self, header: &Header) -> Option<usize> {
        self.sessions
            .iter()
            .position(|slot| matches!(slot, Some(session) if session.header.same_descriptor(header)))
    }

    fn create_session(
        &mut self,
        header: Header,
        transfer_id: TransferId,
        timestamp: Instant,
    ) -> Option<usize> {
        let index = self.sessions.iter().position(Option::is_none)?;
        self.sessions[index] = Some(RxSession::new(header, transfer_id, timestamp));
        Some(index)
    }
}
