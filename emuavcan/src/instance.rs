//! Library instance and application interface
//!
//! An [`Instance`] aggregates everything one bus endpoint needs: the local
//! node id, the block pool, the reception engine, the transmit queue, and
//! the application handler. It is an explicit value, not a singleton;
//! construction and drop are its lifecycle. All methods assume one execution
//! context at a time (which may be an interrupt handler); the instance
//! performs no locking of its own, and every call completes in bounded time.

use crate::core::{
    DataTypeSignature, MessageTypeId, NodeId, Priority, ServiceKind, ServiceTypeId, TransferId,
};
use crate::format::TransferCrc;
use crate::frame::{CanId, Frame, Header};
use crate::pool::{OutOfMemory, Pool, Statistics};
use crate::rx::RxEngine;
use crate::time::{Duration, Instant};
use crate::transfer::Transfer;
use crate::tx::{FRAME_PAYLOAD_CAPACITY, MAX_TRANSFER_PAYLOAD, TxQueue};

/// A multi-frame transfer whose frames stop arriving for this long is
/// abandoned and restarted by the next start frame.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(2);

/// How often [`Instance::cleanup_stale_transfers`] should run.
pub const RECOMMENDED_CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Application side of the stack: the accept filter and the delivery sink
pub trait TransferHandler {
    /// Decides whether a transfer starting on `header` should be received.
    ///
    /// Returning the data type signature of the descriptor accepts the
    /// transfer; the signature seeds the transfer CRC, so a wrong one makes
    /// reception fail the integrity check. Returning `None` rejects the
    /// transfer before it costs any pool block. Called once per transfer
    /// start, not per frame.
    fn should_accept(&mut self, header: &Header) -> Option<DataTypeSignature>;

    /// Called for every completed transfer, from within
    /// [`Instance::handle_frame`]. The view is valid only during the call.
    fn on_transfer(&mut self, transfer: &mut Transfer<'_>);
}

/// Rejected send request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmitError {
    /// Service transfers and multi-frame broadcasts require an assigned
    /// local node id.
    NodeIdNotSet,
    /// Payload too long, or a type id outside the anonymous range.
    InvalidArgument,
    /// The pool ran out of blocks. Frames already queued for this transfer
    /// remain queued and will be transmitted.
    OutOfMemory,
}

impl From<OutOfMemory> for TransmitError {
    fn from(_: OutOfMemory) -> Self {
        TransmitError::OutOfMemory
    }
}

/// The local node id can be assigned only once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeIdAlreadySet;

/// One bus endpoint: node identity, pool, reception engine, transmit queue
///
/// `BLOCKS` sizes the shared pool; `SESSIONS` bounds the number of
/// concurrently reassembling inbound descriptors.
pub struct Instance<H, const BLOCKS: usize, const SESSIONS: usize> {
    node_id: Option<NodeId>,
    handler: H,
    pool: Pool<BLOCKS>,
    rx: RxEngine<SESSIONS>,
    tx: TxQueue,
}

impl<H: TransferHandler, const BLOCKS: usize, const SESSIONS: usize>
    Instance<H, BLOCKS, SESSIONS>
{
    /// Creates an anonymous instance. Assign a node id with
    /// [`set_local_node_id`](Self::set_local_node_id) to unlock service
    /// transfers and multi-frame broadcasts.
    pub fn new(handler: H) -> Self {
        Self {
            node_id: None,
            handler,
            pool: Pool::new(),
            rx: RxEngine::new(),
            tx: TxQueue::new(),
        }
    }

    pub fn local_node_id(&self) -> Option<NodeId> {
        self.node_id
    }

    /// Assigns the local node id; write-once for the lifetime of the
    /// instance.
    pub fn set_local_node_id(&mut self, node_id: NodeId) -> Result<(), NodeIdAlreadySet> {
        match self.node_id {
            None => {
                self.node_id = Some(node_id);
                Ok(())
            }
            Some(_) => Err(NodeIdAlreadySet),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Queues a broadcast transfer and advances the caller's transfer id
    /// counter on success. Returns the number of frames enqueued.
    ///
    /// The counter must be persistent per message type; ids from different
    /// descriptors must not share it. Anonymous instances are limited to
    /// single-frame payloads and type ids up to
    /// [`MessageTypeId::ANONYMOUS_MAX`].
    pub fn broadcast(
        &mut self,
        signature: DataTypeSignature,
        message_type: MessageTypeId,
        transfer_id: &mut TransferId,
        priority: Priority,
        payload: &[u8],
    ) -> Result<u8, TransmitError> {
        if payload.len() > MAX_TRANSFER_PAYLOAD {
            return Err(TransmitError::InvalidArgument);
        }

        let id = match self.node_id {
            Some(source) => CanId::message(priority, message_type, source),
            None => {
                if payload.len() > FRAME_PAYLOAD_CAPACITY {
                    return Err(TransmitError::NodeIdNotSet);
                }
                if message_type > MessageTypeId::ANONYMOUS_MAX {
                    return Err(TransmitError::InvalidArgument);
                }
                // The discriminator spreads concurrent anonymous senders
                // over distinct identifiers.
                let mut discriminator = TransferCrc::new();
                discriminator.add_bytes(payload);
                CanId::anonymous(priority, message_type, discriminator.get())
            }
        };

        let count = self.enqueue(id, *transfer_id, signature, payload)?;
        *transfer_id = transfer_id.next();
        Ok(count)
    }

    /// Queues a service request or response. Returns the number of frames
    /// enqueued.
    ///
    /// For requests, the caller's counter is advanced on success and must be
    /// persistent per descriptor. For responses, pass the transfer id of the
    /// received request; it is left untouched.
    pub fn request_or_respond(
        &mut self,
        destination: NodeId,
        signature: DataTypeSignature,
        service_type: ServiceTypeId,
        transfer_id: &mut TransferId,
        priority: Priority,
        kind: ServiceKind,
        payload: &[u8],
    ) -> Result<u8, TransmitError> {
        let Some(source) = self.node_id else {
            return Err(TransmitError::NodeIdNotSet);
        };
        if payload.len() > MAX_TRANSFER_PAYLOAD {
            return Err(TransmitError::InvalidArgument);
        }

        let id = CanId::service(priority, service_type, kind, destination, source);
        let count = self.enqueue(id, *transfer_id, signature, payload)?;
        if kind == ServiceKind::Request {
            *transfer_id = transfer_id.next();
        }
        Ok(count)
    }

    fn enqueue(
        &mut self,
        id: CanId,
        transfer_id: TransferId,
        signature: DataTypeSignature,
        payload: &[u8],
    ) -> Result<u8, OutOfMemory> {
        let mut crc = TransferCrc::with_signature(signature);
        crc.add_bytes(payload);
        self.tx
            .enqueue_transfer(&mut self.pool, id, transfer_id, crc, payload)
    }

    /// Processes one received frame. Completed transfers are delivered to
    /// the handler before this returns.
    pub fn handle_frame(&mut self, frame: &Frame, timestamp: Instant) {
        let Self {
            node_id,
            handler,
            pool,
            rx,
            ..
        } = self;
        rx.handle_frame(pool, *node_id, handler, frame, timestamp);
    }

    /// Highest-priority outbound frame, left queued.
    ///
    /// The driver transmits it, then calls [`pop_tx_frame`](Self::pop_tx_frame).
    /// No send may be queued between the two calls, as it could change the
    /// head of the queue.
    pub fn peek_tx_frame(&self) -> Option<&Frame> {
        self.tx.peek(&self.pool)
    }

    /// Removes the highest-priority outbound frame and frees its block.
    pub fn pop_tx_frame(&mut self) -> Option<Frame> {
        self.tx.pop(&mut self.pool)
    }

    /// Removes reception sessions not updated within `timeout` and frees
    /// their blocks. Call about once per
    /// [`RECOMMENDED_CLEANUP_INTERVAL`]; a sender that dies mid-transfer
    /// leaks nothing.
    pub fn cleanup_stale_transfers(&mut self, now: Instant, timeout: Duration) {
        self.rx.cleanup_stale(&mut self.pool, now, timeout);
    }

    /// Pool usage counters, for sizing the arena against real traffic.
    pub fn pool_statistics(&self) -> Statistics {
        self.pool.statistics()
    }
}
