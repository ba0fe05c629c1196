//! Delivered transfer view
//!
//! A [`Transfer`] is handed to the application callback when reception of a
//! transfer completes. It borrows the engine's storage: the view and every
//! byte it exposes are valid only until the callback returns. The payload of
//! a multi-frame transfer is scattered over up to three regions (the inline
//! session head, chained pool blocks, the final frame), which the accessors
//! hide behind one logical byte index.
//!
//! Chained blocks return to the pool when the view drops, which the engine
//! does right after the callback. A callback that wants the blocks back in
//! the pool before doing further work calls [`Transfer::release_payload`]
//! first; this keeps peak pool usage down when a response is sent right
//! after `handle_frame` returns.

use crate::codec::{self, CodecError};
use crate::core::TransferId;
use crate::frame::Header;
use crate::pool::{free_chain, Block, BlockIndex, BlockStore};
use crate::time::Instant;

/// Payload bytes that fit inline in a reception session before the first
/// pool block is chained.
pub const PAYLOAD_HEAD_SIZE: usize = 6;

pub(crate) enum Payload<'a> {
    /// Whole payload in the single frame that carried it.
    Single(&'a [u8]),
    /// Head bytes inline in the session record, middle in chained pool
    /// blocks, tail borrowed from the final frame.
    Scattered {
        head: &'a [u8],
        chain: Option<BlockIndex>,
        tail: &'a [u8],
        length: usize,
        store: &'a mut dyn BlockStore,
    },
}

/// One completed inbound transfer, valid for the duration of the delivery
/// callback
pub struct Transfer<'a> {
    /// Reception time of the first frame.
    pub timestamp: Instant,
    /// Routing of the transfer; priority is taken from the closing frame.
    pub header: Header,
    pub transfer_id: TransferId,
    payload: Payload<'a>,
}

impl<'a> Transfer<'a> {
    pub(crate) fn single(
        timestamp: Instant,
        header: Header,
        transfer_id: TransferId,
        payload: &'a [u8],
    ) -> Self {
        Self {
            timestamp,
            header,
            transfer_id,
            payload: Payload::Single(payload),
        }
    }

    pub(crate) fn scattered(
        timestamp: Instant,
        header: Header,
        transfer_id: TransferId,
        head: &'a [u8],
        chain: Option<BlockIndex>,
        tail: &'a [u8],
        length: usize,
        store: &'a mut dyn BlockStore,
    ) -> Self {
        Self {
            timestamp,
            header,
            transfer_id,
            payload: Payload::Scattered {
                head,
                chain,
                tail,
                length,
                store,
            },
        }
    }

    pub fn payload_len(&self) -> usize {
        match &self.payload {
            Payload::Single(data) => data.len(),
            Payload::Scattered { length, .. } => *length,
        }
    }

    /// Payload byte at `index`, or `None` past the end.
    pub fn payload_byte(&self, index: usize) -> Option<u8> {
        match &self.payload {
            Payload::Single(data) => data.get(index).copied(),
            Payload::Scattered {
                head,
                chain,
                tail,
                length,
                store,
            } => {
                if index >= *length {
                    return None;
                }
                if index < head.len() {
                    return Some(head[index]);
                }

                let mut offset = head.len();
                let mut cursor = *chain;
                while let Some(block) = cursor {
                    let Block::Segment(segment) = store.block(block) else {
                        unreachable!();
                    };
                    let segment_len = usize::from(segment.len);
                    if index < offset + segment_len {
                        return Some(segment.data[index - offset]);
                    }
                    offset += segment_len;
                    cursor = store.next(block);
                }
                tail.get(index - offset).copied()
            }
        }
    }

    /// Copies the payload into `out`, returning the number of bytes written.
    pub fn copy_payload(&self, out: &mut [u8]) -> usize {
        let length = core::cmp::min(self.payload_len(), out.len());
        for (index, slot) in out[..length].iter_mut().enumerate() {
            *slot = unwrap!(self.payload_byte(index));
        }
        length
    }

    /// Decodes a scalar field across the payload regions.
    /// Same contract as [`codec::decode_scalar`].
    pub fn decode_scalar(
        &self,
        bit_offset: usize,
        bit_length: u8,
        signed: bool,
    ) -> Result<(u8, u64), CodecError> {
        codec::decode_with(
            |index| self.payload_byte(index),
            bit_offset,
            bit_length,
            signed,
        )
    }

    /// Returns the chained pool blocks backing the payload middle to the
    /// free list immediately. Afterwards only the inline head region stays
    /// readable; read everything needed before releasing.
    pub fn release_payload(&mut self) {
        if let Payload::Scattered {
            chain,
            store,
            length,
            head,
            ..
        } = &mut self.payload
        {
            free_chain(*store, chain.take());
            // Byte offsets past the head would otherwise alias the tail
            // onto the freed middle.
            *length = core::cmp::min(*length, head.len());
        }
    }
}

impl Drop for Transfer<'_> {
    fn drop(&mut self) {
        self.release_payload();
    }
}
