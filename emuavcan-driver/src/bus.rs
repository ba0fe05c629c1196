//! CAN controller interface consumed by the stack
//!
//! Driver crates implement [`Bus`] on top of the peripheral registers.
//! Every method completes without blocking; congestion and emptiness are
//! ordinary return values, not wait conditions, so the stack can be driven
//! from an interrupt handler.

use emuavcan_core::{MessageTypeId, NodeId};

use crate::frame::{
    Frame, MSG_TYPE_MASK, MSG_TYPE_OFFSET, SERVICE_FLAG, SOURCE_MASK, SRV_DESTINATION_OFFSET,
};

/// Outcome of a non-blocking transmit attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmitStatus {
    /// The frame was handed to the hardware.
    Sent,
    /// All hardware mailboxes are occupied by frames of equal or higher
    /// priority; retry after the next transmit interrupt.
    NoSpace,
}

/// Id/mask pair of one hardware acceptance filter
///
/// A received identifier matches when `(received ^ id) & mask == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AcceptanceFilter {
    pub id: u32,
    pub mask: u32,
}

impl AcceptanceFilter {
    /// Matches every frame, the hardware reset configuration.
    pub const ACCEPT_ALL: AcceptanceFilter = AcceptanceFilter { id: 0, mask: 0 };

    /// Matches message frames of one data type, from any source.
    pub fn message_type(message_type: MessageTypeId) -> Self {
        Self {
            id: u32::from(u16::from(message_type)) << MSG_TYPE_OFFSET,
            mask: SERVICE_FLAG | (MSG_TYPE_MASK << MSG_TYPE_OFFSET),
        }
    }

    /// Matches service frames addressed to the given node, any type.
    pub fn service_destination(destination: NodeId) -> Self {
        Self {
            id: SERVICE_FLAG | (u32::from(u8::from(destination)) << SRV_DESTINATION_OFFSET),
            mask: SERVICE_FLAG | (SOURCE_MASK << SRV_DESTINATION_OFFSET),
        }
    }
}

/// Never-blocking CAN bus endpoint
pub trait Bus {
    /// Hardware or configuration fault reported by the controller.
    type Error;

    /// Pushes one frame toward the bus, preserving inner priority order.
    fn transmit(&mut self, frame: &Frame) -> Result<TransmitStatus, Self::Error>;

    /// Fetches one frame from the hardware receive FIFOs, oldest first.
    /// `Ok(None)` when nothing is pending.
    fn receive(&mut self) -> Result<Option<Frame>, Self::Error>;

    /// Replaces the hardware acceptance filter configuration.
    ///
    /// An empty set rejects every frame. Frames arriving during
    /// reconfiguration may be lost.
    fn configure_filters(&mut self, filters: &[AcceptanceFilter]) -> Result<(), Self::Error>;
}
