//! # Emuavcan
//!
//! This library implements the transport layer of the UAVCAN publish/subscribe
//! and request/response protocol over classic CAN, for no_std environments.
//! It reassembles multi-frame transfers from the stream of arriving bus
//! frames, verifies their integrity, fragments outgoing transfers into
//! priority-ordered frames, and draws all storage from one statically sized
//! block pool. No heap, no OS, bounded time on every call.
//!
//! ## Architecture
//!
//! ```text
//!              ┌─────────────┐
//!              │ Bus driver  │
//!              └──┬───────▲──┘
//!        receive()│       │peek/pop
//!                 ▼       │
//! ┌─────────────────────────────────────┐
//! │ Instance                            │
//! │  ┌───────────┐      ┌────────────┐  │
//! │  │ RX engine │      │  TX queue  │  │
//! │  └─────┬─────┘      └─────▲──────┘  │
//! │        │   ┌──────────┐   │         │
//! │        └──►│   Pool   │◄──┘         │
//! │            └──────────┘             │
//! └──────┬──────────────────────▲───────┘
//!        │ deliver              │ broadcast / request_or_respond
//!        ▼                      │
//!              Application
//! ```
//!
//! Components:
//! * _Instance_ holds the local node identity and every resource of one bus
//!   endpoint. The application drives it from a single execution context,
//!   which may be an interrupt handler; the instance never locks and never
//!   blocks.
//! * _RX engine_ keeps one session per active inbound descriptor, reassembles
//!   payloads into the shared pool, and invokes the application's accept
//!   filter and delivery callback ([`instance::TransferHandler`]).
//! * _TX queue_ fragments outbound transfers and keeps the resulting frames
//!   ordered by CAN identifier, so the driver always sends the frame that
//!   wins bus arbitration next.
//! * _Pool_ is a fixed arena of 32-byte blocks shared by both directions;
//!   running out of blocks costs one transfer, never the instance.
//! * The _scalar codec_ ([`codec`]) packs and unpacks integer, boolean, and
//!   floating values at arbitrary bit offsets, including the 16-bit
//!   half-precision float encoding, and reads transparently across the
//!   scattered payload regions of a delivered transfer.
//!
//! The CAN peripheral is a collaborator behind
//! [`bus::Bus`](emuavcan_driver::bus::Bus): a never-blocking
//! transmit/receive pair plus hardware acceptance filters, with
//! [`timing::BitTimings`](emuavcan_driver::timing::BitTimings) solving
//! controller bit timing ahead of initialization.
//!
//! ## Memory model
//!
//! All state lives in the [`instance::Instance`] value; its const parameters
//! size the pool and the session table. Pool blocks are owned by exactly one
//! structure at a time and return to the free list deterministically: on
//! delivery, on transfer discard, on frame pop, or at the staleness sweep.
//! Measure [`pool::Statistics::peak_usage_blocks`] under stress to size the
//! arena.
#![no_std]

pub use emuavcan_core as core;
pub use emuavcan_driver::{bus, frame, time, timing};

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod codec;
mod format;
pub mod instance;
pub mod pool;
mod rx;
pub mod transfer;
mod tx;

pub use instance::{
    Instance, NodeIdAlreadySet, TransferHandler, TransmitError, RECOMMENDED_CLEANUP_INTERVAL,
    TRANSFER_TIMEOUT,
};
pub use transfer::Transfer;
