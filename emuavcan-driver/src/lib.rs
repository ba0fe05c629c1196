//! Emuavcan driver interface
//!
//! The crate provides an interface between CAN device drivers and the Emuavcan
//! stack. Limited scope facilitates compatibility across versions.
//! Driver crates should depend on this crate. Emuavcan stack users should
//! depend on the `emuavcan` crate instead.
//!
//! A driver implements [`bus::Bus`] on top of the CAN peripheral: never-blocking
//! transmit and receive plus hardware acceptance filter configuration. Frames
//! cross the boundary as [`frame::Frame`] values; [`frame::CanId`] encodes and
//! decodes the protocol's 29-bit identifier layout, so drivers do not need to
//! know it. [`timing::BitTimings`] solves controller bit timing from the
//! peripheral clock and the target bit rate ahead of initialization.

#![no_std]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod bus;
pub mod frame;
pub mod timing;

pub mod time {
    pub use embassy_time::{Duration, Instant};
}
