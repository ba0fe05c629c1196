//! CAN bit timing solver
//!
//! Given the peripheral clock feeding the CAN macrocell and the desired bit
//! rate, [`BitTimings::compute`] solves for prescaler and segment values,
//! maximizing the number of time quanta per bit and placing the sample point
//! as close as possible to the recommended 87.5 %. Only exact-division
//! solutions are accepted; an approximate bit rate would drift against the
//! rest of the bus.

use core::num::{NonZeroU16, NonZeroU8};

/// No exact timing solution exists for the clock/bit-rate pair within the
/// supported hardware ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UnsupportedBitRate;

/// Bit timing parameters of a classic CAN controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitTimings {
    /// Clock prescaler; the bit time is built from multiples of the resulting
    /// time quantum. Valid range: 1 to 1024.
    pub prescaler: NonZeroU16,
    /// Time segment 1, from the end of the sync quantum to the sample point.
    /// Valid range: 1 to 16.
    pub seg1: NonZeroU8,
    /// Time segment 2, from the sample point to the end of the bit.
    /// Valid range: 1 to 8.
    pub seg2: NonZeroU8,
    /// Synchronization jump width for clock tolerance. Valid range: 1 to 4.
    pub sync_jump_width: NonZeroU8,
}

impl BitTimings {
    const MAX_SEG1: u32 = 16;
    const MAX_SEG2: u32 = 8;
    const MAX_PRESCALER: u32 = 1024;
    const MAX_SAMPLE_POINT_PERMILL: u32 = 900;

    /// Solves for the timing parameters, or fails when the bit rate cannot
    /// be produced exactly from the given clock.
    ///
    /// Both arguments are in hertz. Bit rates below 1 kbit/s are rejected.
    pub fn compute(peripheral_clock: u32, bit_rate: u32) -> Result<Self, UnsupportedBitRate> {
        if bit_rate < 1000 {
            return Err(UnsupportedBitRate);
        }

        // Optimal quanta per bit per "Automatic Baudrate Detection in CANopen
        // Networks" (U. Koppe): 8..10 at 1 Mbit/s, 16..17 below.
        let max_quanta_per_bit: u32 = if bit_rate >= 1_000_000 { 10 } else { 17 };

        // bit_rate = clock / (prescaler * (1 + seg1 + seg2)), so the product
        // prescaler * quanta_per_bit must divide the clock rate exactly.
        let prescaler_bs = peripheral_clock / bit_rate;

        let mut seg_sum = max_quanta_per_bit - 1;
        while prescaler_bs % (1 + seg_sum) != 0 {
            if seg_sum <= 2 {
                return Err(UnsupportedBitRate);
            }
            seg_sum -= 1;
        }

        let prescaler = prescaler_bs / (1 + seg_sum);
        if prescaler < 1 || prescaler > Self::MAX_PRESCALER {
            return Err(UnsupportedBitRate);
        }

        // With seg1 + seg2 fixed, pick the split whose sample point
        //   (1 + seg1) / (1 + seg1 + seg2)
        // lands nearest 7/8, preferring rounding up unless that overshoots
        // the 900 permille cap.
        let mut seg1 = (7 * seg_sum - 1 + 4) / 8;
        let mut seg2 = seg_sum - seg1;

        let sample_point_permill = 1000 * (1 + seg1) / (1 + seg_sum);
        if sample_point_permill > Self::MAX_SAMPLE_POINT_PERMILL {
            seg1 = (7 * seg_sum - 1) / 8;
            seg2 = seg_sum - seg1;
        }

        let valid =
            (1..=Self::MAX_SEG1).contains(&seg1) && (1..=Self::MAX_SEG2).contains(&seg2);
        if !valid || bit_rate != peripheral_clock / (prescaler * (1 + seg_sum)) {
            return Err(UnsupportedBitRate);
        }

        Ok(Self {
            prescaler: unwrap!(NonZeroU16::new(prescaler as u16)),
            seg1: unwrap!(NonZeroU8::new(seg1 as u8)),
            seg2: unwrap!(NonZeroU8::new(seg2 as u8)),
            // SJW of 1 is the value recommended for UAVCAN buses.
            sync_jump_width: unwrap!(NonZeroU8::new(1)),
        })
    }

    /// Sample point location produced by these timings, in permille.
    pub fn sample_point_permill(&self) -> u16 {
        let seg1 = u16::from(self.seg1.get());
        let seg2 = u16::from(self.seg2.get());
        1000 * (1 + seg1) / (1 + seg1 + seg2)
    }

    /// Bit rate these timings produce from the given peripheral clock.
    pub fn bit_rate(&self, peripheral_clock: u32) -> u32 {
        let quanta = 1 + u32::from(self.seg1.get()) + u32::from(self.seg2.get());
        peripheral_clock / (u32::from(self.prescaler.get()) * quanta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_500k_at_8mhz() {
        let timings = BitTimings::compute(8_000_000, 500_000).unwrap();
        assert_eq!(timings.prescaler.get(), 1);
        assert_eq!(timings.seg1.get(), 13);
        assert_eq!(timings.seg2.get(), 2);
        assert_eq!(timings.bit_rate(8_000_000), 500_000);
        assert_eq!(timings.sample_point_permill(), 875);
    }

    #[test]
    fn test_1m_at_36mhz() {
        let timings = BitTimings::compute(36_000_000, 1_000_000).unwrap();
        assert_eq!(timings.prescaler.get(), 4);
        assert_eq!(timings.seg1.get(), 7);
        assert_eq!(timings.seg2.get(), 1);
        assert_eq!(timings.bit_rate(36_000_000), 1_000_000);
    }

    #[test]
    fn test_standard_rates_at_72mhz() {
        for rate in [1_000_000, 500_000, 250_000, 125_000] {
            let timings = BitTimings::compute(72_000_000, rate).unwrap();
            assert_eq!(timings.bit_rate(72_000_000), rate);
            assert!(timings.sample_point_permill() <= 900);
        }
    }

    #[test]
    fn test_inexact_rate_rejected() {
        assert_eq!(
            BitTimings::compute(8_000_000, 600_000),
            Err(UnsupportedBitRate)
        );
    }

    #[test]
    fn test_sub_kilobit_rejected() {
        assert_eq!(BitTimings::compute(8_000_000, 999), Err(UnsupportedBitRate));
    }
}
