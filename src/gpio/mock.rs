//! In-memory stand-in for a 74HC595 chain, used by the tests and by the
//! binaries when built without the `pi` feature.

use std::collections::HashMap;

use anyhow::Error;

use super::{Level, PinDriver};

/// Emulates the register chain itself: serial data is sampled on clock rising
/// edges, and the shifted word is copied to the latched outputs on latch
/// rising edges. Nothing sleeps here; timing is the caller's concern.
pub struct MockChain {
    serial_pin: u8,
    clock_pin: u8,
    latch_pin: u8,
    levels: HashMap<u8, Level>,
    shift_word: u32,
    latched_word: u32,
    width_bits: usize,
    clock_pulses: usize,
    latch_pulses: usize,
}

impl MockChain {
    pub fn new(serial_pin: u8, clock_pin: u8, latch_pin: u8, chips: usize) -> Self {
        MockChain {
            serial_pin,
            clock_pin,
            latch_pin,
            levels: HashMap::new(),
            shift_word: 0,
            latched_word: 0,
            width_bits: chips * 8,
            clock_pulses: 0,
            latch_pulses: 0,
        }
    }

    fn level(&self, pin: u8) -> Level {
        *self.levels.get(&pin).unwrap_or(&Level::Low)
    }

    fn mask(&self) -> u32 {
        if self.width_bits >= 32 {
            u32::MAX
        } else {
            (1 << self.width_bits) - 1
        }
    }

    /// The word currently visible on the parallel outputs.
    pub fn latched_word(&self) -> u32 {
        self.latched_word
    }

    pub fn clock_pulses(&self) -> usize {
        self.clock_pulses
    }

    pub fn latch_pulses(&self) -> usize {
        self.latch_pulses
    }
}

impl PinDriver for MockChain {
    fn set_pin(&mut self, pin: u8, level: Level) -> Result<(), Error> {
        let rising = self.level(pin) == Level::Low && level == Level::High;
        self.levels.insert(pin, level);

        if rising && pin == self.clock_pin {
            let bit = match self.level(self.serial_pin) {
                Level::High => 1,
                Level::Low => 0,
            };
            self.shift_word = ((self.shift_word << 1) | bit) & self.mask();
            self.clock_pulses += 1;
        }

        if rising && pin == self.latch_pin {
            self.latched_word = self.shift_word;
            self.latch_pulses += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_in_bit(chain: &mut MockChain, bit: u32) {
        let level = if bit != 0 { Level::High } else { Level::Low };
        chain.set_pin(0, level).unwrap();
        chain.set_pin(1, Level::High).unwrap();
        chain.set_pin(1, Level::Low).unwrap();
    }

    #[test]
    fn test_shift_and_latch() {
        let mut chain = MockChain::new(0, 1, 2, 1);

        for i in (0..8).rev() {
            clock_in_bit(&mut chain, (0b0110_0110 >> i) & 1);
        }

        // Nothing visible until the latch fires
        assert_eq!(chain.latched_word(), 0);

        chain.set_pin(2, Level::High).unwrap();
        chain.set_pin(2, Level::Low).unwrap();
        assert_eq!(chain.latched_word(), 0b0110_0110);
        assert_eq!(chain.clock_pulses(), 8);
        assert_eq!(chain.latch_pulses(), 1);
    }

    #[test]
    fn test_extra_bits_fall_off_the_chain() {
        let mut chain = MockChain::new(0, 1, 2, 1);

        // 16 bits into an 8-bit chain: only the last 8 survive
        for i in (0..16).rev() {
            clock_in_bit(&mut chain, (0xA5C3 >> i) & 1);
        }
        chain.set_pin(2, Level::High).unwrap();
        chain.set_pin(2, Level::Low).unwrap();

        assert_eq!(chain.latched_word(), 0xC3);
    }
}
