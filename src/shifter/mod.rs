use std::time::Duration;

use anyhow::Error;
use log::debug;
use tokio::time::sleep;

use crate::gpio::{Level, PinDriver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOrder {
    MsbFirst,
    LsbFirst,
}

/// One chain of cascaded 74HC595-style shift registers.
///
/// Bits are clocked in serially and become visible on the parallel outputs
/// only when the latch line is pulsed, so a full `write` is glitch-free from
/// the outside. The shifter also remembers the last word it committed, which
/// is what the steppers read back before merging in their own nibble.
pub struct Shifter<D: PinDriver> {
    driver: D,
    serial_pin: u8,
    clock_pin: u8,
    latch_pin: u8,
    pulse_delay: Duration,
    chips: usize,
    word: u32,
}

impl<D: PinDriver> Shifter<D> {
    pub fn new(
        driver: D,
        serial_pin: u8,
        clock_pin: u8,
        latch_pin: u8,
        pulse_delay: Duration,
        chips: usize,
    ) -> Self {
        Shifter {
            driver,
            serial_pin,
            clock_pin,
            latch_pin,
            pulse_delay,
            chips,
            word: 0,
        }
    }

    pub fn width_bits(&self) -> usize {
        self.chips * 8
    }

    /// The word most recently committed through [`Shifter::write`].
    pub fn word(&self) -> u32 {
        self.word
    }

    fn mask(&self) -> u32 {
        if self.width_bits() >= 32 {
            u32::MAX
        } else {
            (1 << self.width_bits()) - 1
        }
    }

    /// Short HIGH pulse then LOW on a control pin, holding after each edge.
    async fn ping(&mut self, pin: u8) -> Result<(), Error> {
        self.driver.set_pin(pin, Level::High)?;
        sleep(self.pulse_delay).await;
        self.driver.set_pin(pin, Level::Low)?;
        sleep(self.pulse_delay).await;
        Ok(())
    }

    /// Clock one byte into the chain. Nothing shows on the outputs until
    /// [`Shifter::latch`] runs.
    pub async fn shift_byte(&mut self, byte: u8, order: BitOrder) -> Result<(), Error> {
        for i in 0..8 {
            let bit = match order {
                BitOrder::MsbFirst => (byte >> (7 - i)) & 1,
                BitOrder::LsbFirst => (byte >> i) & 1,
            };
            let level = if bit != 0 { Level::High } else { Level::Low };
            self.driver.set_pin(self.serial_pin, level)?;

            // Rising clock edge moves the bit into the register
            self.ping(self.clock_pin).await?;
        }
        Ok(())
    }

    /// Copy the shifted bits to the parallel outputs.
    pub async fn latch(&mut self) -> Result<(), Error> {
        self.ping(self.latch_pin).await
    }

    /// Shift a full word and latch once, so the outputs update atomically.
    /// Bytes go out farthest-chip-first; each byte is MSB first.
    pub async fn write(&mut self, word: u32) -> Result<(), Error> {
        let word = word & self.mask();
        debug!("Shifting out {:0width$b}", word, width = self.width_bits());

        for chip in (0..self.chips).rev() {
            self.shift_byte((word >> (chip * 8)) as u8, BitOrder::MsbFirst)
                .await?;
        }
        self.latch().await?;
        self.word = word;
        Ok(())
    }

    /// Blank every output.
    pub async fn clear(&mut self) -> Result<(), Error> {
        self.write(0).await
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}
