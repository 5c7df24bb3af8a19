use anyhow::Error;

#[cfg(feature = "pi")]
use anyhow::anyhow;
#[cfg(feature = "pi")]
use log::info;
#[cfg(feature = "pi")]
use rppal::gpio::{Gpio, OutputPin};
#[cfg(feature = "pi")]
use std::collections::HashMap;

pub mod mock;

pub use mock::MockChain;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Boundary to whatever is driving the physical pins. The motion core only
/// ever sets output levels; pulse and step pacing live above this trait.
pub trait PinDriver: Send {
    fn set_pin(&mut self, pin: u8, level: Level) -> Result<(), Error>;
}

/// Real GPIO outputs on the Pi. Claims every pin up front so a wiring typo
/// fails at construction instead of mid-motion.
#[cfg(feature = "pi")]
pub struct GpioDriver {
    pins: HashMap<u8, OutputPin>,
}

#[cfg(feature = "pi")]
impl GpioDriver {
    pub fn new(pin_ids: &[u8]) -> Result<Self, Error> {
        let gpio = Gpio::new()?;
        let mut pins = HashMap::new();

        for &id in pin_ids {
            info!("Claiming GPIO {} as output", id);
            let mut pin = gpio.get(id)?.into_output();

            // Control lines idle low
            pin.set_low();
            pins.insert(id, pin);
        }

        Ok(GpioDriver { pins })
    }
}

#[cfg(feature = "pi")]
impl PinDriver for GpioDriver {
    fn set_pin(&mut self, pin: u8, level: Level) -> Result<(), Error> {
        let pin = self
            .pins
            .get_mut(&pin)
            .ok_or_else(|| anyhow!("GPIO {} was never claimed", pin))?;

        match level {
            Level::High => pin.set_high(),
            Level::Low => pin.set_low(),
        }

        Ok(())
    }
}

#[cfg(feature = "pi")]
impl Drop for GpioDriver {
    fn drop(&mut self) {
        // Leave the register's control lines in a known state on the way out
        for pin in self.pins.values_mut() {
            pin.set_low();
        }
    }
}
