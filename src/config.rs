use std::time::Duration;

use anyhow::{bail, Error};
use pi_pinout::{GpioPin, PhysicalPin, WiringPiPin};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct Config {
    pub serial_pin: Pin,
    pub clock_pin: Pin,
    pub latch_pin: Pin,
    /// Hold time after each control-line edge, in microseconds
    pub pulse_delay_us: u64,
    /// Pause between motor steps, in microseconds
    pub step_delay_us: u64,
    /// Stepper degrees per turret degree, pan axis
    pub gear_ratio_pan: f64,
    /// Stepper degrees per turret degree, tilt axis
    pub gear_ratio_tilt: f64,
    /// Number of cascaded shift-register chips on the chain
    pub chips: usize,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
pub enum Pin {
    Physical(PhysicalPin),
    Gpio(GpioPin),
    WiringPi(WiringPiPin),
}

impl Pin {
    /// Resolve to a BCM pin number regardless of how it was written in the
    /// config file.
    pub fn bcm(&self) -> u8 {
        let pin: GpioPin = match *self {
            Pin::Physical(pin) => pin.into(),
            Pin::Gpio(pin) => pin,
            Pin::WiringPi(pin) => pin.into(),
        };
        pin.0
    }
}

impl Default for Config {
    fn default() -> Self {
        // The wiring the turret was built with: data on GPIO 16, latch on
        // GPIO 20, clock on GPIO 21, one 74HC595 driving both motor boards.
        Config {
            serial_pin: Pin::Gpio(GpioPin(16)),
            latch_pin: Pin::Gpio(GpioPin(20)),
            clock_pin: Pin::Gpio(GpioPin(21)),
            pulse_delay_us: 50,
            step_delay_us: 1200,
            gear_ratio_pan: 1.0,
            gear_ratio_tilt: 1.0,
            chips: 1,
        }
    }
}

impl Config {
    pub fn load() -> Result<Config, Error> {
        let config = std::fs::read_to_string("config.ron")?;
        Config::from_str(&config)
    }

    pub fn from_str(config: &str) -> Result<Config, Error> {
        let config: Config = ron::from_str(config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.pulse_delay_us == 0 {
            bail!("pulse_delay_us must be positive");
        }
        if self.step_delay_us == 0 {
            bail!("step_delay_us must be positive");
        }
        if !(self.gear_ratio_pan > 0.0) {
            bail!("gear_ratio_pan must be positive");
        }
        if !(self.gear_ratio_tilt > 0.0) {
            bail!("gear_ratio_tilt must be positive");
        }
        if self.chips == 0 || self.chips > 4 {
            bail!("chips must be between 1 and 4");
        }
        Ok(())
    }

    pub fn pulse_delay(&self) -> Duration {
        Duration::from_micros(self.pulse_delay_us)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_micros(self.step_delay_us)
    }
}
