use std::sync::Arc;

use anyhow::Error;
use log::info;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::gpio::PinDriver;
use crate::shifter::Shifter;
use crate::stepper::{NibbleAllocator, Rotation, StepperActuator};

/// Two steppers on one shift-register chain, driving a pan/tilt mount.
///
/// Commands are in turret degrees; each axis converts to shaft degrees
/// through its gear ratio (stepper degrees per turret degree) before the
/// motion is handed to the actuator. Both axes move on their own tasks, so a
/// diagonal `goto` traces a diagonal, not an L.
pub struct Turret<D: PinDriver> {
    shifter: Arc<Mutex<Shifter<D>>>,
    pan: StepperActuator<D>,
    tilt: StepperActuator<D>,
    pan_gear_ratio: f64,
    tilt_gear_ratio: f64,
}

impl<D: PinDriver + 'static> Turret<D> {
    /// Build the chain and both actuators. Pan claims the low nibble, tilt
    /// the next one up. Config values are validated here so a bad gear ratio
    /// or a zero delay fails at startup instead of mid-motion.
    pub fn new(driver: D, config: &Config) -> Result<Self, Error> {
        config.validate()?;

        let shifter = Shifter::new(
            driver,
            config.serial_pin.bcm(),
            config.clock_pin.bcm(),
            config.latch_pin.bcm(),
            config.pulse_delay(),
            config.chips,
        );
        let width_bits = shifter.width_bits();
        let shifter = Arc::new(Mutex::new(shifter));

        let mut nibbles = NibbleAllocator::new(width_bits);
        let pan = StepperActuator::new(shifter.clone(), nibbles.claim()?, config.step_delay());
        let tilt = StepperActuator::new(shifter.clone(), nibbles.claim()?, config.step_delay());

        info!(
            "Turret up: pan on bits {}..{}, tilt on bits {}..{}",
            pan.nibble().offset(),
            pan.nibble().offset() + 3,
            tilt.nibble().offset(),
            tilt.nibble().offset() + 3,
        );

        let turret = Turret {
            shifter,
            pan,
            tilt,
            pan_gear_ratio: config.gear_ratio_pan,
            tilt_gear_ratio: config.gear_ratio_tilt,
        };
        turret.zero();
        Ok(turret)
    }

    /// Update either gear ratio, leaving the other alone. Values are taken as
    /// given; this is the calibration knob the web UI eventually turns.
    pub fn set_gear_ratios(&mut self, pan: Option<f64>, tilt: Option<f64>) {
        if let Some(ratio) = pan {
            self.pan_gear_ratio = ratio;
        }
        if let Some(ratio) = tilt {
            self.tilt_gear_ratio = ratio;
        }
    }

    /// Declare the current pose to be 0°/0° without moving anything.
    pub fn zero(&self) {
        self.pan.zero();
        self.tilt.zero();
    }

    pub fn pan_shaft_angle(&self) -> f64 {
        self.pan.angle()
    }

    pub fn tilt_shaft_angle(&self) -> f64 {
        self.tilt.angle()
    }

    pub fn pan_turret_angle(&self) -> f64 {
        if self.pan_gear_ratio == 0.0 {
            return 0.0;
        }
        self.pan_shaft_angle() / self.pan_gear_ratio
    }

    pub fn tilt_turret_angle(&self) -> f64 {
        if self.tilt_gear_ratio == 0.0 {
            return 0.0;
        }
        self.tilt_shaft_angle() / self.tilt_gear_ratio
    }

    /// Start both axes toward the given turret angles and return the two
    /// in-flight rotations. Both are started before this returns.
    pub fn goto_async(&self, pan_deg: f64, tilt_deg: f64) -> (Rotation, Rotation) {
        let pan = self.pan.go_angle(pan_deg * self.pan_gear_ratio);
        let tilt = self.tilt.go_angle(tilt_deg * self.tilt_gear_ratio);
        (pan, tilt)
    }

    /// Move both axes and wait for both to finish.
    pub async fn goto(&self, pan_deg: f64, tilt_deg: f64) -> Result<(), Error> {
        let (pan, tilt) = self.goto_async(pan_deg, tilt_deg);
        pan.join().await?;
        tilt.join().await?;
        Ok(())
    }

    pub fn goto_pan_async(&self, pan_deg: f64) -> Rotation {
        self.pan.go_angle(pan_deg * self.pan_gear_ratio)
    }

    pub async fn goto_pan(&self, pan_deg: f64) -> Result<(), Error> {
        self.goto_pan_async(pan_deg).join().await
    }

    pub fn goto_tilt_async(&self, tilt_deg: f64) -> Rotation {
        self.tilt.go_angle(tilt_deg * self.tilt_gear_ratio)
    }

    pub async fn goto_tilt(&self, tilt_deg: f64) -> Result<(), Error> {
        self.goto_tilt_async(tilt_deg).join().await
    }

    /// Drop every coil on the chain. Run this on the way out so the motors
    /// aren't left energized.
    pub async fn clear_outputs(&self) -> Result<(), Error> {
        self.shifter.lock().await.clear().await
    }
}
