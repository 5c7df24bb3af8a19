pub mod config;
pub mod gpio;
pub mod shifter;
pub mod stepper;
pub mod turret;

pub mod prelude {
    pub use crate::{config::*, gpio::*, shifter::*, stepper::*, turret::*};
}
