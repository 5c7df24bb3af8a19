use anyhow::Error;
use log::info;
use std::time::Duration;
use turret_motion::prelude::*;

#[cfg(feature = "pi")]
fn driver(config: &Config) -> Result<GpioDriver, Error> {
    GpioDriver::new(&[
        config.serial_pin.bcm(),
        config.clock_pin.bcm(),
        config.latch_pin.bcm(),
    ])
}

#[cfg(not(feature = "pi"))]
fn driver(config: &Config) -> Result<MockChain, Error> {
    Ok(MockChain::new(
        config.serial_pin.bcm(),
        config.clock_pin.bcm(),
        config.latch_pin.bcm(),
        config.chips,
    ))
}

/// Runs the turret through a fixed set of moves so motion smoothness and the
/// gear ratios can be checked against the real mechanism.
#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(_) => {
            info!("No config.ron, using the default wiring");
            Config::default()
        }
    };

    let turret = Turret::new(driver(&config)?, &config)?;
    turret.zero();
    info!(
        "Zeroed: pan={:.1} deg, tilt={:.1} deg",
        turret.pan_shaft_angle(),
        turret.tilt_shaft_angle()
    );

    let moves = [(45.0, 0.0), (-45.0, 10.0), (0.0, 25.0), (0.0, 0.0)];
    let result = async {
        for (pan, tilt) in moves {
            info!("Moving to pan={:.1} deg, tilt={:.1} deg", pan, tilt);
            turret.goto(pan, tilt).await?;
            info!(
                "Shaft angles: pan={:.1} deg, tilt={:.1} deg",
                turret.pan_shaft_angle(),
                turret.tilt_shaft_angle()
            );
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Ok::<_, Error>(())
    }
    .await;

    // De-energize the coils whether or not the sequence finished
    turret.clear_outputs().await?;
    result?;

    info!("Test sequence complete");
    Ok(())
}
