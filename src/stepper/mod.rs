use std::sync::{
    atomic::{AtomicU64, AtomicU8, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{bail, Error};
use log::debug;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::gpio::PinDriver;
use crate::shifter::Shifter;

/// Half-step coil patterns for the 28BYJ-48 through a ULN2003 board. Stepping
/// through these in order (either direction) turns the shaft continuously.
pub const HALF_STEP_SEQUENCE: [u8; 8] = [
    0b0001, 0b0011, 0b0010, 0b0110, 0b0100, 0b1100, 0b1000, 0b1001,
];

/// 4096 half-steps per output revolution (64:1 gearbox behind a 64-step rotor).
pub const STEPS_PER_DEGREE: f64 = 4096.0 / 360.0;

/// A 4-bit slice of the shared output word. Only the allocator can make one,
/// so two motors can never end up on the same coils.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nibble {
    offset: u8,
}

impl Nibble {
    pub fn offset(&self) -> u8 {
        self.offset
    }

    pub fn mask(&self) -> u32 {
        0b1111 << self.offset
    }
}

/// Hands out disjoint nibbles of a register chain, low bits first.
pub struct NibbleAllocator {
    next_offset: usize,
    width_bits: usize,
}

impl NibbleAllocator {
    pub fn new(width_bits: usize) -> Self {
        NibbleAllocator {
            next_offset: 0,
            width_bits,
        }
    }

    pub fn claim(&mut self) -> Result<Nibble, Error> {
        if self.next_offset + 4 > self.width_bits {
            bail!(
                "shift register chain exhausted: {} bits hold at most {} motors",
                self.width_bits,
                self.width_bits / 4
            );
        }
        let nibble = Nibble {
            offset: self.next_offset as u8,
        };
        self.next_offset += 4;
        Ok(nibble)
    }
}

/// An in-flight rotation. Dropping it leaves the motion running; join it to
/// block until the motor stops, or abort it to freeze the coils at the last
/// completed step (the reported angle may then trail the shaft by one step).
pub struct Rotation {
    handle: JoinHandle<Result<(), Error>>,
}

impl Rotation {
    /// Wait for the rotation to finish. Pin-driver failures inside the
    /// stepping task come back here instead of being dropped.
    pub async fn join(self) -> Result<(), Error> {
        self.handle.await??;
        Ok(())
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// One stepper on a shared shift-register chain.
///
/// The actuator owns a nibble of the output word and a wrapped shaft angle in
/// [0, 360). Every step is a read-modify-write of the shared word under the
/// chain's mutex, so two motors stepping at once can't clobber each other's
/// coils. The angle cell is deliberately outside that mutex: reads never tear,
/// but an observer can catch the moment between a coil update and the matching
/// angle update. That matches the motion's open-loop accuracy anyway.
pub struct StepperActuator<D: PinDriver> {
    shifter: Arc<Mutex<Shifter<D>>>,
    nibble: Nibble,
    phase: Arc<AtomicU8>,
    angle: Arc<AtomicU64>,
    step_delay: Duration,
}

impl<D: PinDriver> Clone for StepperActuator<D> {
    fn clone(&self) -> Self {
        StepperActuator {
            shifter: self.shifter.clone(),
            nibble: self.nibble,
            phase: self.phase.clone(),
            angle: self.angle.clone(),
            step_delay: self.step_delay,
        }
    }
}

impl<D: PinDriver + 'static> StepperActuator<D> {
    pub fn new(shifter: Arc<Mutex<Shifter<D>>>, nibble: Nibble, step_delay: Duration) -> Self {
        StepperActuator {
            shifter,
            nibble,
            phase: Arc::new(AtomicU8::new(0)),
            angle: Arc::new(AtomicU64::new(0f64.to_bits())),
            step_delay,
        }
    }

    pub fn nibble(&self) -> Nibble {
        self.nibble
    }

    /// Current shaft angle in degrees, always in [0, 360).
    pub fn angle(&self) -> f64 {
        f64::from_bits(self.angle.load(Ordering::SeqCst))
    }

    /// Re-declare the current shaft position as 0°. No motion, no coil
    /// changes; this only moves the logical reference frame.
    pub fn zero(&self) {
        self.angle.store(0f64.to_bits(), Ordering::SeqCst);
    }

    /// One commutation step. Steps within a rotation run sequentially on one
    /// task, so the phase/angle load-store pairs here don't race themselves.
    async fn step(&self, dir: i8) -> Result<(), Error> {
        let phase = (self.phase.load(Ordering::SeqCst) as i8 + dir).rem_euclid(8) as u8;
        self.phase.store(phase, Ordering::SeqCst);

        let pattern = (HALF_STEP_SEQUENCE[phase as usize] as u32) << self.nibble.offset();
        {
            let mut shifter = self.shifter.lock().await;
            let word = (shifter.word() & !self.nibble.mask()) | pattern;
            shifter.write(word).await?;
        }

        let angle = f64::from_bits(self.angle.load(Ordering::SeqCst));
        let angle = (angle + dir as f64 / STEPS_PER_DEGREE).rem_euclid(360.0);
        self.angle.store(angle.to_bits(), Ordering::SeqCst);
        Ok(())
    }

    /// Turn by a relative angle in the background. The motion runs to
    /// completion on its own task; the returned handle is how the caller
    /// waits for it (or hears about a pin failure partway through).
    pub fn rotate(&self, delta_deg: f64) -> Rotation {
        let steps = (delta_deg.abs() * STEPS_PER_DEGREE) as u64;
        let dir: i8 = if delta_deg > 0.0 {
            1
        } else if delta_deg < 0.0 {
            -1
        } else {
            0
        };

        debug!(
            "Stepper at bit {}: {:+.2} deg = {} steps",
            self.nibble.offset(),
            delta_deg,
            steps
        );

        let actuator = self.clone();
        let step_delay = self.step_delay;
        let handle = tokio::spawn(async move {
            for _ in 0..steps {
                actuator.step(dir).await?;
                sleep(step_delay).await;
            }
            Ok(())
        });

        Rotation { handle }
    }

    /// Turn by a relative angle and block until the motion finishes.
    pub async fn rotate_sync(&self, delta_deg: f64) -> Result<(), Error> {
        self.rotate(delta_deg).join().await
    }

    /// Turn to an absolute shaft angle, taking the shorter way around.
    pub fn go_angle(&self, target_deg: f64) -> Rotation {
        let target = target_deg.rem_euclid(360.0);
        self.rotate(shortest_delta(self.angle(), target))
    }
}

/// Signed delta from `current` to `target`, folded into [-180, 180]. A raw
/// difference of exactly ±180° passes through unmodified, so the boundary
/// always resolves to the same direction.
fn shortest_delta(current: f64, target: f64) -> f64 {
    let mut delta = target - current;
    if delta > 180.0 {
        delta -= 360.0;
    } else if delta < -180.0 {
        delta += 360.0;
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::MockChain;
    use crate::shifter::Shifter;
    use rand::Rng;

    fn shared_shifter() -> Arc<Mutex<Shifter<MockChain>>> {
        let chain = MockChain::new(16, 21, 20, 1);
        Arc::new(Mutex::new(Shifter::new(
            chain,
            16,
            21,
            20,
            Duration::ZERO,
            1,
        )))
    }

    fn actuator(shifter: &Arc<Mutex<Shifter<MockChain>>>, offset: u8) -> StepperActuator<MockChain> {
        StepperActuator::new(shifter.clone(), Nibble { offset }, Duration::ZERO)
    }

    #[test]
    fn test_sequence_is_the_known_good_one() {
        assert_eq!(HALF_STEP_SEQUENCE, [1, 3, 2, 6, 4, 12, 8, 9]);

        // Every adjacent pair (cyclically) flips exactly one coil
        for i in 0..8 {
            let a = HALF_STEP_SEQUENCE[i];
            let b = HALF_STEP_SEQUENCE[(i + 1) % 8];
            assert_eq!((a ^ b).count_ones(), 1, "entries {} and {}", a, b);
        }
    }

    #[test]
    fn test_shortest_delta() {
        assert_eq!(shortest_delta(10.0, 200.0), -170.0);
        assert_eq!(shortest_delta(350.0, 10.0), 20.0);
        assert_eq!(shortest_delta(0.0, 90.0), 90.0);
        // Exactly ±180 is left alone, so the tie always breaks the same way
        assert_eq!(shortest_delta(0.0, 180.0), 180.0);
        assert_eq!(shortest_delta(180.0, 0.0), -180.0);
    }

    #[test]
    fn test_allocator_hands_out_disjoint_nibbles() {
        let mut alloc = NibbleAllocator::new(8);
        let a = alloc.claim().unwrap();
        let b = alloc.claim().unwrap();
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 4);
        assert_eq!(a.mask() & b.mask(), 0);
        assert!(alloc.claim().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_cycles_mod_8() {
        let shifter = shared_shifter();
        let motor = actuator(&shifter, 0);

        for _ in 0..11 {
            motor.step(1).await.unwrap();
        }
        assert_eq!(motor.phase.load(Ordering::SeqCst), 11 % 8);

        for _ in 0..5 {
            motor.step(-1).await.unwrap();
        }
        // 3 - 5 wraps to 6
        assert_eq!(motor.phase.load(Ordering::SeqCst), 6);

        motor.step(-1).await.unwrap();
        let phase = motor.phase.load(Ordering::SeqCst);
        assert_eq!(phase, 5);
        assert_eq!(
            shifter.lock().await.word() as u8,
            HALF_STEP_SEQUENCE[phase as usize]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_go_angle_quantization() {
        let shifter = shared_shifter();
        let motor = actuator(&shifter, 0);

        motor.go_angle(90.0).join().await.unwrap();

        // 90 deg at 4096/360 steps per degree is exactly 1024 steps
        let quantum = 1.0 / STEPS_PER_DEGREE;
        assert!((motor.angle() - 90.0).abs() <= quantum + 1e-9);
        assert_eq!(shifter.lock().await.driver().latch_pulses(), 1024);
    }

    #[tokio::test(start_paused = true)]
    async fn test_go_angle_takes_the_short_way() {
        let shifter = shared_shifter();
        let motor = actuator(&shifter, 0);

        motor.go_angle(350.0).join().await.unwrap();

        // 0 -> 350 should go backwards through the wrap, not forward 350
        let quantum = 1.0 / STEPS_PER_DEGREE;
        assert!((motor.angle() - 350.0).abs() <= quantum + 1e-9);
        let steps = shifter.lock().await.driver().latch_pulses();
        assert_eq!(steps as u64, (10.0 * STEPS_PER_DEGREE) as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotate_zero_completes_immediately() {
        let shifter = shared_shifter();
        let motor = actuator(&shifter, 0);

        motor.rotate(0.0).join().await.unwrap();
        assert_eq!(shifter.lock().await.driver().latch_pulses(), 0);
        assert_eq!(motor.angle(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_is_motion_free() {
        let shifter = shared_shifter();
        let motor = actuator(&shifter, 0);

        motor.rotate_sync(5.0).await.unwrap();
        let clocks = shifter.lock().await.driver().clock_pulses();
        let latches = shifter.lock().await.driver().latch_pulses();
        assert!(motor.angle() > 0.0);

        motor.zero();

        assert_eq!(motor.angle(), 0.0);
        assert_eq!(shifter.lock().await.driver().clock_pulses(), clocks);
        assert_eq!(shifter.lock().await.driver().latch_pulses(), latches);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nibbles_stay_isolated_under_interleaving() {
        let shifter = shared_shifter();
        let low = actuator(&shifter, 0);
        let high = actuator(&shifter, 4);
        let mut rng = rand::thread_rng();

        // Prime both motors so each nibble holds a real pattern
        low.step(1).await.unwrap();
        high.step(1).await.unwrap();

        for _ in 0..1000 {
            let dir = if rng.gen_bool(0.5) { 1 } else { -1 };
            if rng.gen_bool(0.5) {
                low.step(dir).await.unwrap();
            } else {
                high.step(dir).await.unwrap();
            }

            let word = shifter.lock().await.word();
            let low_phase = low.phase.load(Ordering::SeqCst) as usize;
            let high_phase = high.phase.load(Ordering::SeqCst) as usize;
            assert_eq!(word & 0b1111, HALF_STEP_SEQUENCE[low_phase] as u32);
            assert_eq!(word >> 4, HALF_STEP_SEQUENCE[high_phase] as u32);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_angle_wraps_through_zero() {
        let shifter = shared_shifter();
        let motor = actuator(&shifter, 0);

        motor.rotate_sync(-10.0).await.unwrap();
        let angle = motor.angle();
        assert!(angle < 360.0 && angle > 349.0, "angle was {}", angle);
    }
}
