//! Program playout clock.
//!
//! Ticks once per output frame and advances the program shot by the current
//! program speed. Finished shots hand over to the queue; an exhausted queue
//! takes program off air. Each tick is one session lock acquisition with no
//! media I/O inside it.

use std::time::Duration;

use log::{debug, info};
use replay_core::{Rational, SharedSession, TickOutcome};
use tokio::time::{interval, MissedTickBehavior};
use tokio_graceful_shutdown::SubsystemHandle;

pub struct PlayoutClock {
    session: SharedSession,
    frame_rate: Rational,
}

impl PlayoutClock {
    pub fn new(session: SharedSession, frame_rate: Rational) -> Self {
        PlayoutClock {
            session,
            frame_rate,
        }
    }

    /// Time between ticks at the configured frame rate.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate.as_f64())
    }

    /// Advance program by one frame period.
    pub fn tick(&self) -> TickOutcome {
        let outcome = self.session.with(|s| s.tick_program());
        match outcome {
            TickOutcome::Advanced => debug!("Program advanced to next queued shot"),
            TickOutcome::Finished => debug!("Program finished, nothing queued"),
            TickOutcome::Idle | TickOutcome::Playing => {}
        }
        outcome
    }

    pub async fn run(self, subsys: SubsystemHandle) -> anyhow::Result<()> {
        info!("Playout clock running at {} fps", self.frame_rate);
        let mut timer = interval(self.frame_duration());
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    info!("Playout clock: shutdown requested");
                    break;
                }
                _ = timer.tick() => {
                    self.tick();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_core::Shot;

    #[test]
    fn test_frame_duration() {
        let clock = PlayoutClock::new(SharedSession::default(), Rational::new(25, 1));
        assert_eq!(clock.frame_duration(), Duration::from_millis(40));
        let ntsc = PlayoutClock::new(SharedSession::default(), Rational::new(30000, 1001));
        let micros = ntsc.frame_duration().as_micros();
        assert!((33366..=33367).contains(&micros));
    }

    #[test]
    fn test_tick_plays_out_queue() {
        let session = SharedSession::default();
        let clock = PlayoutClock::new(session.clone(), Rational::new(25, 1));
        session.with(|s| s.roll_queue(vec![Shot::new(0, 0, 2), Shot::new(1, 10, 1)]));

        assert_eq!(clock.tick(), TickOutcome::Playing);
        assert_eq!(clock.tick(), TickOutcome::Advanced);
        assert_eq!(session.lock().program_shot(), Some(Shot::new(1, 10, 1)));
        assert_eq!(clock.tick(), TickOutcome::Finished);
        assert_eq!(clock.tick(), TickOutcome::Idle);
    }

    #[test]
    fn test_speed_change_applies_mid_shot() {
        let session = SharedSession::default();
        let clock = PlayoutClock::new(session.clone(), Rational::new(25, 1));
        session.with(|s| s.roll_to_program(Shot::new(0, 0, 4)));
        clock.tick();
        session.with(|s| s.set_program_speed(3, 1)).unwrap();
        assert_eq!(clock.tick(), TickOutcome::Finished);
    }
}
