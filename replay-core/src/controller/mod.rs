//! Jog/shuttle controller protocol.
//!
//! Input devices produce a stream of typed [`ControllerEvent`]s through the
//! [`ControllerInput`] trait; the [`ControlAdapter`] turns each event into
//! session operations. Device decoding lives in [`evdev`] (the USB
//! controller's Linux event records) and [`script`] (a line-based text form
//! used for automation and testing).
//!
//! Button and shuttle handling is table driven: [`BUTTON_BINDINGS`] maps
//! codes to [`ButtonAction`]s and [`SHUTTLE_SPEEDS`] maps shuttle positions
//! to playback speeds.
//!
//! ```rust
//! use replay_core::controller::{shuttle_speed, ControlAdapter, ControllerEvent};
//! use replay_core::{ReplaySession, Rational, SourceRegistry};
//! use std::sync::Arc;
//!
//! let adapter = ControlAdapter::new(Arc::new(SourceRegistry::new(Vec::new())));
//! let mut session = ReplaySession::new();
//! adapter.apply(ControllerEvent::Shuttle(-2), &mut session).unwrap();
//! assert_eq!(session.program_speed(), Rational::new(3, 8));
//! assert_eq!(shuttle_speed(6), Ok(Rational::new(3, 1)));
//! ```

pub mod evdev;
pub mod script;

use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, InputError};
use crate::session::ReplaySession;
use crate::shot::Shot;
use crate::source::SourceRegistry;
use crate::types::Rational;

/// One decoded input from the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerEvent {
    /// Shuttle ring position, -6..=6 with 0 at rest
    Shuttle(i32),
    /// Jog wheel movement in detents, signed
    Jog(i32),
    /// Button pressed
    ButtonDown(u16),
}

/// A device that produces controller events.
///
/// `next_event` blocks until an event is available. `Ok(None)` means the
/// input has ended.
pub trait ControllerInput: Send {
    fn next_event(&mut self) -> Result<Option<ControllerEvent>, InputError>;
}

impl<T: ControllerInput + ?Sized> ControllerInput for Box<T> {
    fn next_event(&mut self) -> Result<Option<ControllerEvent>, InputError> {
        (**self).next_event()
    }
}

/// Frames the preview cursor moves per jog detent
pub const JOG_FRAMES_PER_STEP: i64 = 5;

/// Preview sources selectable without shift; shift adds this many
pub const PREVIEW_BANK_SIZE: usize = 4;

/// What a button does
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ButtonAction {
    PreviousEvent,
    StopProgram,
    /// Mark the preview cursor in, then put preview on program
    MarkInAndRoll,
    NextEvent,
    /// Select preview source `n` (plus [`PREVIEW_BANK_SIZE`] when shifted)
    PreviewSource(usize),
    Shift,
    StoreShot,
    CaptureEvent,
    ToggleMultiviewer,
}

/// Button code to action, for every button that does something
pub const BUTTON_BINDINGS: &[(u16, ButtonAction)] = &[
    (256, ButtonAction::PreviousEvent),
    (257, ButtonAction::StopProgram),
    (258, ButtonAction::MarkInAndRoll),
    (259, ButtonAction::NextEvent),
    (260, ButtonAction::PreviewSource(0)),
    (261, ButtonAction::PreviewSource(1)),
    (262, ButtonAction::PreviewSource(2)),
    (263, ButtonAction::PreviewSource(3)),
    (264, ButtonAction::Shift),
    (265, ButtonAction::StoreShot),
    (266, ButtonAction::StoreShot),
    (267, ButtonAction::StoreShot),
    (268, ButtonAction::StoreShot),
    (269, ButtonAction::CaptureEvent),
    (270, ButtonAction::ToggleMultiviewer),
];

/// Lowest shuttle position in [`SHUTTLE_SPEEDS`]
pub const SHUTTLE_MIN: i32 = -6;

/// Highest shuttle position in [`SHUTTLE_SPEEDS`]
pub const SHUTTLE_MAX: i32 = 6;

/// Playback speed for shuttle positions -6..=6, in order
pub const SHUTTLE_SPEEDS: [Rational; 13] = [
    Rational::new(1, 8),
    Rational::new(1, 6),
    Rational::new(1, 4),
    Rational::new(1, 3),
    Rational::new(3, 8),
    Rational::new(1, 2),
    Rational::new(3, 4),
    Rational::new(1, 1),
    Rational::new(5, 4),
    Rational::new(3, 2),
    Rational::new(2, 1),
    Rational::new(5, 2),
    Rational::new(3, 1),
];

pub fn button_action(code: u16) -> Option<ButtonAction> {
    BUTTON_BINDINGS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, action)| *action)
}

pub fn shuttle_speed(value: i32) -> Result<Rational, ControlError> {
    if !(SHUTTLE_MIN..=SHUTTLE_MAX).contains(&value) {
        return Err(ControlError::ShuttleOutOfRange(value));
    }
    Ok(SHUTTLE_SPEEDS[(value - SHUTTLE_MIN) as usize])
}

/// A controller event with the source reads it needs already done.
///
/// Built by [`ControlAdapter::prepare`] before the session lock is taken, so
/// a capture press never queries sources while the session is held.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedEvent {
    pub event: ControllerEvent,
    captured: Option<Vec<Option<Shot>>>,
}

/// Applies controller events to the session.
#[derive(Debug, Clone)]
pub struct ControlAdapter {
    sources: Arc<SourceRegistry>,
}

impl ControlAdapter {
    pub fn new(sources: Arc<SourceRegistry>) -> Self {
        ControlAdapter { sources }
    }

    /// Gather the source reads `event` needs. Call without the session lock.
    pub fn prepare(&self, event: ControllerEvent) -> PreparedEvent {
        let captured = match event {
            ControllerEvent::ButtonDown(code)
                if button_action(code) == Some(ButtonAction::CaptureEvent) =>
            {
                Some(self.sources.capture_shots())
            }
            _ => None,
        };
        PreparedEvent { event, captured }
    }

    /// Prepare and apply one event against a session the caller holds.
    pub fn apply(&self, event: ControllerEvent, session: &mut ReplaySession) -> Result<(), ControlError> {
        self.apply_prepared(self.prepare(event), session)
    }

    /// Apply one prepared event. The caller holds the session lock for the
    /// duration.
    ///
    /// An out-of-range shuttle value is rejected without touching the
    /// session; unbound button codes are ignored.
    pub fn apply_prepared(
        &self,
        prepared: PreparedEvent,
        session: &mut ReplaySession,
    ) -> Result<(), ControlError> {
        match prepared.event {
            ControllerEvent::Shuttle(value) => {
                let speed = shuttle_speed(value)?;
                session.set_program_speed_fraction(speed);
            }
            ControllerEvent::Jog(delta) => {
                session.seek_preview(i64::from(delta) * JOG_FRAMES_PER_STEP);
            }
            ControllerEvent::ButtonDown(code) => {
                match button_action(code) {
                    Some(action) => self.press(action, prepared.captured, session),
                    None => debug!("Ignoring unbound button {}", code),
                }
                session.decay_shift();
            }
        }
        Ok(())
    }

    fn press(
        &self,
        action: ButtonAction,
        captured: Option<Vec<Option<Shot>>>,
        session: &mut ReplaySession,
    ) {
        debug!("Button {} (shift {})", action, session.shift_state());
        match action {
            ButtonAction::PreviousEvent => {
                session.goto_previous_event();
            }
            ButtonAction::NextEvent => {
                session.goto_next_event();
            }
            ButtonAction::StopProgram => session.stop_program(),
            ButtonAction::MarkInAndRoll => match session.mark_in() {
                Some(shot) => session.roll_to_program(shot),
                None => warn!("Nothing on preview to roll"),
            },
            ButtonAction::PreviewSource(n) => {
                let index = if session.shift_state().is_shifted() {
                    n + PREVIEW_BANK_SIZE
                } else {
                    n
                };
                session.select_preview_source(index);
            }
            ButtonAction::Shift => session.arm_shift(),
            ButtonAction::StoreShot => {
                if session.store_preview_shot().is_none() {
                    warn!("Nothing on preview to store");
                }
            }
            ButtonAction::CaptureEvent => {
                let shots = captured.unwrap_or_else(|| self.sources.capture_shots());
                session.record_event(shots);
            }
            ButtonAction::ToggleMultiviewer => {
                session.toggle_multiviewer();
            }
        }
    }
}
