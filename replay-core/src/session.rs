//! The replay session: event store, navigation and output routing.
//!
//! There is one [`ReplaySession`] per process. Every actor (HTTP handlers,
//! the hardware controller, the playout clock) reaches it through a clone of
//! the same [`SharedSession`], whose single mutex covers the whole session.
//! Compound operations such as "move the pointer, then route the event's
//! shot to preview" are methods on `ReplaySession`, so each runs inside one
//! acquisition.
//!
//! Nothing here performs media I/O except [`ReplaySession::capture_event`],
//! which asks each source for its live position. Shared callers split that
//! into [`SourceRegistry::capture_shots`] before locking and
//! [`ReplaySession::record_event`] under the lock.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;

use crate::error::ControlError;
use crate::event::Event;
use crate::link::LinkState;
use crate::shot::Shot;
use crate::source::SourceRegistry;
use crate::types::{Rational, Timecode};

/// One-shot shift modifier.
///
/// Pressing shift arms it to `Active`; every button press (shift included)
/// decays it one level, so exactly the press after shift sees it set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ShiftState {
    #[default]
    None,
    Armed,
    Active,
}

impl ShiftState {
    pub fn decay(self) -> ShiftState {
        match self {
            ShiftState::Active => ShiftState::Armed,
            ShiftState::Armed | ShiftState::None => ShiftState::None,
        }
    }

    pub fn is_shifted(self) -> bool {
        self != ShiftState::None
    }
}

/// A preview shot kept aside by the operator, with when it was kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredShot {
    pub shot: Shot,
    pub stored_at: DateTime<Utc>,
}

/// Read-only view of the session for `/session.json`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub event_count: usize,
    pub event_pointer: Option<usize>,
    pub current_event_id: Option<u64>,
    pub current_preview_source: usize,
    pub preview_shot: Option<Shot>,
    pub preview_offset: i64,
    pub program_shot: Option<Shot>,
    pub program_position: f64,
    pub program_timecode: Option<Timecode>,
    pub program_queue: Vec<Shot>,
    pub program_speed: Rational,
    pub shift_state: ShiftState,
    pub multiviewer: bool,
    pub encode_suspended: bool,
    pub controller_link: LinkState,
    pub controller_fault: Option<String>,
}

/// What a playout tick did to the program output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing on program
    Idle,
    /// Current program shot keeps playing
    Playing,
    /// Program shot finished; next queued shot took over
    Advanced,
    /// Program shot finished with nothing queued
    Finished,
}

#[derive(Debug, Default)]
pub struct ReplaySession {
    events: Vec<Event>,
    next_event_id: u64,
    event_pointer: Option<usize>,
    current_preview_source: usize,
    preview_shot: Option<Shot>,
    preview_offset: i64,
    program_shot: Option<Shot>,
    program_queue: VecDeque<Shot>,
    program_speed: Rational,
    program_position: f64,
    shift_state: ShiftState,
    stored_shots: Vec<StoredShot>,
    multiviewer: bool,
    encode_suspended: bool,
    controller_link: LinkState,
    controller_fault: Option<String>,
}

impl ReplaySession {
    pub fn new() -> Self {
        ReplaySession::default()
    }

    // -------------------------------------------------------------------------
    // Event store
    // -------------------------------------------------------------------------

    /// Take a shot from every source at its live position and record them
    /// as a new event, which becomes current.
    ///
    /// This queries the sources while the caller holds the session; shared
    /// callers use [`SourceRegistry::capture_shots`] outside the lock and
    /// then [`record_event`](Self::record_event).
    pub fn capture_event(&mut self, sources: &SourceRegistry) -> &Event {
        self.record_event(sources.capture_shots())
    }

    /// Record already-captured shots as a new event, which becomes current.
    ///
    /// Ids are assigned here, so they follow the order in which callers
    /// reach the session.
    pub fn record_event(&mut self, shots: Vec<Option<Shot>>) -> &Event {
        let id = self.next_event_id;
        self.next_event_id += 1;
        self.events.push(Event::new(id, shots));
        let index = self.events.len() - 1;
        self.event_pointer = Some(index);
        self.route_current_event_to_preview();
        info!("Captured event {}", id);
        &self.events[index]
    }

    /// Change an event's category. Returns `None` for an unknown id.
    pub fn retag(&mut self, id: u64, event_type: &str) -> Option<&Event> {
        let event = self.events.iter_mut().find(|e| e.id == id)?;
        debug!("Event {} retagged {} -> {}", id, event.event_type, event_type);
        event.event_type = event_type.to_string();
        Some(event)
    }

    /// All events in id order.
    pub fn events(&self) -> &[Event] {
        // Appended with increasing ids, so insertion order is id order
        &self.events
    }

    pub fn event(&self, id: u64) -> Option<&Event> {
        self.events.iter().find(|e| e.id == id)
    }

    /// Every captured shot, most recent event first, source order within an event.
    pub fn list_shots(&self) -> Vec<Shot> {
        self.events
            .iter()
            .rev()
            .flat_map(|e| e.present_shots().copied())
            .collect()
    }

    /// Discard every event. Ids keep counting from where they were.
    pub fn clear_events(&mut self) {
        info!("Clearing {} events", self.events.len());
        self.events.clear();
        self.event_pointer = None;
    }

    // -------------------------------------------------------------------------
    // Navigation
    // -------------------------------------------------------------------------

    pub fn event_pointer(&self) -> Option<usize> {
        self.event_pointer
    }

    pub fn current_event(&self) -> Option<&Event> {
        self.event_pointer.and_then(|i| self.events.get(i))
    }

    /// Step back one event. Returns false at the first event or when empty.
    pub fn goto_previous_event(&mut self) -> bool {
        match self.event_pointer {
            Some(i) if i > 0 => {
                self.event_pointer = Some(i - 1);
                self.route_current_event_to_preview();
                debug!("Event pointer -> {}", i - 1);
                true
            }
            _ => false,
        }
    }

    /// Step forward one event. Returns false at the last event or when empty.
    pub fn goto_next_event(&mut self) -> bool {
        match self.event_pointer {
            Some(i) if i + 1 < self.events.len() => {
                self.event_pointer = Some(i + 1);
                self.route_current_event_to_preview();
                debug!("Event pointer -> {}", i + 1);
                true
            }
            _ => false,
        }
    }

    pub fn current_preview_source(&self) -> usize {
        self.current_preview_source
    }

    pub fn select_preview_source(&mut self, index: usize) {
        debug!("Preview source -> {}", index);
        self.current_preview_source = index;
        self.route_current_event_to_preview();
    }

    fn route_current_event_to_preview(&mut self) {
        let shot = self
            .current_event()
            .and_then(|e| e.shot(self.current_preview_source))
            .copied();
        if let Some(shot) = shot {
            self.set_preview_shot(shot);
        }
    }

    // -------------------------------------------------------------------------
    // Preview
    // -------------------------------------------------------------------------

    pub fn preview_shot(&self) -> Option<Shot> {
        self.preview_shot
    }

    /// Route a shot to preview, with the cursor at its in-point.
    pub fn set_preview_shot(&mut self, shot: Shot) {
        self.preview_shot = Some(shot);
        self.preview_offset = 0;
    }

    /// Cursor position relative to the preview shot's start.
    pub fn preview_offset(&self) -> i64 {
        self.preview_offset
    }

    /// Move the preview cursor by `frames`. No effect without a preview shot.
    pub fn seek_preview(&mut self, frames: i64) {
        if let Some(shot) = self.preview_shot {
            self.preview_offset = self.preview_offset.saturating_add(frames).max(-shot.start);
        }
    }

    /// The preview shot as it would be marked in at the cursor.
    pub fn preview_at_cursor(&self) -> Option<Shot> {
        self.preview_shot.map(|s| s.at_offset(self.preview_offset))
    }

    /// Make the cursor position the preview shot's new in-point.
    pub fn mark_in(&mut self) -> Option<Shot> {
        let shot = self.preview_at_cursor()?;
        debug!("Mark in at {} on source {}", shot.start, shot.source);
        self.set_preview_shot(shot);
        Some(shot)
    }

    /// Keep the current preview shot (at the cursor) for later.
    pub fn store_preview_shot(&mut self) -> Option<&StoredShot> {
        let shot = self.preview_at_cursor()?;
        info!("Stored shot {:?}", shot);
        self.stored_shots.push(StoredShot {
            shot,
            stored_at: Utc::now(),
        });
        self.stored_shots.last()
    }

    pub fn stored_shots(&self) -> &[StoredShot] {
        &self.stored_shots
    }

    // -------------------------------------------------------------------------
    // Program
    // -------------------------------------------------------------------------

    pub fn program_shot(&self) -> Option<Shot> {
        self.program_shot
    }

    pub fn program_queue(&self) -> impl Iterator<Item = &Shot> {
        self.program_queue.iter()
    }

    pub fn program_speed(&self) -> Rational {
        self.program_speed
    }

    /// Frames played into the current program shot.
    pub fn program_position(&self) -> f64 {
        self.program_position
    }

    /// Put `shot` on air now, dropping anything queued.
    pub fn roll_to_program(&mut self, shot: Shot) {
        info!(
            "Rolling source {} from {} at {}",
            shot.source, shot.start, self.program_speed
        );
        self.program_shot = Some(shot);
        self.program_queue.clear();
        self.program_position = 0.0;
    }

    /// Play `shot` after the current program shot (and anything already queued).
    pub fn queue_to_program(&mut self, shot: Shot) {
        debug!("Queued source {} from {}", shot.source, shot.start);
        self.program_queue.push_back(shot);
    }

    /// First shot to program, the rest queued behind it. Empty is a no-op.
    pub fn roll_queue(&mut self, shots: Vec<Shot>) {
        let mut shots = shots.into_iter();
        if let Some(first) = shots.next() {
            self.roll_to_program(first);
            self.program_queue.extend(shots);
        }
    }

    /// Replace the playback speed; applies to the shot already on air.
    pub fn set_program_speed(&mut self, numerator: u32, denominator: u32) -> Result<(), ControlError> {
        let speed = Rational::checked(numerator, denominator)?;
        self.set_program_speed_fraction(speed);
        Ok(())
    }

    pub fn set_program_speed_fraction(&mut self, speed: Rational) {
        if speed != self.program_speed {
            debug!("Program speed {} -> {}", self.program_speed, speed);
        }
        self.program_speed = speed;
    }

    /// Take program off air. Preview is untouched.
    pub fn stop_program(&mut self) {
        if self.program_shot.is_some() {
            info!("Program stopped");
        }
        self.program_shot = None;
        self.program_queue.clear();
        self.program_position = 0.0;
    }

    /// The current program shot has finished: the queue head replaces it.
    ///
    /// Returns the new program shot; with nothing queued, program stops.
    pub fn advance_program(&mut self) -> Option<Shot> {
        match self.program_queue.pop_front() {
            Some(next) => {
                debug!("Program advancing to source {} from {}", next.source, next.start);
                self.program_shot = Some(next);
                self.program_position = 0.0;
                Some(next)
            }
            None => {
                self.stop_program();
                None
            }
        }
    }

    /// One playout clock tick: advance program by `program_speed` frames.
    pub fn tick_program(&mut self) -> TickOutcome {
        let Some(shot) = self.program_shot else {
            return TickOutcome::Idle;
        };
        self.program_position += self.program_speed.as_f64();
        if shot.is_open_ended() || self.program_position < shot.length as f64 {
            return TickOutcome::Playing;
        }
        match self.advance_program() {
            Some(_) => TickOutcome::Advanced,
            None => TickOutcome::Finished,
        }
    }

    /// Source position currently on program, if anything is.
    pub fn program_timecode(&self) -> Option<Timecode> {
        self.program_shot
            .map(|s| s.start.saturating_add(self.program_position.floor() as i64))
    }

    // -------------------------------------------------------------------------
    // Controller and output state
    // -------------------------------------------------------------------------

    pub fn shift_state(&self) -> ShiftState {
        self.shift_state
    }

    pub fn arm_shift(&mut self) {
        self.shift_state = ShiftState::Active;
    }

    pub fn decay_shift(&mut self) {
        self.shift_state = self.shift_state.decay();
    }

    pub fn multiviewer(&self) -> bool {
        self.multiviewer
    }

    pub fn toggle_multiviewer(&mut self) -> bool {
        self.multiviewer = !self.multiviewer;
        info!("Multiviewer {}", if self.multiviewer { "on" } else { "off" });
        self.multiviewer
    }

    pub fn encode_suspended(&self) -> bool {
        self.encode_suspended
    }

    pub fn suspend_encode(&mut self) {
        info!("Live encode suspended");
        self.encode_suspended = true;
    }

    pub fn resume_encode(&mut self) {
        info!("Live encode resumed");
        self.encode_suspended = false;
    }

    /// Record the hardware controller's link state and last fault.
    pub fn set_controller_status(&mut self, link: LinkState, fault: Option<String>) {
        self.controller_link = link;
        self.controller_fault = fault;
    }

    pub fn controller_fault(&self) -> Option<&str> {
        self.controller_fault.as_deref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            event_count: self.events.len(),
            event_pointer: self.event_pointer,
            current_event_id: self.current_event().map(|e| e.id),
            current_preview_source: self.current_preview_source,
            preview_shot: self.preview_shot,
            preview_offset: self.preview_offset,
            program_shot: self.program_shot,
            program_position: self.program_position,
            program_timecode: self.program_timecode(),
            program_queue: self.program_queue.iter().copied().collect(),
            program_speed: self.program_speed,
            shift_state: self.shift_state,
            multiviewer: self.multiviewer,
            encode_suspended: self.encode_suspended,
            controller_link: self.controller_link,
            controller_fault: self.controller_fault.clone(),
        }
    }
}

/// Handle to the process's one session. Clones share the same lock.
#[derive(Debug, Clone, Default)]
pub struct SharedSession {
    inner: Arc<Mutex<ReplaySession>>,
}

impl SharedSession {
    pub fn new(session: ReplaySession) -> Self {
        SharedSession {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Exclusive access to the whole session.
    ///
    /// A panic in another holder leaves the session between two complete
    /// operations, so a poisoned lock is taken over rather than propagated.
    pub fn lock(&self) -> MutexGuard<'_, ReplaySession> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` inside one acquisition.
    pub fn with<R>(&self, f: impl FnOnce(&mut ReplaySession) -> R) -> R {
        f(&mut self.lock())
    }
}
