//! # Replay Core
//!
//! Platform-independent session model and control protocol for an instant
//! replay station.
//!
//! This crate holds the logic shared by every front end: no async runtime,
//! no sockets, no HTTP. Media comes in through the [`Source`] trait and
//! controller input through [`ControllerInput`], so the same session runs
//! against real capture hardware, spool directories, or in-memory fakes.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  replay-core (no tokio, no I/O of its own)                  │
//! │  ├── shot / event   (references into sources, wire codec)   │
//! │  ├── source         (Source trait, SourceRegistry)          │
//! │  ├── session        (ReplaySession, SharedSession)          │
//! │  ├── controller/    (evdev + script decoding, ControlAdapter)│
//! │  ├── link           (controller link state, backoff)        │
//! │  └── media          (lazy frame/audio iterators)            │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                 ┌────────────┴────────────┐
//!                 │  replay-server          │
//!                 │  (axum, tokio, spool)   │
//!                 └─────────────────────────┘
//! ```
//!
//! ## Key Modules
//!
//! - [`shot`] - Shot references and their JSON form
//! - [`event`] - Captured events
//! - [`source`] - Source trait and registry
//! - [`session`] - The replay session and its lock
//! - [`controller`] - Jog/shuttle input decoding and dispatch
//! - [`link`] - Controller link state machine with backoff logic
//! - [`media`] - Lazy media iterators
//!
//! ## Example: Capture and roll
//!
//! ```rust
//! use replay_core::{MemorySource, ReplaySession, Source, SourceRegistry};
//! use std::sync::Arc;
//!
//! let cams: Vec<Arc<dyn Source>> = vec![
//!     Arc::new(MemorySource::new("wide", 0, 300)),
//!     Arc::new(MemorySource::new("tight", 0, 300)),
//! ];
//! let sources = SourceRegistry::new(cams);
//! let mut session = ReplaySession::new();
//!
//! let event = session.capture_event(&sources).clone();
//! assert_eq!(event.id, 0);
//!
//! session.select_preview_source(1);
//! let shot = session.preview_shot().unwrap();
//! session.roll_to_program(shot);
//! assert_eq!(session.program_shot(), Some(shot));
//! ```

pub mod controller;
pub mod error;
pub mod event;
pub mod link;
pub mod media;
pub mod session;
pub mod shot;
pub mod source;
pub mod types;

// Re-export commonly used types
pub use controller::{ControlAdapter, ControllerEvent, ControllerInput, PreparedEvent};
pub use error::{ControlError, InputError, ShotError, SourceError};
pub use event::Event;
pub use link::{LinkMonitor, LinkState};
pub use media::{MediaIter, MediaKind};
pub use session::{ReplaySession, SessionSnapshot, SharedSession, ShiftState, StoredShot, TickOutcome};
pub use shot::Shot;
pub use source::{MemorySource, Source, SourceRegistry};
pub use types::{Rational, Timecode};
