//! # Replay Server
//!
//! Instant replay station controller with an HTTP control surface and
//! jog/shuttle hardware input.
//!
//! This crate provides the I/O shell around [`replay_core`]:
//! - Spool-directory video/audio sources ([`spool::SpoolSource`])
//! - A supervised hardware controller subsystem ([`controller`])
//! - The program playout clock ([`playout`])
//! - Rollout of prepared clips through an external transcoder ([`rollout`])
//! - The REST control surface (the `web` module in `main.rs`)
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     replay-server                        │
//! │  ┌────────────┐  ┌──────────────┐  ┌──────────────────┐  │
//! │  │ REST API   │  │ Controller   │  │ Playout clock    │  │
//! │  │ (axum)     │  │ (evdev/stdin)│  │ (frame ticks)    │  │
//! │  └─────┬──────┘  └──────┬───────┘  └────────┬─────────┘  │
//! │        │                │                   │            │
//! │        ▼                ▼                   ▼            │
//! │  ┌─────────────────────────────────────────────────────┐ │
//! │  │        SharedSession (one Mutex<ReplaySession>)     │ │
//! │  └─────────────────────────────────────────────────────┘ │
//! │        │ live positions read before locking              │
//! │        ▼ media fetched without the lock                  │
//! │  ┌─────────────────────────────────────────────────────┐ │
//! │  │        SourceRegistry (SpoolSource per --source)    │ │
//! │  └─────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example: Starting the Server
//!
//! ```rust,no_run
//! use clap::Parser;
//! use replay_server::{Cli, Station};
//! use tokio_graceful_shutdown::Toplevel;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let args = Cli::parse_from(["replay-server", "-p", "8080", "--source", "/spool/cam-a"]);
//!     let station = Station::new(args).unwrap();
//!
//!     Toplevel::new(|s| async move {
//!         station.start_subsystems(&s);
//!         // Start web server, etc.
//!     })
//!     .catch_signals()
//!     .handle_shutdown_requests(Duration::from_secs(5))
//!     .await
//!     .unwrap();
//! }
//! ```
//!
//! ## Command-Line Interface
//!
//! See [`Cli`] for all available options. Key options:
//!
//! - `-p, --port` - HTTP server port (default: 3000)
//! - `-v` - Increase verbosity (use multiple times)
//! - `--source` - Spool directory of one camera, repeat per camera
//! - `--controller` - Jog/shuttle evdev device, or `-` for a stdin script
//! - `--playout-dir` - Where the playout process keeps its input pipes

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use log::info;
use replay_core::{Rational, SharedSession, Source, SourceError, SourceRegistry};
use thiserror::Error;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

pub mod config;
pub mod controller;
pub mod playout;
pub mod rollout;
pub mod spool;

use controller::ControllerSupervisor;
use playout::PlayoutClock;
use rollout::{PlayoutOutputs, RolloutError, RolloutManager};
use spool::SpoolSource;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Clone, Debug)]
#[command(version, about)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Port for webserver
    #[arg(short, long, default_value_t = 3000)]
    pub port: u16,

    /// Spool directory of a camera source. Repeat for each camera; the
    /// first is source 0.
    #[arg(long = "source", value_name = "DIR")]
    pub sources: Vec<PathBuf>,

    /// Jog/shuttle controller evdev node, or `-` to read a text script
    /// from stdin
    #[arg(long, value_name = "PATH")]
    pub controller: Option<PathBuf>,

    /// Directory holding clips for rollout [default: platform data dir]
    #[arg(long, value_name = "DIR")]
    pub rollout_dir: Option<PathBuf>,

    /// Transcoder used for rollout
    #[arg(long, default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// Directory holding the playout process's `video.fifo` and
    /// `audio.fifo` [default: platform data dir]
    #[arg(long, value_name = "DIR")]
    pub playout_dir: Option<PathBuf>,

    /// Program clock rate, frames per second as a fraction
    #[arg(long, default_value = "30000/1001")]
    pub frame_rate: Rational,

    /// Length given to shots taken at the live position, 0 for open-ended
    #[arg(long, default_value_t = 0)]
    pub shot_length: i64,
}

impl Cli {
    pub fn rollout_dir(&self) -> PathBuf {
        self.rollout_dir
            .clone()
            .unwrap_or_else(config::default_rollout_dir)
    }

    pub fn playout_dir(&self) -> PathBuf {
        self.playout_dir
            .clone()
            .unwrap_or_else(config::default_playout_dir)
    }
}

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Cannot open source {}: {source}", path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: SourceError,
    },

    #[error(transparent)]
    Rollout(#[from] RolloutError),

    #[error("Frame rate {0} is not usable")]
    FrameRate(Rational),
}

/// Everything the subsystems and the web server share.
#[derive(Clone)]
pub struct Station {
    pub args: Cli,
    pub session: SharedSession,
    pub sources: Arc<SourceRegistry>,
    pub rollout: Arc<RolloutManager>,
}

impl Station {
    /// Open the spool sources and rollout directory named by `args`.
    pub fn new(args: Cli) -> Result<Station, StartupError> {
        let mut sources: Vec<Arc<dyn Source>> = Vec::with_capacity(args.sources.len());
        for dir in &args.sources {
            let source = SpoolSource::open(dir).map_err(|source| StartupError::Source {
                path: dir.clone(),
                source,
            })?;
            info!("Source {}: {}", sources.len(), dir.display());
            sources.push(Arc::new(source));
        }
        let registry = SourceRegistry::new(sources).with_shot_length(args.shot_length);
        let rollout_dir = args.rollout_dir();
        Self::with_sources(args, registry, &rollout_dir)
    }

    /// Build a station around an existing registry.
    pub fn with_sources(
        args: Cli,
        sources: SourceRegistry,
        rollout_dir: &Path,
    ) -> Result<Station, StartupError> {
        if args.frame_rate.numerator == 0 || args.frame_rate.denominator == 0 {
            return Err(StartupError::FrameRate(args.frame_rate));
        }
        let outputs = PlayoutOutputs::in_dir(&args.playout_dir());
        let rollout = RolloutManager::new(rollout_dir, &args.ffmpeg, outputs)?;
        Ok(Station {
            args,
            session: SharedSession::default(),
            sources: Arc::new(sources),
            rollout: Arc::new(rollout),
        })
    }

    /// Start the playout clock and, if configured, the controller.
    pub fn start_subsystems(&self, subsystem: &SubsystemHandle) {
        let clock = PlayoutClock::new(self.session.clone(), self.args.frame_rate);
        subsystem.start(SubsystemBuilder::new("Playout", |subsys| clock.run(subsys)));

        match &self.args.controller {
            Some(path) => {
                let supervisor = ControllerSupervisor::new(
                    self.session.clone(),
                    self.sources.clone(),
                    path.clone(),
                );
                subsystem.start(SubsystemBuilder::new("Controller", |subsys| {
                    supervisor.run(subsys)
                }));
            }
            None => info!("No controller configured, HTTP control only"),
        }
    }
}

impl std::fmt::Debug for Station {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Station {{ sources: {} }}", self.sources.len())
    }
}
