//! Supervised hardware controller input.
//!
//! The controller device is read on a dedicated OS thread, since evdev reads
//! block. Decoded events are forwarded over a channel to this subsystem,
//! which applies each one to the session on the blocking pool: source reads
//! first, then the session lock. A malformed script line is logged and
//! skipped. A failed open or read is recorded in the session (so
//! `/session.json` shows it) and the device is reopened after an exponential
//! backoff. The HTTP surface keeps running throughout.
//!
//! ```text
//!  device thread            Controller subsystem              session
//!  ─────────────            ────────────────────              ───────
//!  next_event() ──mpsc──▶   spawn_blocking:
//!                             ControlAdapter::prepare
//!                             ControlAdapter::apply_prepared ──lock──▶ ReplaySession
//!                           LinkMonitor (backoff)  ──lock──▶  controller_link
//! ```

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use replay_core::controller::evdev::EvdevInput;
use replay_core::controller::script::ScriptInput;
use replay_core::{
    ControlAdapter, ControllerEvent, ControllerInput, InputError, LinkMonitor, LinkState,
    SharedSession, SourceRegistry,
};
use tokio::sync::mpsc;
use tokio_graceful_shutdown::SubsystemHandle;

/// `--controller` value that reads the text script protocol from stdin
pub const STDIN_SCRIPT: &str = "-";

const CHANNEL_DEPTH: usize = 64;

type InputMessage = Result<Option<ControllerEvent>, InputError>;

/// Open the configured input.
pub fn open_input(path: &Path) -> Result<Box<dyn ControllerInput>, InputError> {
    if path == Path::new(STDIN_SCRIPT) {
        debug!("Reading controller script from stdin");
        return Ok(Box::new(ScriptInput::new(BufReader::new(io::stdin()))));
    }
    let file = File::open(path)?;
    debug!("Opened controller device {}", path.display());
    Ok(Box::new(EvdevInput::new(file)))
}

/// Read `input` on its own thread until it ends, fails, or the receiver
/// is dropped.
///
/// Malformed input is forwarded and reading carries on; the input still
/// holds whatever follows the bad record.
pub fn spawn_reader<I>(mut input: I) -> io::Result<mpsc::Receiver<InputMessage>>
where
    I: ControllerInput + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    thread::Builder::new()
        .name("controller-input".to_string())
        .spawn(move || loop {
            let message = input.next_event();
            let last = matches!(message, Ok(None) | Err(InputError::Io(_)));
            if tx.blocking_send(message).is_err() || last {
                break;
            }
        })?;
    Ok(rx)
}

/// What became of the link after one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Continue,
    /// Input ended normally
    Closed,
    Fault(String),
}

pub struct ControllerSupervisor {
    session: SharedSession,
    adapter: ControlAdapter,
    path: PathBuf,
    monitor: LinkMonitor,
}

impl ControllerSupervisor {
    pub fn new(session: SharedSession, sources: Arc<SourceRegistry>, path: PathBuf) -> Self {
        ControllerSupervisor {
            session,
            adapter: ControlAdapter::new(sources),
            path,
            monitor: LinkMonitor::new(),
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.monitor.state()
    }

    fn is_script(&self) -> bool {
        self.path == Path::new(STDIN_SCRIPT)
    }

    /// Copy the link state into the session.
    fn publish(&self) {
        let state = self.monitor.state();
        let fault = self.monitor.last_fault().map(str::to_string);
        self.session.with(|s| s.set_controller_status(state, fault));
    }

    /// Sort one message from the reader thread. Events come back with the
    /// link state to clear a previous fault with, if any.
    fn receive(
        &mut self,
        message: InputMessage,
    ) -> Result<(ControllerEvent, Option<LinkState>), LinkOutcome> {
        match message {
            Ok(Some(event)) => {
                let was_faulted = self.monitor.last_fault().is_some();
                self.monitor.event();
                Ok((event, was_faulted.then(|| self.monitor.state())))
            }
            Ok(None) if self.is_script() => Err(LinkOutcome::Closed),
            Ok(None) => Err(LinkOutcome::Fault("device closed".to_string())),
            Err(InputError::Malformed(line)) => {
                warn!("Skipping malformed controller input: {}", line);
                Err(LinkOutcome::Continue)
            }
            Err(e) => Err(LinkOutcome::Fault(e.to_string())),
        }
    }

    /// Handle one message from the reader thread on the calling thread.
    ///
    /// Events that the session rejects (an out-of-range shuttle value) are
    /// logged and dropped; they do not take the link down.
    pub fn handle(&mut self, message: InputMessage) -> LinkOutcome {
        match self.receive(message) {
            Ok((event, recovered)) => {
                apply_event(&self.session, &self.adapter, event, recovered);
                LinkOutcome::Continue
            }
            Err(outcome) => outcome,
        }
    }

    /// [`handle`](Self::handle), with source reads and the session lock
    /// moved onto the blocking pool.
    pub async fn handle_blocking(&mut self, message: InputMessage) -> LinkOutcome {
        let (event, recovered) = match self.receive(message) {
            Ok(received) => received,
            Err(outcome) => return outcome,
        };
        let session = self.session.clone();
        let adapter = self.adapter.clone();
        let applied =
            tokio::task::spawn_blocking(move || apply_event(&session, &adapter, event, recovered));
        match applied.await {
            Ok(()) => LinkOutcome::Continue,
            Err(e) => LinkOutcome::Fault(format!("event {:?} failed: {}", event, e)),
        }
    }

    fn fault(&mut self, reason: String) {
        error!("Controller {}: {}", self.path.display(), reason);
        self.monitor.fault(reason);
        self.publish();
    }

    /// Sleep out the backoff. `false` if shutdown was requested meanwhile.
    async fn wait_backoff(&mut self, subsys: &SubsystemHandle) -> bool {
        let delay = Duration::from_millis(self.monitor.backoff_ms());
        info!(
            "Reopening controller in {:?} (attempt {})",
            delay,
            self.monitor.failure_count() + 1
        );
        tokio::select! {
            _ = subsys.on_shutdown_requested() => false,
            _ = tokio::time::sleep(delay) => {
                self.monitor.retry();
                self.publish();
                true
            }
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> anyhow::Result<()> {
        info!("Controller input from {}", self.path.display());

        loop {
            self.monitor.open();
            self.publish();

            let opened = open_input(&self.path)
                .and_then(|input| spawn_reader(input).map_err(InputError::from));
            let mut rx = match opened {
                Ok(rx) => rx,
                Err(e) => {
                    self.fault(e.to_string());
                    if self.wait_backoff(&subsys).await {
                        continue;
                    }
                    break;
                }
            };
            self.monitor.opened();
            self.publish();
            info!("Controller link active");

            let outcome = loop {
                tokio::select! {
                    _ = subsys.on_shutdown_requested() => {
                        self.monitor.shutdown();
                        self.publish();
                        info!("Controller: shutdown requested");
                        return Ok(());
                    }
                    message = rx.recv() => {
                        let message = message.unwrap_or_else(|| {
                            Err(InputError::Io("reader thread stopped".to_string()))
                        });
                        match self.handle_blocking(message).await {
                            LinkOutcome::Continue => {}
                            other => break other,
                        }
                    }
                }
            };

            match outcome {
                LinkOutcome::Closed => {
                    info!(
                        "Controller script ended after {} events",
                        self.monitor.events_seen()
                    );
                    self.monitor.closed();
                    self.publish();
                    return Ok(());
                }
                LinkOutcome::Fault(reason) => {
                    self.fault(reason);
                    if !self.wait_backoff(&subsys).await {
                        break;
                    }
                }
                LinkOutcome::Continue => {}
            }
        }

        self.monitor.shutdown();
        self.publish();
        Ok(())
    }
}

/// Read sources for `event`, then apply it under the session lock.
fn apply_event(
    session: &SharedSession,
    adapter: &ControlAdapter,
    event: ControllerEvent,
    recovered: Option<LinkState>,
) {
    let prepared = adapter.prepare(event);
    let result = session.with(|s| {
        if let Some(state) = recovered {
            s.set_controller_status(state, None);
        }
        adapter.apply_prepared(prepared, s)
    });
    if let Err(e) = result {
        warn!("Controller event {:?} rejected: {}", event, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_core::{MemorySource, Rational, Source};
    use std::io::Cursor;

    fn create_test_supervisor(path: &str) -> (ControllerSupervisor, SharedSession) {
        let sources: Vec<Arc<dyn Source>> = vec![
            Arc::new(MemorySource::new("cam-a", 0, 100)),
            Arc::new(MemorySource::new("cam-b", 0, 100)),
        ];
        let session = SharedSession::default();
        let supervisor = ControllerSupervisor::new(
            session.clone(),
            Arc::new(SourceRegistry::new(sources)),
            PathBuf::from(path),
        );
        (supervisor, session)
    }

    fn script(text: &str) -> ScriptInput<Cursor<Vec<u8>>> {
        ScriptInput::new(Cursor::new(text.as_bytes().to_vec()))
    }

    /// Feed every message from `input` through the supervisor.
    fn pump(supervisor: &mut ControllerSupervisor, mut input: impl ControllerInput) -> LinkOutcome {
        loop {
            match supervisor.handle(input.next_event()) {
                LinkOutcome::Continue => {}
                other => return other,
            }
        }
    }

    #[test]
    fn test_script_drives_session() {
        let (mut supervisor, session) = create_test_supervisor(STDIN_SCRIPT);
        let outcome = pump(
            &mut supervisor,
            script("button 269\nbutton 269\nbutton 256\nshuttle -2\n"),
        );
        assert_eq!(outcome, LinkOutcome::Closed);

        let session = session.lock();
        assert_eq!(session.events().len(), 2);
        assert_eq!(session.event_pointer(), Some(0));
        assert_eq!(session.program_speed(), Rational::new(3, 8));
    }

    #[test]
    fn test_rejected_event_keeps_link() {
        let (mut supervisor, session) = create_test_supervisor(STDIN_SCRIPT);
        assert_eq!(
            supervisor.handle(Ok(Some(ControllerEvent::Shuttle(9)))),
            LinkOutcome::Continue
        );
        assert_eq!(session.lock().program_speed(), Rational::default());
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let (mut supervisor, session) = create_test_supervisor(STDIN_SCRIPT);
        supervisor.monitor.open();
        supervisor.monitor.opened();
        let outcome = pump(&mut supervisor, script("button 269\nwiggle 3\nbutton 269\n"));
        assert_eq!(outcome, LinkOutcome::Closed);
        assert_eq!(supervisor.monitor.events_seen(), 2);
        assert_eq!(session.lock().events().len(), 2);
        assert_eq!(session.lock().controller_fault(), None);
    }

    #[test]
    fn test_read_error_is_fault() {
        let (mut supervisor, _session) = create_test_supervisor(STDIN_SCRIPT);
        assert_eq!(
            supervisor.handle(Err(InputError::Io("broken pipe".to_string()))),
            LinkOutcome::Fault("Controller I/O failed: broken pipe".to_string())
        );
    }

    #[test]
    fn test_device_eof_is_fault() {
        let (mut supervisor, _session) = create_test_supervisor("/dev/input/event9");
        assert_eq!(
            supervisor.handle(Ok(None)),
            LinkOutcome::Fault("device closed".to_string())
        );
    }

    #[test]
    fn test_fault_is_published_and_cleared() {
        let (mut supervisor, session) = create_test_supervisor(STDIN_SCRIPT);
        supervisor.monitor.open();
        supervisor.fault("unplugged".to_string());
        assert_eq!(session.lock().controller_fault(), Some("unplugged"));
        assert_eq!(supervisor.link_state(), LinkState::Error);

        supervisor.monitor.retry();
        supervisor.monitor.open();
        supervisor.monitor.opened();
        supervisor.handle(Ok(Some(ControllerEvent::Jog(1))));
        assert_eq!(session.lock().controller_fault(), None);
    }

    #[test]
    fn test_open_missing_device() {
        assert!(matches!(
            open_input(Path::new("/nonexistent/input/event0")),
            Err(InputError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_reader_thread_forwards_until_end() {
        let mut rx = spawn_reader(script("jog 2\nbutton 260\n")).unwrap();
        assert_eq!(rx.recv().await, Some(Ok(Some(ControllerEvent::Jog(2)))));
        assert_eq!(rx.recv().await, Some(Ok(Some(ControllerEvent::ButtonDown(260)))));
        assert_eq!(rx.recv().await, Some(Ok(None)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_reader_thread_skips_malformed_line() {
        let mut rx = spawn_reader(script("button 260\nwiggle\nbutton 261\n")).unwrap();
        assert_eq!(rx.recv().await, Some(Ok(Some(ControllerEvent::ButtonDown(260)))));
        assert_eq!(rx.recv().await, Some(Err(InputError::Malformed("wiggle".to_string()))));
        assert_eq!(rx.recv().await, Some(Ok(Some(ControllerEvent::ButtonDown(261)))));
        assert_eq!(rx.recv().await, Some(Ok(None)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_blocking_handler_applies_events() {
        let (mut supervisor, session) = create_test_supervisor(STDIN_SCRIPT);
        supervisor.monitor.open();
        supervisor.monitor.opened();
        let mut rx = spawn_reader(script("button 269\nbutton 261\njog -2\n")).unwrap();
        let outcome = loop {
            let message = rx.recv().await.unwrap();
            match supervisor.handle_blocking(message).await {
                LinkOutcome::Continue => {}
                other => break other,
            }
        };
        assert_eq!(outcome, LinkOutcome::Closed);
        assert_eq!(supervisor.monitor.events_seen(), 3);

        let session = session.lock();
        assert_eq!(session.events().len(), 1);
        assert_eq!(session.current_preview_source(), 1);
        assert_eq!(session.preview_shot(), Some(replay_core::Shot::new(1, 100, 0)));
        assert_eq!(session.preview_at_cursor(), Some(replay_core::Shot::new(1, 90, 0)));
    }
}
