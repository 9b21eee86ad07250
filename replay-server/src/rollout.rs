//! Rollout of prepared clips through an external transcoder.
//!
//! Clips are dropped into the rollout directory ahead of the show. A rollout
//! request names one of them; the transcoder decodes it to raw UYVY video
//! and s16le audio, written to the playout process's two input pipes, while
//! live encode is suspended. The transcoder's stderr carries only its own
//! diagnostics, which are copied to the log.
//!
//! Requested filenames are never trusted: they must resolve to a regular
//! file directly inside the rollout directory with a known extension, and
//! the transcoder is started with an argument vector, never a shell line.
//!
//! One rollout runs at a time. [`RolloutManager::claim`] hands out a
//! [`RolloutSlot`] that is released when the transcoder exits.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// Extensions accepted for rollout, compared case-insensitively
pub const ROLLOUT_EXTENSIONS: &[&str] = &["mov", "mpg"];

/// Raw video pipe inside the playout directory
pub const PLAYOUT_VIDEO: &str = "video.fifo";

/// Raw audio pipe inside the playout directory
pub const PLAYOUT_AUDIO: &str = "audio.fifo";

#[derive(Error, Debug)]
pub enum RolloutError {
    #[error("Invalid rollout file '{0}'")]
    InvalidFilename(String),

    #[error("Rollout file '{0}' not found")]
    NotFound(String),

    #[error("Rollout of {0} still running")]
    Busy(String),

    #[error("Playout input {0} is not available")]
    NoPlayout(String),

    #[error("Cannot start transcoder {0}: {1}")]
    Spawn(String, #[source] io::Error),

    #[error("Rollout directory I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Where the transcoder writes its two streams.
///
/// Both are created by the playout process (normally as FIFOs) before a
/// rollout is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayoutOutputs {
    pub video: PathBuf,
    pub audio: PathBuf,
}

impl PlayoutOutputs {
    pub fn in_dir(dir: &Path) -> Self {
        PlayoutOutputs {
            video: dir.join(PLAYOUT_VIDEO),
            audio: dir.join(PLAYOUT_AUDIO),
        }
    }
}

type ActiveRollout = Arc<Mutex<Option<PathBuf>>>;

fn lock_active(active: &ActiveRollout) -> MutexGuard<'_, Option<PathBuf>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive claim on the transcoder, released on drop.
#[derive(Debug)]
pub struct RolloutSlot {
    active: ActiveRollout,
    file: PathBuf,
}

impl RolloutSlot {
    pub fn file(&self) -> &Path {
        &self.file
    }
}

impl Drop for RolloutSlot {
    fn drop(&mut self) {
        *lock_active(&self.active) = None;
        debug!("Rollout slot for {} released", self.file.display());
    }
}

/// A running transcoder and the slot it holds.
#[derive(Debug)]
pub struct Rollout {
    child: Child,
    slot: RolloutSlot,
}

pub struct RolloutManager {
    base_dir: PathBuf,
    ffmpeg: PathBuf,
    outputs: PlayoutOutputs,
    active: ActiveRollout,
}

impl RolloutManager {
    /// Manage `base_dir`, creating it if needed.
    pub fn new(base_dir: &Path, ffmpeg: &Path, outputs: PlayoutOutputs) -> Result<Self, RolloutError> {
        fs::create_dir_all(base_dir)?;
        let base_dir = base_dir.canonicalize()?;
        debug!(
            "Rollout directory: {}, playout to {} and {}",
            base_dir.display(),
            outputs.video.display(),
            outputs.audio.display()
        );
        Ok(RolloutManager {
            base_dir,
            ffmpeg: ffmpeg.to_owned(),
            outputs,
            active: ActiveRollout::default(),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// The clip currently being rolled out.
    pub fn active(&self) -> Option<PathBuf> {
        lock_active(&self.active).clone()
    }

    /// Rollout candidates as absolute paths, sorted by name.
    pub fn list_files(&self) -> Result<Vec<PathBuf>, RolloutError> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.base_dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && has_rollout_extension(path))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Resolve a requested filename to a file that may be rolled out.
    ///
    /// Accepts a bare name or an absolute path as listed by
    /// [`list_files`](Self::list_files).
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, RolloutError> {
        if filename.is_empty() || filename.contains('\0') {
            return Err(RolloutError::InvalidFilename(filename.to_string()));
        }
        let requested = self.base_dir.join(filename);
        let canonical = match requested.canonicalize() {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RolloutError::NotFound(filename.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if canonical.parent() != Some(self.base_dir.as_path())
            || !canonical.is_file()
            || !has_rollout_extension(&canonical)
        {
            warn!("Rejected rollout of '{}' ({})", filename, canonical.display());
            return Err(RolloutError::InvalidFilename(filename.to_string()));
        }
        Ok(canonical)
    }

    /// Reserve the transcoder for `file`.
    ///
    /// Fails with [`RolloutError::Busy`] while another rollout runs and with
    /// [`RolloutError::NoPlayout`] when the playout inputs are missing.
    pub fn claim(&self, file: &Path) -> Result<RolloutSlot, RolloutError> {
        let mut active = lock_active(&self.active);
        if let Some(running) = active.as_ref() {
            return Err(RolloutError::Busy(running.display().to_string()));
        }
        for output in [&self.outputs.video, &self.outputs.audio] {
            if !output.exists() {
                return Err(RolloutError::NoPlayout(output.display().to_string()));
            }
        }
        *active = Some(file.to_owned());
        Ok(RolloutSlot {
            active: self.active.clone(),
            file: file.to_owned(),
        })
    }

    /// Transcoder arguments for `file`.
    pub fn transcoder_args(file: &Path, outputs: &PlayoutOutputs) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-nostats", "-loglevel", "error", "-y", "-i"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(file.as_os_str().to_owned());
        args.extend(
            ["-f", "rawvideo", "-s", "1920x1080", "-pix_fmt", "uyvy422"]
                .iter()
                .map(OsString::from),
        );
        args.push(outputs.video.as_os_str().to_owned());
        args.extend(
            ["-f", "s16le", "-ac", "2", "-ar", "48000"]
                .iter()
                .map(OsString::from),
        );
        args.push(outputs.audio.as_os_str().to_owned());
        args
    }

    /// Start the transcoder for a claimed slot.
    pub fn spawn(&self, slot: RolloutSlot) -> Result<Rollout, RolloutError> {
        info!("Rolling out {}", slot.file().display());
        let child = Command::new(&self.ffmpeg)
            .args(Self::transcoder_args(&slot.file, &self.outputs))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RolloutError::Spawn(self.ffmpeg.display().to_string(), e))?;
        Ok(Rollout { child, slot })
    }
}

fn has_rollout_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ROLLOUT_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

/// Log the transcoder's diagnostics until it exits, then free its slot.
pub async fn watch_rollout(mut rollout: Rollout) {
    let file = rollout.slot.file.display().to_string();
    if let Some(stderr) = rollout.child.stderr.take() {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            warn!("Transcoder ({}): {}", file, line);
        }
    }
    match rollout.child.wait().await {
        Ok(status) if status.success() => info!("Rollout of {} finished", file),
        Ok(status) => warn!("Rollout of {} exited with {}", file, status),
        Err(e) => error!("Lost track of rollout of {}: {}", file, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_manager(ffmpeg: &str) -> (RolloutManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let outputs = PlayoutOutputs::in_dir(temp_dir.path());
        fs::write(&outputs.video, "").unwrap();
        fs::write(&outputs.audio, "").unwrap();
        let manager = RolloutManager::new(temp_dir.path(), Path::new(ffmpeg), outputs).unwrap();
        (manager, temp_dir)
    }

    fn create_test_manager() -> (RolloutManager, TempDir) {
        let (manager, temp_dir) = create_manager("ffmpeg");
        for name in ["b.mov", "a.MPG", "notes.txt", "c.mpg"] {
            fs::write(temp_dir.path().join(name), "clip").unwrap();
        }
        fs::create_dir(temp_dir.path().join("sub.mov")).unwrap();
        fs::write(temp_dir.path().join("sub.mov").join("inner.mov"), "clip").unwrap();
        (manager, temp_dir)
    }

    #[test]
    fn test_list_files() {
        let (manager, _temp) = create_test_manager();
        let names: Vec<String> = manager
            .list_files()
            .unwrap()
            .iter()
            .map(|p| {
                assert!(p.is_absolute());
                p.file_name().unwrap().to_string_lossy().into_owned()
            })
            .collect();
        assert_eq!(names, vec!["a.MPG", "b.mov", "c.mpg"]);
    }

    #[test]
    fn test_resolve_accepts_listed_files() {
        let (manager, _temp) = create_test_manager();
        let expected = manager.base_dir().join("b.mov");
        assert_eq!(manager.resolve("b.mov").unwrap(), expected);
        assert_eq!(
            manager.resolve(expected.to_str().unwrap()).unwrap(),
            expected
        );
    }

    #[test]
    fn test_resolve_rejects_unsafe_names() {
        let (manager, _temp) = create_test_manager();
        for name in ["notes.txt", "sub.mov", "sub.mov/inner.mov", "", "/etc/passwd"] {
            assert!(
                matches!(
                    manager.resolve(name),
                    Err(RolloutError::InvalidFilename(_)) | Err(RolloutError::NotFound(_))
                ),
                "{:?} should be rejected",
                name
            );
        }
        assert!(matches!(
            manager.resolve("missing.mov"),
            Err(RolloutError::NotFound(_))
        ));
        assert!(matches!(
            manager.resolve("../b.mov"),
            Err(RolloutError::InvalidFilename(_)) | Err(RolloutError::NotFound(_))
        ));
        assert!(matches!(
            manager.resolve("x.mov; rm -rf /"),
            Err(RolloutError::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let (manager, temp) = create_test_manager();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("secret.mov");
        fs::write(&target, "secret").unwrap();
        std::os::unix::fs::symlink(&target, temp.path().join("link.mov")).unwrap();
        assert!(matches!(
            manager.resolve("link.mov"),
            Err(RolloutError::InvalidFilename(_))
        ));
    }

    #[test]
    fn test_transcoder_args() {
        let outputs = PlayoutOutputs::in_dir(Path::new("/run/playout"));
        let args = RolloutManager::transcoder_args(Path::new("/clips/a b.mov"), &outputs);
        let args: Vec<&str> = args.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(
            args,
            vec![
                "-nostats", "-loglevel", "error", "-y", "-i", "/clips/a b.mov", "-f", "rawvideo",
                "-s", "1920x1080", "-pix_fmt", "uyvy422", "/run/playout/video.fifo", "-f",
                "s16le", "-ac", "2", "-ar", "48000", "/run/playout/audio.fifo",
            ]
        );
    }

    #[test]
    fn test_second_claim_is_refused() {
        let (manager, _temp) = create_test_manager();
        let first = manager.resolve("b.mov").unwrap();
        let slot = manager.claim(&first).unwrap();
        assert_eq!(manager.active(), Some(first.clone()));

        let second = manager.resolve("c.mpg").unwrap();
        assert!(matches!(manager.claim(&second), Err(RolloutError::Busy(_))));

        drop(slot);
        assert_eq!(manager.active(), None);
        assert_eq!(manager.claim(&second).unwrap().file(), second.as_path());
    }

    #[test]
    fn test_claim_needs_playout_inputs() {
        let (manager, temp) = create_test_manager();
        fs::remove_file(temp.path().join(PLAYOUT_AUDIO)).unwrap();
        let file = manager.resolve("b.mov").unwrap();
        assert!(matches!(manager.claim(&file), Err(RolloutError::NoPlayout(_))));
        assert_eq!(manager.active(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_and_watch_releases_slot() {
        let (manager, temp) = create_manager("true");
        fs::write(temp.path().join("clip.mov"), "clip").unwrap();
        let file = manager.resolve("clip.mov").unwrap();
        let rollout = manager.spawn(manager.claim(&file).unwrap()).unwrap();
        assert!(matches!(manager.claim(&file), Err(RolloutError::Busy(_))));
        watch_rollout(rollout).await;
        assert_eq!(manager.active(), None);
    }

    #[test]
    fn test_spawn_missing_transcoder() {
        let (manager, _temp) = create_manager("/nonexistent/ffmpeg-binary");
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let slot = manager.claim(Path::new("/tmp/clip.mov")).unwrap();
        assert!(matches!(manager.spawn(slot), Err(RolloutError::Spawn(_, _))));
        assert_eq!(manager.active(), None);
    }
}
