//! Spool-directory source.
//!
//! The capture process writes one set of files per frame into a directory:
//!
//! ```text
//! 00001234.jpg        full-size frame
//! 00001234.thumb.jpg  thumbnail
//! 00001234.pcm        s16le, 2 channels, 48 kHz
//! ```
//!
//! and deletes the oldest ones as the buffer rolls. The directory is
//! rescanned on every position query, so the live and oldest positions
//! always reflect what is on disk.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, trace};
use replay_core::{Source, SourceError, Timecode};

const FRAME_SUFFIX: &str = ".jpg";
const THUMBNAIL_SUFFIX: &str = ".thumb.jpg";
const AUDIO_SUFFIX: &str = ".pcm";

pub struct SpoolSource {
    name: String,
    dir: PathBuf,
}

impl SpoolSource {
    pub fn open(dir: &Path) -> Result<SpoolSource, SourceError> {
        let metadata = fs::metadata(dir)?;
        if !metadata.is_dir() {
            return Err(SourceError::Io(format!("{} is not a directory", dir.display())));
        }
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        debug!("Spool source '{}' at {}", name, dir.display());
        Ok(SpoolSource {
            name,
            dir: dir.to_owned(),
        })
    }

    /// Oldest and newest frame timecodes currently on disk.
    fn scan(&self) -> Result<(Timecode, Timecode), SourceError> {
        let mut window: Option<(Timecode, Timecode)> = None;
        for entry in fs::read_dir(&self.dir)?.flatten() {
            let file_name = entry.file_name();
            let Some(tc) = file_name.to_str().and_then(frame_timecode) else {
                continue;
            };
            window = Some(match window {
                Some((oldest, live)) => (oldest.min(tc), live.max(tc)),
                None => (tc, tc),
            });
        }
        window.ok_or(SourceError::Empty)
    }

    fn path_for(&self, tc: Timecode, suffix: &str) -> PathBuf {
        self.dir.join(format!("{:08}{}", tc, suffix))
    }

    fn read(&self, tc: Timecode, suffix: &str) -> Result<Vec<u8>, SourceError> {
        if tc < 0 {
            return Err(self.out_of_range(tc));
        }
        let path = self.path_for(tc, suffix);
        trace!("Reading {}", path.display());
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(self.out_of_range(tc)),
            Err(e) => Err(e.into()),
        }
    }

    fn out_of_range(&self, tc: Timecode) -> SourceError {
        match self.scan() {
            Ok((oldest, live)) => SourceError::OutOfRange {
                requested: tc,
                oldest,
                live,
            },
            Err(e) => e,
        }
    }
}

/// `00001234.jpg` -> 1234. Thumbnails and audio files are not frames.
fn frame_timecode(file_name: &str) -> Option<Timecode> {
    if file_name.ends_with(THUMBNAIL_SUFFIX) {
        return None;
    }
    let stem = file_name.strip_suffix(FRAME_SUFFIX)?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

impl Source for SpoolSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn live_position(&self) -> Result<Timecode, SourceError> {
        self.scan().map(|(_, live)| live)
    }

    fn oldest_position(&self) -> Result<Timecode, SourceError> {
        self.scan().map(|(oldest, _)| oldest)
    }

    fn preview(&self, tc: Timecode) -> Result<Vec<u8>, SourceError> {
        self.read(tc, FRAME_SUFFIX)
    }

    fn thumbnail(&self, tc: Timecode) -> Result<Vec<u8>, SourceError> {
        self.read(tc, THUMBNAIL_SUFFIX)
    }

    fn frame(&self, tc: Timecode) -> Result<Vec<u8>, SourceError> {
        self.read(tc, FRAME_SUFFIX)
    }

    fn audio(&self, tc: Timecode) -> Result<Vec<u8>, SourceError> {
        self.read(tc, AUDIO_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Spool holding frames `range`, each with thumbnail and audio.
    fn create_test_spool(range: std::ops::RangeInclusive<Timecode>) -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        for tc in range {
            let base = temp_dir.path().join(format!("{:08}", tc));
            fs::write(base.with_extension("jpg"), format!("jpg {}", tc)).unwrap();
            fs::write(base.with_extension("thumb.jpg"), format!("thumb {}", tc)).unwrap();
            fs::write(base.with_extension("pcm"), format!("pcm {}", tc)).unwrap();
        }
        temp_dir
    }

    #[test]
    fn test_frame_timecode() {
        assert_eq!(frame_timecode("00001234.jpg"), Some(1234));
        assert_eq!(frame_timecode("00001234.thumb.jpg"), None);
        assert_eq!(frame_timecode("00001234.pcm"), None);
        assert_eq!(frame_timecode("notes.jpg"), None);
        assert_eq!(frame_timecode(".jpg"), None);
    }

    #[test]
    fn test_positions() {
        let temp = create_test_spool(10..=50);
        let source = SpoolSource::open(temp.path()).unwrap();
        assert_eq!(source.live_position(), Ok(50));
        assert_eq!(source.oldest_position(), Ok(10));

        // New frames show up without reopening
        fs::write(temp.path().join("00000051.jpg"), "jpg 51").unwrap();
        assert_eq!(source.live_position(), Ok(51));
        fs::remove_file(temp.path().join("00000010.jpg")).unwrap();
        assert_eq!(source.oldest_position(), Ok(11));
    }

    #[test]
    fn test_media_files() {
        let temp = create_test_spool(0..=3);
        let source = SpoolSource::open(temp.path()).unwrap();
        assert_eq!(source.frame(2).unwrap(), b"jpg 2".to_vec());
        assert_eq!(source.preview(2).unwrap(), b"jpg 2".to_vec());
        assert_eq!(source.thumbnail(2).unwrap(), b"thumb 2".to_vec());
        assert_eq!(source.audio(3).unwrap(), b"pcm 3".to_vec());
    }

    #[test]
    fn test_missing_frame_is_out_of_range() {
        let temp = create_test_spool(5..=9);
        let source = SpoolSource::open(temp.path()).unwrap();
        assert_eq!(
            source.frame(12),
            Err(SourceError::OutOfRange {
                requested: 12,
                oldest: 5,
                live: 9
            })
        );
        assert!(matches!(source.frame(-1), Err(SourceError::OutOfRange { .. })));
    }

    #[test]
    fn test_empty_spool() {
        let temp = TempDir::new().unwrap();
        let source = SpoolSource::open(temp.path()).unwrap();
        assert_eq!(source.live_position(), Err(SourceError::Empty));
        assert_eq!(source.frame(0), Err(SourceError::Empty));
    }

    #[test]
    fn test_open_rejects_missing_dir() {
        let temp = TempDir::new().unwrap();
        assert!(SpoolSource::open(&temp.path().join("nope")).is_err());
        let file = temp.path().join("file");
        fs::write(&file, "x").unwrap();
        assert!(SpoolSource::open(&file).is_err());
    }
}
