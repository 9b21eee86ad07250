//! Lazy frame and audio sequences for streaming responses.
//!
//! A [`MediaIter`] holds only a source handle and a cursor. Building one does
//! no I/O and touches no session state; every `next()` fetches exactly one
//! frame (or one frame's worth of audio). After the first failed fetch the
//! iterator yields the error once and then ends.

use std::sync::Arc;

use crate::error::SourceError;
use crate::source::{Source, SourceRegistry};
use crate::types::Timecode;

/// Which media a [`MediaIter`] yields
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

pub struct MediaIter {
    source: Arc<dyn Source>,
    kind: MediaKind,
    position: Timecode,
    remaining: u64,
}

impl MediaIter {
    /// `length` frames of source `index` from `start`.
    pub fn new(
        sources: &SourceRegistry,
        index: usize,
        start: Timecode,
        length: u64,
        kind: MediaKind,
    ) -> Result<MediaIter, SourceError> {
        let source = sources.get(index)?.clone();
        Ok(MediaIter {
            source,
            kind,
            position: start,
            remaining: length,
        })
    }

    pub fn video(sources: &SourceRegistry, index: usize, start: Timecode, length: u64) -> Result<MediaIter, SourceError> {
        MediaIter::new(sources, index, start, length, MediaKind::Video)
    }

    pub fn audio(sources: &SourceRegistry, index: usize, start: Timecode, length: u64) -> Result<MediaIter, SourceError> {
        MediaIter::new(sources, index, start, length, MediaKind::Audio)
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Next position to be fetched.
    pub fn position(&self) -> Timecode {
        self.position
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Iterator for MediaIter {
    type Item = Result<Vec<u8>, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let fetched = match self.kind {
            MediaKind::Video => self.source.frame(self.position),
            MediaKind::Audio => self.source.audio(self.position),
        };
        match &fetched {
            Ok(_) => {
                self.position += 1;
                self.remaining -= 1;
            }
            Err(_) => self.remaining = 0,
        }
        Some(fetched)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        // A fetch may fail and end the sequence early
        (0, usize::try_from(self.remaining).ok())
    }
}

impl std::iter::FusedIterator for MediaIter {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn registry() -> (Arc<MemorySource>, SourceRegistry) {
        let cam = Arc::new(MemorySource::new("cam0", 0, 100));
        (cam.clone(), SourceRegistry::new(vec![cam as Arc<dyn Source>]))
    }

    #[test]
    fn test_yields_each_frame() {
        let (_cam, sources) = registry();
        let frames: Vec<Vec<u8>> = MediaIter::video(&sources, 0, 10, 3)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            frames,
            vec![
                b"cam0:frame:10".to_vec(),
                b"cam0:frame:11".to_vec(),
                b"cam0:frame:12".to_vec(),
            ]
        );
    }

    #[test]
    fn test_audio() {
        let (_cam, sources) = registry();
        let mut iter = MediaIter::audio(&sources, 0, 5, 1).unwrap();
        assert_eq!(iter.next(), Some(Ok(b"cam0:audio:5".to_vec())));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_construction_does_no_io() {
        let (cam, sources) = registry();
        cam.set_offline(true);
        let mut iter = MediaIter::video(&sources, 0, 0, 2).unwrap();
        assert_eq!(iter.remaining(), 2);
        assert!(matches!(iter.next(), Some(Err(SourceError::Io(_)))));
    }

    #[test]
    fn test_failure_ends_sequence() {
        let (cam, sources) = registry();
        cam.fail_from(12);
        let mut iter = MediaIter::video(&sources, 0, 10, 5).unwrap();
        assert!(iter.next().unwrap().is_ok());
        assert!(iter.next().unwrap().is_ok());
        assert!(iter.next().unwrap().is_err());
        assert_eq!(iter.next(), None);
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_zero_length_and_unknown_source() {
        let (_cam, sources) = registry();
        assert_eq!(MediaIter::video(&sources, 0, 10, 0).unwrap().count(), 0);
        assert!(matches!(
            MediaIter::video(&sources, 3, 0, 1),
            Err(SourceError::UnknownSource(3))
        ));
    }
}
