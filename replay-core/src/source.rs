//! Video/audio sources and the registry that indexes them.
//!
//! A source is a continuously-recording buffer of frames addressed by
//! [`Timecode`]. The registry is built once at startup and is read-only
//! afterwards, so it can be shared between the session, the HTTP handlers
//! and the playout clock without locking.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use log::warn;

use crate::error::SourceError;
use crate::shot::Shot;
use crate::types::Timecode;

/// A recording buffer that can hand out media for any retained position.
///
/// Implementations are free to block: callers on an async runtime move the
/// calls onto a blocking thread.
pub trait Source: Send + Sync {
    /// Human-readable label for logs and `/session.json`
    fn name(&self) -> &str;

    /// Most recent recorded position
    fn live_position(&self) -> Result<Timecode, SourceError>;

    /// Oldest position still retained
    fn oldest_position(&self) -> Result<Timecode, SourceError>;

    /// Full-size still image (JPEG) at `tc`
    fn preview(&self, tc: Timecode) -> Result<Vec<u8>, SourceError>;

    /// Reduced-size still image (JPEG) at `tc`
    fn thumbnail(&self, tc: Timecode) -> Result<Vec<u8>, SourceError>;

    /// Encoded video frame at `tc`
    fn frame(&self, tc: Timecode) -> Result<Vec<u8>, SourceError>;

    /// Audio samples that accompany the frame at `tc`
    fn audio(&self, tc: Timecode) -> Result<Vec<u8>, SourceError>;
}

/// Ordered, fixed set of sources. Index `i` is the source's identity.
#[derive(Clone)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn Source>>,
    shot_length: i64,
}

impl SourceRegistry {
    pub fn new(sources: Vec<Arc<dyn Source>>) -> Self {
        SourceRegistry {
            sources,
            shot_length: 0,
        }
    }

    /// Length given to shots taken with [`make_shot_now`](Self::make_shot_now)
    /// and [`make_shot_at`](Self::make_shot_at). 0 is open-ended.
    pub fn with_shot_length(mut self, shot_length: i64) -> Self {
        self.shot_length = shot_length.max(0);
        self
    }

    pub fn shot_length(&self) -> i64 {
        self.shot_length
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Arc<dyn Source>, SourceError> {
        self.sources
            .get(index)
            .ok_or(SourceError::UnknownSource(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Source>> {
        self.sources.iter()
    }

    /// A shot starting at source `index`'s live position.
    pub fn make_shot_now(&self, index: usize) -> Result<Shot, SourceError> {
        let live = self.get(index)?.live_position()?;
        Ok(Shot::new(index, live, self.shot_length))
    }

    /// A shot at the live position of every source, in index order.
    ///
    /// A source that cannot produce a shot leaves its slot empty. This asks
    /// each source for its live position, so call it before taking the
    /// session lock and hand the result to
    /// [`ReplaySession::record_event`](crate::ReplaySession::record_event).
    pub fn capture_shots(&self) -> Vec<Option<Shot>> {
        (0..self.sources.len())
            .map(|i| match self.make_shot_now(i) {
                Ok(shot) => Some(shot),
                Err(e) => {
                    warn!("Source {} missing from capture: {}", i, e);
                    None
                }
            })
            .collect()
    }

    /// A shot starting at `tc` on source `index`.
    ///
    /// Fails with [`SourceError::OutOfRange`] when `tc` is negative or later
    /// than the live position. Positions older than the retained window are
    /// accepted here and fail when fetched.
    pub fn make_shot_at(&self, index: usize, tc: Timecode) -> Result<Shot, SourceError> {
        let source = self.get(index)?;
        let live = source.live_position()?;
        if tc < 0 || tc > live {
            return Err(SourceError::OutOfRange {
                requested: tc,
                oldest: source.oldest_position().unwrap_or(0),
                live,
            });
        }
        Ok(Shot::new(index, tc, self.shot_length))
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field(
                "sources",
                &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("shot_length", &self.shot_length)
            .finish()
    }
}

/// In-memory source with synthetic media, for tests and dry runs.
///
/// Media payloads are `"<name>:<kind>:<tc>"` as bytes, so tests can tell
/// exactly which position was fetched.
#[derive(Debug)]
pub struct MemorySource {
    name: String,
    oldest: AtomicI64,
    live: AtomicI64,
    offline: AtomicBool,
    fail_from: AtomicI64,
    fetches: AtomicU64,
}

impl MemorySource {
    pub fn new(name: &str, oldest: Timecode, live: Timecode) -> Self {
        MemorySource {
            name: name.to_string(),
            oldest: AtomicI64::new(oldest),
            live: AtomicI64::new(live),
            offline: AtomicBool::new(false),
            fail_from: AtomicI64::new(i64::MAX),
            fetches: AtomicU64::new(0),
        }
    }

    /// Media fetches attempted so far, failed ones included.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Record `frames` more frames.
    pub fn advance(&self, frames: i64) {
        self.live.fetch_add(frames, Ordering::SeqCst);
    }

    /// Drop everything before `tc` from the buffer.
    pub fn expire_before(&self, tc: Timecode) {
        self.oldest.store(tc, Ordering::SeqCst);
    }

    /// Make every call fail as if the hardware had gone away.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make media fetches at or after `tc` fail.
    pub fn fail_from(&self, tc: Timecode) {
        self.fail_from.store(tc, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), SourceError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SourceError::Io(format!("{} is offline", self.name)));
        }
        Ok(())
    }

    fn fetch(&self, kind: &str, tc: Timecode) -> Result<Vec<u8>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let oldest = self.oldest.load(Ordering::SeqCst);
        let live = self.live.load(Ordering::SeqCst);
        if tc < oldest || tc > live {
            return Err(SourceError::OutOfRange {
                requested: tc,
                oldest,
                live,
            });
        }
        if tc >= self.fail_from.load(Ordering::SeqCst) {
            return Err(SourceError::Io(format!("{} read failed at {}", self.name, tc)));
        }
        Ok(format!("{}:{}:{}", self.name, kind, tc).into_bytes())
    }
}

impl Source for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn live_position(&self) -> Result<Timecode, SourceError> {
        self.check_online()?;
        Ok(self.live.load(Ordering::SeqCst))
    }

    fn oldest_position(&self) -> Result<Timecode, SourceError> {
        self.check_online()?;
        Ok(self.oldest.load(Ordering::SeqCst))
    }

    fn preview(&self, tc: Timecode) -> Result<Vec<u8>, SourceError> {
        self.fetch("preview", tc)
    }

    fn thumbnail(&self, tc: Timecode) -> Result<Vec<u8>, SourceError> {
        self.fetch("thumbnail", tc)
    }

    fn frame(&self, tc: Timecode) -> Result<Vec<u8>, SourceError> {
        self.fetch("frame", tc)
    }

    fn audio(&self, tc: Timecode) -> Result<Vec<u8>, SourceError> {
        self.fetch("audio", tc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (Arc<MemorySource>, SourceRegistry) {
        let cam = Arc::new(MemorySource::new("cam0", 10, 100));
        let registry = SourceRegistry::new(vec![cam.clone() as Arc<dyn Source>]).with_shot_length(90);
        (cam, registry)
    }

    #[test]
    fn test_make_shot_now() {
        let (cam, sources) = registry();
        assert_eq!(sources.make_shot_now(0), Ok(Shot::new(0, 100, 90)));
        cam.advance(5);
        assert_eq!(sources.make_shot_now(0), Ok(Shot::new(0, 105, 90)));
        assert_eq!(sources.make_shot_now(1), Err(SourceError::UnknownSource(1)));
    }

    #[test]
    fn test_make_shot_at_range() {
        let (_cam, sources) = registry();
        assert_eq!(sources.make_shot_at(0, 100), Ok(Shot::new(0, 100, 90)));
        assert_eq!(sources.make_shot_at(0, 0), Ok(Shot::new(0, 0, 90)));
        assert_eq!(
            sources.make_shot_at(0, 101),
            Err(SourceError::OutOfRange {
                requested: 101,
                oldest: 10,
                live: 100
            })
        );
        assert!(sources.make_shot_at(0, -1).is_err());
    }

    #[test]
    fn test_offline_source() {
        let (cam, sources) = registry();
        cam.set_offline(true);
        assert!(matches!(sources.make_shot_now(0), Err(SourceError::Io(_))));
        cam.set_offline(false);
        assert!(sources.make_shot_now(0).is_ok());
    }

    #[test]
    fn test_memory_source_payloads() {
        let (cam, _sources) = registry();
        assert_eq!(cam.frame(42).unwrap(), b"cam0:frame:42".to_vec());
        assert_eq!(cam.audio(42).unwrap(), b"cam0:audio:42".to_vec());
        assert!(cam.frame(9).is_err());
        cam.fail_from(50);
        assert!(cam.frame(49).is_ok());
        assert!(matches!(cam.frame(50), Err(SourceError::Io(_))));
    }

    #[test]
    fn test_negative_shot_length_clamped() {
        let sources = SourceRegistry::new(Vec::new()).with_shot_length(-4);
        assert_eq!(sources.shot_length(), 0);
        assert!(sources.is_empty());
    }
}
