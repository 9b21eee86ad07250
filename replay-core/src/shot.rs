//! Shot references and their wire codec.
//!
//! A [`Shot`] names a range of frames on one source by index. It owns no
//! media: preview images, frames and audio are fetched from the
//! [`SourceRegistry`] only when asked for, so a shot may refer to frames
//! that have since dropped out of the source's buffer. That is detected at
//! materialisation time, never at construction.
//!
//! Wire format: `{"source": 0, "start": 1234, "length": 90}`.

use serde::{Deserialize, Serialize};

use crate::error::{ShotError, SourceError};
use crate::source::SourceRegistry;
use crate::types::Timecode;

/// Addressable reference to `length` frames of source `source` from `start`.
///
/// A length of 0 means open-ended: the shot plays until stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shot {
    pub source: usize,
    pub start: Timecode,
    pub length: i64,
}

impl Shot {
    pub fn new(source: usize, start: Timecode, length: i64) -> Self {
        Shot {
            source,
            start,
            length,
        }
    }

    pub fn is_open_ended(&self) -> bool {
        self.length == 0
    }

    /// The same shot with its in-point moved by `offset` frames.
    ///
    /// The start never goes below 0. A finite shot keeps its out-point, so
    /// its length changes by the opposite amount (and never below 1).
    pub fn at_offset(&self, offset: i64) -> Shot {
        let start = self.start.saturating_add(offset).max(0);
        let moved = start.saturating_sub(self.start);
        let length = if self.is_open_ended() {
            0
        } else {
            self.length.saturating_sub(moved).max(1)
        };
        Shot::new(self.source, start, length)
    }

    /// Still image at the shot's in-point.
    pub fn preview(&self, sources: &SourceRegistry) -> Result<Vec<u8>, SourceError> {
        sources.get(self.source)?.preview(self.start)
    }

    /// Reduced-size still at the shot's in-point.
    pub fn thumbnail(&self, sources: &SourceRegistry) -> Result<Vec<u8>, SourceError> {
        sources.get(self.source)?.thumbnail(self.start)
    }

    /// Encoded frame `i` of the shot, `i` in `[0, length)`.
    pub fn frame(&self, sources: &SourceRegistry, i: i64) -> Result<Vec<u8>, SourceError> {
        let tc = self.position_of(i)?;
        sources.get(self.source)?.frame(tc)
    }

    /// Audio samples accompanying frame `i` of the shot.
    pub fn audio(&self, sources: &SourceRegistry, i: i64) -> Result<Vec<u8>, SourceError> {
        let tc = self.position_of(i)?;
        sources.get(self.source)?.audio(tc)
    }

    fn position_of(&self, i: i64) -> Result<Timecode, SourceError> {
        if i < 0 || (!self.is_open_ended() && i >= self.length) {
            return Err(SourceError::OutOfRange {
                requested: self.start.saturating_add(i),
                oldest: self.start,
                live: self.start.saturating_add(self.length.max(1) - 1),
            });
        }
        Ok(self.start.saturating_add(i))
    }

    /// Check this reference against the registry it will be resolved in.
    pub fn validate(self, sources: &SourceRegistry) -> Result<Shot, ShotError> {
        if self.source >= sources.len() {
            return Err(ShotError::UnknownSource {
                index: self.source,
                count: sources.len(),
            });
        }
        if self.start < 0 {
            return Err(ShotError::InvalidStart(self.start));
        }
        if self.length < 0 {
            return Err(ShotError::InvalidLength(self.length));
        }
        Ok(self)
    }

    /// Decode a single shot reference from a JSON body.
    pub fn from_json(body: &str, sources: &SourceRegistry) -> Result<Shot, ShotError> {
        let shot: Shot = serde_json::from_str(body)?;
        shot.validate(sources)
    }

    /// Decode a JSON array of shot references. Any invalid entry rejects the list.
    pub fn list_from_json(body: &str, sources: &SourceRegistry) -> Result<Vec<Shot>, ShotError> {
        let shots: Vec<Shot> = serde_json::from_str(body)?;
        shots.into_iter().map(|s| s.validate(sources)).collect()
    }

    pub fn to_json(&self) -> String {
        // A struct of three integers always serialises
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, Source};
    use std::sync::Arc;

    fn registry(count: usize) -> SourceRegistry {
        SourceRegistry::new(
            (0..count)
                .map(|i| Arc::new(MemorySource::new(&format!("cam{}", i), 0, 100)) as Arc<dyn Source>)
                .collect(),
        )
    }

    #[test]
    fn test_round_trip() {
        let sources = registry(2);
        for shot in [Shot::new(0, 0, 0), Shot::new(1, 4242, 90), Shot::new(1, 7, 1)] {
            let encoded = shot.to_json();
            let decoded = Shot::from_json(&encoded, &sources).unwrap();
            assert_eq!(decoded, shot);
            assert_eq!(decoded.to_json(), encoded);
        }
    }

    #[test]
    fn test_wire_field_names() {
        let json: serde_json::Value =
            serde_json::from_str(&Shot::new(3, 120, 30).to_json()).unwrap();
        assert_eq!(json["source"], 3);
        assert_eq!(json["start"], 120);
        assert_eq!(json["length"], 30);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        let sources = registry(2);
        assert!(matches!(
            Shot::from_json("not json", &sources),
            Err(ShotError::Malformed(_))
        ));
        assert!(matches!(
            Shot::from_json(r#"{"source": 0, "start": 5}"#, &sources),
            Err(ShotError::Malformed(_))
        ));
        assert_eq!(
            Shot::from_json(r#"{"source": 2, "start": 5, "length": 1}"#, &sources),
            Err(ShotError::UnknownSource { index: 2, count: 2 })
        );
        assert_eq!(
            Shot::from_json(r#"{"source": 0, "start": -5, "length": 1}"#, &sources),
            Err(ShotError::InvalidStart(-5))
        );
        assert_eq!(
            Shot::from_json(r#"{"source": 0, "start": 5, "length": -1}"#, &sources),
            Err(ShotError::InvalidLength(-1))
        );
    }

    #[test]
    fn test_list_decode() {
        let sources = registry(2);
        let shots = Shot::list_from_json(
            r#"[{"source":0,"start":1,"length":2},{"source":1,"start":3,"length":4}]"#,
            &sources,
        )
        .unwrap();
        assert_eq!(shots, vec![Shot::new(0, 1, 2), Shot::new(1, 3, 4)]);
        assert!(Shot::list_from_json("[]", &sources).unwrap().is_empty());
        assert!(Shot::list_from_json(r#"[{"source":9,"start":1,"length":2}]"#, &sources).is_err());
    }

    #[test]
    fn test_at_offset() {
        let shot = Shot::new(0, 100, 50);
        assert_eq!(shot.at_offset(-20), Shot::new(0, 80, 70));
        assert_eq!(shot.at_offset(10), Shot::new(0, 110, 40));
        assert_eq!(shot.at_offset(-500), Shot::new(0, 0, 150));
        assert_eq!(shot.at_offset(80), Shot::new(0, 180, 1));
        assert_eq!(Shot::new(1, 10, 0).at_offset(-5), Shot::new(1, 5, 0));
    }

    #[test]
    fn test_at_offset_extreme_lengths() {
        let sources = registry(1);
        let shot = Shot::from_json(
            r#"{"source": 0, "start": 50, "length": 9223372036854775807}"#,
            &sources,
        )
        .unwrap();
        assert_eq!(shot.at_offset(-1), Shot::new(0, 49, i64::MAX));
        assert_eq!(shot.at_offset(i64::MAX), Shot::new(0, i64::MAX, 50));
        assert_eq!(
            Shot::new(0, i64::MAX, 5).at_offset(i64::MIN),
            Shot::new(0, 0, i64::MAX)
        );
        assert!(matches!(
            shot.frame(&sources, i64::MAX),
            Err(SourceError::OutOfRange { live: i64::MAX, .. })
        ));
    }

    #[test]
    fn test_frame_bounds() {
        let sources = registry(1);
        let shot = Shot::new(0, 10, 3);
        assert!(shot.frame(&sources, 0).is_ok());
        assert!(shot.frame(&sources, 2).is_ok());
        assert!(shot.frame(&sources, 3).is_err());
        assert!(shot.frame(&sources, -1).is_err());
        // Open-ended shots accept any non-negative index
        assert!(Shot::new(0, 10, 0).frame(&sources, 50).is_ok());
    }

    #[test]
    fn test_materialisation_checks_validity_late() {
        let sources = registry(1);
        // Constructing a shot past the live position is fine...
        let shot = Shot::new(0, 500, 1);
        // ...fetching it is not
        assert!(matches!(
            shot.preview(&sources),
            Err(SourceError::OutOfRange { requested: 500, .. })
        ));
    }
}
