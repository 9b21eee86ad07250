//! Captured events: one shot per source taken at the same instant.

use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;

use crate::shot::Shot;

/// Category given to a freshly captured event
pub const DEFAULT_EVENT_TYPE: &str = "Uncategorized";

/// A moment of interest, with the shot each source had at capture time.
///
/// `shots[i]` belongs to source `i`; a slot is `None` when that source could
/// not produce a shot when the event was captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: u64,
    pub event_type: String,
    pub shots: Vec<Option<Shot>>,
}

impl Event {
    pub fn new(id: u64, shots: Vec<Option<Shot>>) -> Self {
        Event {
            id,
            event_type: DEFAULT_EVENT_TYPE.to_string(),
            shots,
        }
    }

    pub fn shot(&self, source: usize) -> Option<&Shot> {
        self.shots.get(source).and_then(|s| s.as_ref())
    }

    /// Shots that were actually captured, in source order.
    pub fn present_shots(&self) -> impl Iterator<Item = &Shot> {
        self.shots.iter().flatten()
    }
}

/// `{"id": 3, "type": "Goal", "shots": [{"source":0,"start":..,"length":..}, ..]}`
///
/// Missing slots are left out; each shot carries its own `source`.
impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let shots: Vec<&Shot> = self.present_shots().collect();
        let mut state = serializer.serialize_struct("Event", 3)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("type", &self.event_type)?;
        state.serialize_field("shots", &shots)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_event_is_uncategorized() {
        let event = Event::new(7, vec![Some(Shot::new(0, 10, 0))]);
        assert_eq!(event.event_type, "Uncategorized");
        assert_eq!(event.shot(0), Some(&Shot::new(0, 10, 0)));
        assert_eq!(event.shot(1), None);
    }

    #[test]
    fn test_json_omits_missing_shots() {
        let event = Event::new(
            2,
            vec![Some(Shot::new(0, 10, 0)), None, Some(Shot::new(2, 12, 0))],
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["id"], 2);
        assert_eq!(json["type"], "Uncategorized");
        let shots = json["shots"].as_array().unwrap();
        assert_eq!(shots.len(), 2);
        assert_eq!(shots[0]["source"], 0);
        assert_eq!(shots[1]["source"], 2);
        assert_eq!(shots[1]["start"], 12);
    }
}
