use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Speaker name to id mapping served by the directory endpoint.
///
/// An empty directory means the model has a single voice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeakerDirectory {
    speakers: BTreeMap<String, i64>,
}

impl SpeakerDirectory {
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json)
            .map_err(|e| ProtocolError::MalformedFrame(format!("speaker directory: {}", e)))
    }

    pub fn is_single_voice(&self) -> bool {
        self.speakers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.speakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.speakers.is_empty()
    }

    /// The speaker preselected in a voice picker: the one with id 0
    pub fn default_speaker(&self) -> Option<(&str, i64)> {
        self.speakers
            .iter()
            .find(|(_, id)| **id == 0)
            .map(|(name, id)| (name.as_str(), *id))
    }

    /// Resolve a display name or an advertised numeric id
    pub fn resolve(&self, selector: &str) -> Option<i64> {
        let selector = selector.trim();
        if let Some(id) = self.speakers.get(selector) {
            return Some(*id);
        }
        let id = selector.parse::<i64>().ok()?;
        self.speakers.values().any(|v| *v == id).then_some(id)
    }

    /// Entries ordered by speaker id
    pub fn by_id(&self) -> Vec<(&str, i64)> {
        let mut entries: Vec<_> = self
            .speakers
            .iter()
            .map(|(name, id)| (name.as_str(), *id))
            .collect();
        entries.sort_by_key(|(_, id)| *id);
        entries
    }
}

impl FromIterator<(String, i64)> for SpeakerDirectory {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        Self {
            speakers: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_directory_is_single_voice() {
        let directory = SpeakerDirectory::from_json("{}").unwrap();
        assert!(directory.is_single_voice());
        assert_eq!(directory.default_speaker(), None);
    }

    #[test]
    fn test_default_speaker_has_id_zero() {
        let directory = SpeakerDirectory::from_json(r#"{"bob": 1, "alice": 0}"#).unwrap();
        assert_eq!(directory.default_speaker(), Some(("alice", 0)));
        assert_eq!(directory.by_id(), vec![("alice", 0), ("bob", 1)]);
    }

    #[test]
    fn test_resolve_by_name_or_id() {
        let directory: SpeakerDirectory =
            [("alice".to_string(), 0), ("bob".to_string(), 7)].into_iter().collect();
        assert_eq!(directory.resolve("bob"), Some(7));
        assert_eq!(directory.resolve(" 0 "), Some(0));
        assert_eq!(directory.resolve("3"), None);
        assert_eq!(directory.resolve("carol"), None);
    }

    #[test]
    fn test_non_integer_ids_are_rejected() {
        assert!(SpeakerDirectory::from_json(r#"{"alice": "zero"}"#).is_err());
    }
}
