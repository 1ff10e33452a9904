use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ParticipantId, RoomId};

/// Display name plus optional metadata carried by a participant entry.
///
/// `metadata` carries at least a `mail` key when the conferencing server
/// knows a recipient address for the participant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

/// One record in a room's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub room_id: RoomId,
    #[serde(default)]
    pub room_name: String,
    pub participant_id: ParticipantId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech: Option<String>,
}

impl Event {
    #[must_use]
    pub fn mail(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("mail"))
            .filter(|s| !s.is_empty())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    JoinedWithCamera,
    JoinedWithoutCamera,
    Left,
    DisableCamera,
    EnableCamera,
    EveryOneLeft,
    Speech,
}

impl EventKind {
    /// The plain-text label used in rendered reports when the record carries
    /// no transcribed speech (`Speech` records use their `speech` text
    /// instead of this label).
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            EventKind::JoinedWithCamera => "joined with camera",
            EventKind::JoinedWithoutCamera => "joined without camera",
            EventKind::Left => "left",
            EventKind::DisableCamera => "disable camera",
            EventKind::EnableCamera => "enable camera",
            EventKind::EveryOneLeft => "every one left",
            EventKind::Speech => "speech",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mail_returns_none_when_metadata_absent() {
        let event = Event {
            room_id: RoomId(1.0),
            room_name: String::new(),
            participant_id: ParticipantId(1),
            display_name: "Alice".into(),
            metadata: None,
            timestamp: Utc::now(),
            kind: EventKind::Left,
            audio_file: None,
            speech: None,
        };
        assert_eq!(event.mail(), None);
    }

    #[test]
    fn mail_returns_none_when_empty() {
        let mut metadata = HashMap::new();
        metadata.insert("mail".to_string(), String::new());
        let event = Event {
            room_id: RoomId(1.0),
            room_name: String::new(),
            participant_id: ParticipantId(1),
            display_name: "Alice".into(),
            metadata: Some(metadata),
            timestamp: Utc::now(),
            kind: EventKind::Left,
            audio_file: None,
            speech: None,
        };
        assert_eq!(event.mail(), None);
    }

    #[test]
    fn event_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&EventKind::JoinedWithCamera).unwrap();
        assert_eq!(json, "\"joined-with-camera\"");
    }
}
