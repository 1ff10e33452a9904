//! Narrow typed projections over the Janus gateway's schemaless wire
//! messages. Any field these types don't name is simply never looked at; a
//! missing optional field decodes to `None` rather than failing the whole
//! message, per the "treat any missing field as absent from this round's
//! processing, not a fatal error" rule.

use std::collections::HashMap;

use serde::Deserialize;

use crate::ids::RoomId;

/// One entry in a `listparticipants` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantEntry {
    pub id: u64,
    pub publisher: bool,
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListParticipantsResponse {
    #[serde(default)]
    pub participants: Vec<ParticipantEntry>,
}

/// One entry in a `list` (room listing) response.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomEntry {
    pub room: RoomId,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListRoomsResponse {
    #[serde(default)]
    pub list: Vec<RoomEntry>,
}

/// Projection of a plugin event's `plugindata.data` payload, used to detect
/// the `videoroom: "updated"` signal that tells a subscriber its feed is
/// gone.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoRoomPluginData {
    #[serde(default)]
    pub videoroom: Option<String>,
}
