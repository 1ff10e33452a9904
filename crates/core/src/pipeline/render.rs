//! HTML report rendering: one `<h2>` per room, one `<li>` per event.
//!
//! Grounded on `examples/DaniilShunto-Code2/smtp-mailer-main/src/mail/mod.rs`'s
//! `create_template_engine` (`Tera::default()` plus `add_raw_template` over
//! `include_str!`'d template files); this report needs exactly one
//! template instead of that mailer's dozen, so one `add_raw_template` call
//! replaces its loop of them.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use janvlog_protocol::{Event, EventKind};
use serde::Serialize;
use tera::Tera;

const TEMPLATE_NAME: &str = "report.html.tera";
const TEMPLATE_SOURCE: &str = include_str!("../../templates/report.html.tera");

#[derive(Serialize)]
struct ReportLine {
    time: String,
    display_name: String,
    text: String,
}

#[derive(Serialize)]
struct ReportRoom {
    room_id: String,
    room_name: String,
    items: Vec<ReportLine>,
}

/// Renders the merged, display-name-backfilled records for one room into
/// an HTML document: one `<h2>` per `RoomID` encountered, a `<ul>` of
/// `HH:MM:SS DisplayName: text` lines sorted by the records' own order
/// (already timestamp-sorted by the caller).
pub fn render(records: &[Event]) -> Result<String> {
    let mut tera = Tera::default();
    tera.add_raw_template(TEMPLATE_NAME, TEMPLATE_SOURCE)
        .context("registering report template")?;

    let mut by_room: BTreeMap<String, ReportRoom> = BTreeMap::new();
    for record in records {
        let key = record.room_id.to_string();
        let room = by_room.entry(key.clone()).or_insert_with(|| ReportRoom {
            room_id: key,
            room_name: record.room_name.clone(),
            items: Vec::new(),
        });
        room.items.push(ReportLine {
            time: record.timestamp.format("%H:%M:%S").to_string(),
            display_name: record.display_name.clone(),
            text: line_text(record),
        });
    }

    let mut context = tera::Context::new();
    context.insert("rooms", &by_room.into_values().collect::<Vec<_>>());
    tera.render(TEMPLATE_NAME, &context).context("rendering report template")
}

fn line_text(record: &Event) -> &str {
    if record.kind == EventKind::Speech {
        record.speech.as_deref().unwrap_or_default()
    } else {
        record.kind.label()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use janvlog_protocol::{ParticipantId, RoomId};

    fn event(kind: EventKind, speech: Option<&str>) -> Event {
        Event {
            room_id: RoomId(1.0),
            room_name: "Standup".to_string(),
            participant_id: ParticipantId(1),
            display_name: "Ada".to_string(),
            metadata: None,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap(),
            kind,
            audio_file: None,
            speech: speech.map(str::to_string),
        }
    }

    #[test]
    fn renders_one_heading_per_room_and_a_line_per_event() {
        let records = vec![
            event(EventKind::JoinedWithCamera, None),
            event(EventKind::Speech, Some("hi there")),
            event(EventKind::Left, None),
        ];
        let html = render(&records).unwrap();
        assert!(html.contains("<h2>Standup (1)</h2>"));
        assert!(html.contains("10:00:00 Ada: joined with camera"));
        assert!(html.contains("10:00:00 Ada: hi there"));
        assert!(html.contains("10:00:00 Ada: left"));
    }
}
