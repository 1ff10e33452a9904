//! Report Pipeline (C5): turns one finalized raw room log into a processed
//! log, an HTML report, and an outbound email.
//!
//! Grounded on the Go original's `internal/pipeline` package for the
//! step ordering (join talk intervals → transcribe → merge → back-fill →
//! persist → render → mail), recast as a background-job tracker the way
//! the teacher tracks its per-connection tasks in
//! `crates/server/src/session.rs`: `tokio_util::task::TaskTracker` is the
//! async equivalent of the spec's "wait-group guarded job counter" — close
//! it and `wait()` on process exit so no report is abandoned mid-send.

mod mailer;
mod render;
mod stt;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use janvlog_protocol::{Event, EventKind, MailSettings, ParticipantId, UserData};
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

pub use mailer::{Mailer, MailerSettings, ReportMailer};
pub use stt::{HttpSttClient, SpeechClient};

use crate::log_store::load_events;

/// Owns the background job tracker plus everything a run of the pipeline
/// needs: the STT client, the mailer, and where processed logs land.
pub struct ReportPipeline {
    stt: Arc<dyn SpeechClient>,
    mailer: Arc<dyn ReportMailer>,
    mail: MailSettings,
    log_root: PathBuf,
    tracker: TaskTracker,
}

impl ReportPipeline {
    #[must_use]
    pub fn new(stt: Arc<dyn SpeechClient>, mailer: Arc<dyn ReportMailer>, mail: MailSettings, log_root: PathBuf) -> Self {
        Self {
            stt,
            mailer,
            mail,
            log_root,
            tracker: TaskTracker::new(),
        }
    }

    /// Spawns a tracked background job processing `raw_log_path`. Returns
    /// immediately; the job's errors are logged internally, never
    /// propagated to the caller (a room supervisor rotating its log must
    /// never block or fail on report generation).
    pub fn spawn(&self, raw_log_path: PathBuf) {
        let stt = Arc::clone(&self.stt);
        let mailer = Arc::clone(&self.mailer);
        let mail = self.mail.clone();
        let log_root = self.log_root.clone();
        self.tracker.spawn(async move {
            if let Err(e) = process_log(&raw_log_path, stt.as_ref(), mailer.as_ref(), &mail, &log_root).await {
                error!(path = %raw_log_path.display(), error = %e, "report pipeline job failed");
            }
        });
    }

    /// Stops accepting new jobs and waits for every outstanding one to
    /// finish. Called once, on the main exit path.
    pub async fn close(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Runs the pipeline on `raw_log_path` synchronously, propagating its
    /// error instead of only logging it. Used by the `regenerate` CLI form,
    /// which replays C5 on an existing raw log and exits once it completes.
    pub async fn run_once(&self, raw_log_path: PathBuf) -> Result<()> {
        process_log(&raw_log_path, self.stt.as_ref(), self.mailer.as_ref(), &self.mail, &self.log_root).await
    }
}

async fn process_log(
    raw_log_path: &Path,
    stt: &dyn SpeechClient,
    mailer: &dyn ReportMailer,
    mail: &MailSettings,
    log_root: &Path,
) -> Result<()> {
    // 1. Load.
    let records = load_events(raw_log_path)
        .await
        .with_context(|| format!("loading raw log {}", raw_log_path.display()))?;
    if records.is_empty() {
        info!(path = %raw_log_path.display(), "raw log is empty, nothing to report");
        return Ok(());
    }

    // 2. Talk-interval join.
    let (kept, speech_records) = join_talk_intervals(records, stt).await;

    // 3. Merge and sort (stable).
    let mut merged: Vec<Event> = kept;
    merged.extend(speech_records);
    merged.sort_by_key(|e| e.timestamp);

    // 4. Name back-fill.
    backfill_display_names(&mut merged);

    // 5. Persist.
    let room_id = merged[0].room_id;
    let base = raw_log_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("report")
        .to_string();
    let processed_path = log_root.join("processed").join(room_id.to_string()).join(format!("{base}.jsonl"));
    if let Err(e) = persist_processed(&processed_path, &merged).await {
        warn!(path = %processed_path.display(), error = %e, "failed to persist processed log");
    }

    // 6. Render.
    let html = match render::render(&merged) {
        Ok(html) => html,
        Err(e) => {
            warn!(error = %e, "failed to render report, skipping mail delivery");
            return Ok(());
        }
    };

    // 7. Deliver.
    let room_name = merged[0].room_name.clone();
    let recipients = mailer::collect_recipients(merged.iter().filter_map(Event::mail), &mail.operator_address);
    let subject = format!("Generated report for room - {room_name} ({room_id})");
    if let Err(e) = mailer.send_report(&subject, &html, &recipients).await {
        warn!(error = %e, "failed to send generated report");
    }

    Ok(())
}

/// Walks the record list once, harvesting each participant's talking
/// interval and expanding it into `speech` records via `stt`. Returns the
/// surviving original records (malformed `left`/`disable-camera` entries
/// with no preceding camera-active state are dropped, per the timeline
/// invariant) alongside the new `speech` records.
async fn join_talk_intervals(records: Vec<Event>, stt: &dyn SpeechClient) -> (Vec<Event>, Vec<Event>) {
    let mut start_time: HashMap<ParticipantId, DateTime<Utc>> = HashMap::new();
    let mut kept = Vec::with_capacity(records.len());
    let mut speech_records = Vec::new();

    for record in records {
        match record.kind {
            EventKind::JoinedWithCamera | EventKind::EnableCamera => {
                start_time.insert(record.participant_id, record.timestamp);
                kept.push(record);
            }
            EventKind::Left | EventKind::DisableCamera => {
                let Some(started_at) = start_time.remove(&record.participant_id) else {
                    warn!(
                        participant_id = %record.participant_id,
                        kind = ?record.kind,
                        "dropping event with no preceding camera-active state"
                    );
                    continue;
                };
                match &record.audio_file {
                    None => {
                        warn!(participant_id = %record.participant_id, "no audio file recorded, skipping transcription");
                    }
                    Some(audio_file) => {
                        speech_records.extend(transcribe_interval(stt, &record, audio_file, started_at).await);
                    }
                }
                kept.push(record);
            }
            EventKind::JoinedWithoutCamera | EventKind::EveryOneLeft | EventKind::Speech => {
                kept.push(record);
            }
        }
    }

    (kept, speech_records)
}

async fn transcribe_interval(
    stt: &dyn SpeechClient,
    closing_record: &Event,
    audio_file: &str,
    started_at: DateTime<Utc>,
) -> Vec<Event> {
    let transcript = match stt.transcribe(Path::new(audio_file)).await {
        Ok(t) => t,
        Err(e) => {
            warn!(audio_file, error = %e, "speech-to-text call failed, skipping this interval");
            return Vec::new();
        }
    };

    transcript
        .segments
        .into_iter()
        .map(|segment| {
            let offset = chrono::Duration::milliseconds(stt::offset_ms(&segment));
            Event {
                room_id: closing_record.room_id,
                room_name: closing_record.room_name.clone(),
                participant_id: closing_record.participant_id,
                display_name: closing_record.display_name.clone(),
                metadata: closing_record.metadata.clone(),
                timestamp: started_at + offset,
                kind: EventKind::Speech,
                audio_file: Some(audio_file.to_string()),
                speech: Some(segment.text),
            }
        })
        .collect()
}

/// Builds `ParticipantID -> UserData` from the last record per id that
/// carries a non-empty display name, then overwrites every record's name
/// and metadata from it. This is what gives `left` records (emitted with
/// an empty name by the room supervisor) a name in the final report.
fn backfill_display_names(records: &mut [Event]) {
    let mut last_known: HashMap<ParticipantId, UserData> = HashMap::new();
    for record in records.iter() {
        if !record.display_name.is_empty() {
            last_known.insert(
                record.participant_id,
                UserData {
                    display_name: record.display_name.clone(),
                    metadata: record.metadata.clone(),
                },
            );
        }
    }
    for record in records.iter_mut() {
        if let Some(user_data) = last_known.get(&record.participant_id) {
            record.display_name = user_data.display_name.clone();
            record.metadata = user_data.metadata.clone();
        }
    }
}

async fn persist_processed(path: &Path, records: &[Event]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating processed log directory {}", parent.display()))?;
    }
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record).context("serializing processed record")?;
        buf.push(b'\n');
    }
    tokio::fs::write(path, buf)
        .await
        .with_context(|| format!("writing processed log {}", path.display()))
}
