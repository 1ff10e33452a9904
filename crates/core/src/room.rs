//! Room Supervisor (C3): polls one room's membership at 1 Hz, spawns and
//! retires participant recorders, appends timeline events, and rotates the
//! event log into the report pipeline every time the room empties out.
//!
//! Grounded on the teacher's `crates/server/src/session.rs` connection-map
//! ownership shape (one map of live sub-resources mutated by a single
//! owning task, torn down on close), combined with the `poll::run_every`
//! primitive for the 1 Hz membership tick.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use janvlog_protocol::janus::ParticipantEntry;
use janvlog_protocol::{Event, EventKind, RoomId, UserData};
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::MultiError;
use crate::log_store::LogStore;
use crate::pipeline::ReportPipeline;
use crate::poll::run_every;
use crate::recorder::ParticipantRecorder;
use crate::signaling::{Handle, SignalingClient};

/// Per-id bookkeeping. `Inactive` means "seen with camera off, no
/// recorder"; `Active` owns the live subscriber.
enum ParticipantState {
    Inactive,
    Active(ParticipantRecorder),
}

/// The tri-state shape of `ParticipantState` without an attached recorder,
/// so the classification decisions in `classify_activate`/
/// `classify_deactivate` can be expressed as pure functions and tested
/// without a live `SignalingClient`/WebRTC stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    Absent,
    Inactive,
    Active,
}

impl From<Option<&ParticipantState>> for Presence {
    fn from(state: Option<&ParticipantState>) -> Self {
        match state {
            None => Presence::Absent,
            Some(ParticipantState::Inactive) => Presence::Inactive,
            Some(ParticipantState::Active(_)) => Presence::Active,
        }
    }
}

/// What a tick's activate path (`publisher: true`) does to a given
/// presence: `None` means "already active, do nothing", matching
/// `classify_activate`'s "if a live recorder already exists, do nothing".
fn activate_transition(current: Presence) -> Option<EventKind> {
    match current {
        Presence::Absent => Some(EventKind::JoinedWithCamera),
        Presence::Inactive => Some(EventKind::EnableCamera),
        Presence::Active => None,
    }
}

/// What a tick's deactivate path (`publisher: false`) does to a given
/// presence: the resulting presence plus the event emitted, if any.
fn deactivate_transition(current: Presence) -> (Presence, Option<EventKind>) {
    match current {
        Presence::Absent => (Presence::Inactive, Some(EventKind::JoinedWithoutCamera)),
        Presence::Active => (Presence::Inactive, Some(EventKind::DisableCamera)),
        Presence::Inactive => (Presence::Inactive, None),
    }
}

/// Validates that one participant's event-kind subsequence conforms to the
/// timeline grammar in spec §3:
/// `(joined-without-camera | joined-with-camera) ( (disable-camera enable-camera) | speech* )* left`
#[cfg(test)]
fn conforms_to_timeline_grammar(kinds: &[EventKind]) -> bool {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum State {
        Start,
        CameraOff,
        CameraOn,
        End,
    }

    let mut state = State::Start;
    for kind in kinds {
        state = match (state, kind) {
            (State::Start, EventKind::JoinedWithoutCamera) => State::CameraOff,
            (State::Start, EventKind::JoinedWithCamera) => State::CameraOn,
            (State::CameraOff, EventKind::EnableCamera) => State::CameraOn,
            (State::CameraOn, EventKind::DisableCamera) => State::CameraOff,
            (State::CameraOn, EventKind::Speech) => State::CameraOn,
            (State::CameraOff, EventKind::Left) | (State::CameraOn, EventKind::Left) => State::End,
            _ => return false,
        };
    }
    state == State::End
}

/// All of the single poller task's local state. Touched only from within
/// `run_room_loop`/`tick`, so (per the spec's concurrency model) it needs
/// no lock of its own.
struct RoomLoopState {
    participants: HashMap<u64, ParticipantState>,
    user_data: HashMap<u64, UserData>,
}

pub struct RoomSupervisor {
    #[allow(dead_code)]
    room_id: RoomId,
    cancel: CancellationToken,
    task: Mutex<Option<tokio::task::JoinHandle<Result<()>>>>,
}

impl RoomSupervisor {
    /// Attaches a fresh handle, opens the room's first raw log, and starts
    /// the 1 Hz membership poller.
    #[allow(clippy::too_many_arguments)]
    pub async fn spawn(
        signaling: Arc<SignalingClient>,
        room_id: RoomId,
        room_name: String,
        admin_key: String,
        audio_root: PathBuf,
        log_root: PathBuf,
        pipeline: Arc<ReportPipeline>,
    ) -> Result<Self> {
        let handle = signaling
            .attach_video_room_handle()
            .await
            .context("attaching room supervisor handle")?;
        let log = LogStore::open(&log_root, room_id)
            .await
            .with_context(|| format!("opening raw log for room {room_id}"))?;

        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(run_room_loop(
                signaling, handle, room_id, room_name, admin_key, audio_root, log_root, pipeline, log, cancel,
            ))
        };

        Ok(Self {
            room_id,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Closes the poller's latch, waits for it, then (inside the loop
    /// task) every recorder and the event log are closed in turn.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            return task.await.context("room supervisor task panicked")?;
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_room_loop(
    signaling: Arc<SignalingClient>,
    handle: Handle,
    room_id: RoomId,
    room_name: String,
    admin_key: String,
    audio_root: PathBuf,
    log_root: PathBuf,
    pipeline: Arc<ReportPipeline>,
    log: LogStore,
    cancel: CancellationToken,
) -> Result<()> {
    let mut state = RoomLoopState {
        participants: HashMap::new(),
        user_data: HashMap::new(),
    };
    let mut log = log;

    run_every(Duration::from_secs(1), &cancel, || {
        tick(
            &handle,
            &signaling,
            room_id,
            &room_name,
            &admin_key,
            &audio_root,
            &log_root,
            &pipeline,
            &mut state,
            &mut log,
        )
    })
    .await;

    let mut errors = MultiError::new();
    for (_, participant_state) in state.participants.drain() {
        if let ParticipantState::Active(recorder) = participant_state {
            errors.push(recorder.close().await);
        }
    }
    errors.push(log.close().await);
    errors.push(handle.detach().await);
    errors.into_result()
}

#[allow(clippy::too_many_arguments)]
async fn tick(
    handle: &Handle,
    signaling: &Arc<SignalingClient>,
    room_id: RoomId,
    room_name: &str,
    admin_key: &str,
    audio_root: &Path,
    log_root: &Path,
    pipeline: &Arc<ReportPipeline>,
    state: &mut RoomLoopState,
    log: &mut LogStore,
) {
    let was_empty = state.participants.is_empty();

    let listing = match handle
        .request(json!({
            "request": "listparticipants",
            "room": room_id.get(),
            "admin_key": admin_key,
        }))
        .await
    {
        Ok(value) => value,
        Err(e) => {
            // Fatal-to-the-process per spec default; N-consecutive-failure
            // backoff is named as an open alternative but not implemented.
            panic!("listparticipants failed for room {room_id}: {e:?}");
        }
    };

    let entries: Vec<ParticipantEntry> =
        serde_json::from_value(listing.get("participants").cloned().unwrap_or_default()).unwrap_or_default();
    let mut seen = HashSet::new();
    let mut new_events = Vec::new();

    for entry in &entries {
        seen.insert(entry.id);
        state.user_data.insert(
            entry.id,
            UserData {
                display_name: entry.display.clone(),
                metadata: entry.metadata.clone(),
            },
        );

        if entry.publisher {
            classify_activate(entry, room_id, room_name, signaling, audio_root, state, &mut new_events).await;
        } else {
            classify_deactivate(entry, room_id, room_name, state, &mut new_events).await;
        }
    }

    // Sweep: anyone locally known but absent from this tick's listing has left.
    let missing: Vec<u64> = state.participants.keys().filter(|id| !seen.contains(id)).copied().collect();
    for id in missing {
        let last_known = state.user_data.get(&id).cloned().unwrap_or_default();
        match state.participants.remove(&id) {
            Some(ParticipantState::Active(recorder)) => {
                let audio_file = recorder.current_audio_file().await;
                if let Err(e) = recorder.close().await {
                    warn!(participant_id = id, error = %e, "failed to close recorder for departed participant");
                }
                new_events.push(make_event(
                    room_id,
                    room_name,
                    id,
                    &last_known,
                    EventKind::Left,
                    audio_file.map(|p| p.display().to_string()),
                ));
            }
            Some(ParticipantState::Inactive) | None => {
                new_events.push(make_event(room_id, room_name, id, &last_known, EventKind::Left, None));
            }
        }
    }

    if let Err(e) = log.add(new_events).await {
        warn!(room_id = %room_id, error = %e, "failed to append events to raw log");
    }

    if !was_empty && state.participants.is_empty() {
        let closing_event = make_event(room_id, room_name, 0, &UserData::default(), EventKind::EveryOneLeft, None);
        if let Err(e) = log.add(vec![closing_event]).await {
            warn!(room_id = %room_id, error = %e, "failed to append every-one-left event");
        }
        rotate_log(room_id, log_root, pipeline, log).await;
    }
}

fn classify_activate_recorder_path(audio_root: &Path, room_id: RoomId, display_name: &str) -> PathBuf {
    audio_root.join(room_id.to_string()).join(sanitize(display_name))
}

/// Strips path separators and `.`-only segments from a server-supplied
/// display name before it is used as a path component, so a participant
/// naming themselves e.g. `../../etc` or `/etc/passwd` can't write their
/// recording outside the room's audio directory.
fn sanitize(display_name: &str) -> String {
    let cleaned: String = display_name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}

async fn classify_activate(
    entry: &ParticipantEntry,
    room_id: RoomId,
    room_name: &str,
    signaling: &Arc<SignalingClient>,
    audio_root: &Path,
    state: &mut RoomLoopState,
    new_events: &mut Vec<Event>,
) {
    let Some(kind) = activate_transition(state.participants.get(&entry.id).into()) else {
        return;
    };

    let participant_path = classify_activate_recorder_path(audio_root, room_id, &entry.display);
    match ParticipantRecorder::new(Arc::clone(signaling), room_id.get(), entry.id.into(), &entry.display, &participant_path).await
    {
        Ok(recorder) => {
            state.participants.insert(entry.id, ParticipantState::Active(recorder));
            new_events.push(make_event(
                room_id,
                room_name,
                entry.id,
                state.user_data.get(&entry.id).unwrap(),
                kind,
                None,
            ));
        }
        Err(e) => {
            warn!(participant_id = entry.id, error = %e, "failed to start participant recorder, will retry next tick");
        }
    }
}

async fn classify_deactivate(
    entry: &ParticipantEntry,
    room_id: RoomId,
    room_name: &str,
    state: &mut RoomLoopState,
    new_events: &mut Vec<Event>,
) {
    let presence = Presence::from(state.participants.get(&entry.id));
    let (_, kind) = deactivate_transition(presence);

    if presence == Presence::Active {
        let Some(ParticipantState::Active(recorder)) = state.participants.remove(&entry.id) else {
            unreachable!("checked above")
        };
        let audio_file = recorder.current_audio_file().await;
        if let Err(e) = recorder.close().await {
            warn!(participant_id = entry.id, error = %e, "failed to close recorder on camera-off");
        }
        state.participants.insert(entry.id, ParticipantState::Inactive);
        if let Some(kind) = kind {
            new_events.push(make_event(
                room_id,
                room_name,
                entry.id,
                state.user_data.get(&entry.id).unwrap(),
                kind,
                audio_file.map(|p| p.display().to_string()),
            ));
        }
    } else if presence == Presence::Absent {
        state.participants.insert(entry.id, ParticipantState::Inactive);
        if let Some(kind) = kind {
            new_events.push(make_event(
                room_id,
                room_name,
                entry.id,
                state.user_data.get(&entry.id).unwrap(),
                kind,
                None,
            ));
        }
    }
}

async fn rotate_log(room_id: RoomId, log_root: &Path, pipeline: &Arc<ReportPipeline>, log: &mut LogStore) {
    let fresh = match LogStore::open(log_root, room_id).await {
        Ok(fresh) => fresh,
        Err(e) => {
            warn!(room_id = %room_id, error = %e, "failed to open fresh raw log after rotation");
            return;
        }
    };
    let finished = std::mem::replace(log, fresh);
    let path = finished.file().to_path_buf();
    if let Err(e) = finished.close().await {
        warn!(room_id = %room_id, error = %e, "failed to close rotated raw log");
    }
    info!(room_id = %room_id, path = %path.display(), "room emptied, handing log to report pipeline");
    pipeline.spawn(path);
}

fn make_event(room_id: RoomId, room_name: &str, participant_id: u64, user_data: &UserData, kind: EventKind, audio_file: Option<String>) -> Event {
    Event {
        room_id,
        room_name: room_name.to_string(),
        participant_id: participant_id.into(),
        display_name: user_data.display_name.clone(),
        metadata: user_data.metadata.clone(),
        timestamp: chrono::Utc::now(),
        kind,
        audio_file,
        speech: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_from_absent_joins_with_camera() {
        assert_eq!(activate_transition(Presence::Absent), Some(EventKind::JoinedWithCamera));
    }

    #[test]
    fn activate_from_inactive_enables_camera() {
        assert_eq!(activate_transition(Presence::Inactive), Some(EventKind::EnableCamera));
    }

    #[test]
    fn activate_from_active_is_a_no_op() {
        assert_eq!(activate_transition(Presence::Active), None);
    }

    #[test]
    fn deactivate_from_absent_joins_without_camera() {
        assert_eq!(
            deactivate_transition(Presence::Absent),
            (Presence::Inactive, Some(EventKind::JoinedWithoutCamera))
        );
    }

    #[test]
    fn deactivate_from_active_disables_camera() {
        assert_eq!(
            deactivate_transition(Presence::Active),
            (Presence::Inactive, Some(EventKind::DisableCamera))
        );
    }

    #[test]
    fn deactivate_from_inactive_is_a_no_op() {
        assert_eq!(deactivate_transition(Presence::Inactive), (Presence::Inactive, None));
    }

    /// spec.md §8's named boundary behavior: "A participant seen as
    /// inactive, then active, then inactive in successive ticks produces
    /// joined-without-camera, enable-camera, disable-camera in that order."
    #[test]
    fn toggle_scenario_produces_the_three_events_in_order() {
        let mut presence = Presence::Absent;
        let mut kinds = Vec::new();

        let (next, kind) = deactivate_transition(presence);
        presence = next;
        kinds.push(kind.expect("tick 1 (inactive) should emit an event"));

        let kind = activate_transition(presence).expect("tick 2 (active) should emit an event");
        presence = Presence::Active;
        kinds.push(kind);

        let (next, kind) = deactivate_transition(presence);
        presence = next;
        kinds.push(kind.expect("tick 3 (inactive again) should emit an event"));

        assert_eq!(
            kinds,
            vec![EventKind::JoinedWithoutCamera, EventKind::EnableCamera, EventKind::DisableCamera]
        );
        assert_eq!(presence, Presence::Inactive);
    }

    #[test]
    fn grammar_accepts_single_speaker_clean_exit() {
        assert!(conforms_to_timeline_grammar(&[EventKind::JoinedWithCamera, EventKind::Left]));
    }

    #[test]
    fn grammar_accepts_camera_toggle_then_left() {
        assert!(conforms_to_timeline_grammar(&[
            EventKind::JoinedWithoutCamera,
            EventKind::EnableCamera,
            EventKind::DisableCamera,
            EventKind::Left,
        ]));
    }

    #[test]
    fn grammar_accepts_speech_while_camera_is_on() {
        assert!(conforms_to_timeline_grammar(&[
            EventKind::JoinedWithCamera,
            EventKind::Speech,
            EventKind::Speech,
            EventKind::DisableCamera,
            EventKind::EnableCamera,
            EventKind::Speech,
            EventKind::Left,
        ]));
    }

    #[test]
    fn grammar_accepts_joined_without_camera_then_left_directly() {
        assert!(conforms_to_timeline_grammar(&[EventKind::JoinedWithoutCamera, EventKind::Left]));
    }

    #[test]
    fn grammar_rejects_left_with_no_preceding_join() {
        assert!(!conforms_to_timeline_grammar(&[EventKind::Left]));
    }

    #[test]
    fn grammar_rejects_disable_camera_with_no_preceding_active_state() {
        assert!(!conforms_to_timeline_grammar(&[
            EventKind::JoinedWithoutCamera,
            EventKind::DisableCamera,
            EventKind::Left,
        ]));
    }

    #[test]
    fn grammar_rejects_speech_while_camera_is_off() {
        assert!(!conforms_to_timeline_grammar(&[
            EventKind::JoinedWithoutCamera,
            EventKind::Speech,
            EventKind::Left,
        ]));
    }

    #[test]
    fn grammar_rejects_a_sequence_with_no_trailing_left() {
        assert!(!conforms_to_timeline_grammar(&[EventKind::JoinedWithCamera, EventKind::Speech]));
    }

    #[test]
    fn sanitize_passes_through_an_ordinary_display_name() {
        assert_eq!(sanitize("Alice"), "Alice");
    }

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(sanitize("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize("a/b\\c"), "a_b_c");
    }

    #[test]
    fn sanitize_collapses_dot_only_names_to_a_placeholder() {
        assert_eq!(sanitize(".."), "_");
        assert_eq!(sanitize("."), "_");
        assert_eq!(sanitize(""), "_");
    }

    #[test]
    fn recorder_path_never_escapes_the_room_audio_directory() {
        use std::path::Component;

        let audio_root = Path::new("logs/audio");
        let path = classify_activate_recorder_path(audio_root, RoomId(1234.0), "../../etc/passwd");
        assert!(path.starts_with(audio_root));
        assert!(
            !path.components().any(|c| matches!(c, Component::ParentDir)),
            "sanitized path must not contain a parent-dir component: {path:?}"
        );
    }

    #[test]
    fn recorder_path_rejects_an_absolute_looking_display_name() {
        use std::path::Component;

        let audio_root = Path::new("logs/audio");
        let path = classify_activate_recorder_path(audio_root, RoomId(1234.0), "/etc/passwd");
        assert!(path.starts_with(audio_root));
        assert_eq!(path.components().filter(|c| matches!(c, Component::RootDir)).count(), 0);
    }
}
