//! Server Supervisor (C4): the process-wide singleton that discovers rooms
//! on the conferencing server and instantiates one Room Supervisor per
//! newly observed room.
//!
//! Grounded on the teacher's top-level task-fan-out shape in
//! `crates/agent/src/main.rs` (`tokio::select!` over a handful of
//! long-lived tasks, a shared shutdown flag observed by all of them).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use janvlog_protocol::janus::RoomEntry;
use janvlog_protocol::RoomId;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::MultiError;
use crate::pipeline::ReportPipeline;
use crate::poll::run_every;
use crate::room::RoomSupervisor;
use crate::signaling::{Handle, HandleEvent, SignalingClient};

pub struct ServerSupervisor {
    cancel: CancellationToken,
    room_poller: Mutex<Option<tokio::task::JoinHandle<()>>>,
    event_drain: Mutex<Option<tokio::task::JoinHandle<()>>>,
    rooms: Arc<Mutex<HashMap<RoomId, Arc<RoomSupervisor>>>>,
    handle: Arc<Handle>,
}

impl ServerSupervisor {
    pub async fn spawn(
        signaling: Arc<SignalingClient>,
        admin_key: String,
        audio_root: PathBuf,
        log_root: PathBuf,
        pipeline: Arc<ReportPipeline>,
    ) -> Result<Self> {
        let handle = Arc::new(
            signaling
                .attach_video_room_handle()
                .await
                .context("attaching server supervisor handle")?,
        );
        let cancel = CancellationToken::new();
        let rooms: Arc<Mutex<HashMap<RoomId, Arc<RoomSupervisor>>>> = Arc::new(Mutex::new(HashMap::new()));

        let event_drain = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move {
                while let Some(event) = handle.next_event().await {
                    if let HandleEvent::Plugin(plugin_event) = event {
                        info!(plugindata = %plugin_event.plugindata, "server handle event");
                    }
                }
            })
        };

        let room_poller = {
            let handle = Arc::clone(&handle);
            let signaling = Arc::clone(&signaling);
            let rooms = Arc::clone(&rooms);
            let admin_key = admin_key.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_every(Duration::from_secs(1), &cancel, || {
                    discover_rooms(&handle, &signaling, &admin_key, &audio_root, &log_root, &pipeline, &rooms)
                })
                .await;
            })
        };

        Ok(Self {
            cancel,
            room_poller: Mutex::new(Some(room_poller)),
            event_drain: Mutex::new(Some(event_drain)),
            rooms,
            handle,
        })
    }

    /// Closes the latch, waits for both tasks, closes every Room
    /// Supervisor (errors joined), then detaches the top-level handle.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        if let Some(task) = self.room_poller.lock().await.take() {
            let _ = task.await;
        }
        if let Some(task) = self.event_drain.lock().await.take() {
            task.abort();
        }

        let mut errors = MultiError::new();
        for (_, room) in self.rooms.lock().await.drain() {
            errors.push(room.close().await);
        }
        errors.push(self.handle.detach().await);
        errors.into_result()
    }
}

#[allow(clippy::too_many_arguments)]
async fn discover_rooms(
    handle: &Handle,
    signaling: &Arc<SignalingClient>,
    admin_key: &str,
    audio_root: &std::path::Path,
    log_root: &std::path::Path,
    pipeline: &Arc<ReportPipeline>,
    rooms: &Arc<Mutex<HashMap<RoomId, Arc<RoomSupervisor>>>>,
) {
    let listing = match handle.request(json!({"request": "list", "admin_key": admin_key})).await {
        Ok(value) => value,
        Err(e) => {
            panic!("listing rooms failed: {e:?}");
        }
    };

    let entries: Vec<RoomEntry> = serde_json::from_value(listing.get("list").cloned().unwrap_or_default()).unwrap_or_default();

    for entry in entries {
        let already_known = rooms.lock().await.contains_key(&entry.room);
        if already_known {
            continue;
        }
        info!(room_id = %entry.room, "discovered new room");
        match RoomSupervisor::spawn(
            Arc::clone(signaling),
            entry.room,
            entry.description.clone(),
            admin_key.to_string(),
            audio_root.to_path_buf(),
            log_root.to_path_buf(),
            Arc::clone(pipeline),
        )
        .await
        {
            Ok(supervisor) => {
                rooms.lock().await.insert(entry.room, Arc::new(supervisor));
            }
            Err(e) => {
                warn!(room_id = %entry.room, error = %e, "failed to start room supervisor, will retry next tick");
            }
        }
    }
}
