//! Participant Recorder (C2): one WebRTC subscriber per publisher, writing
//! its Opus audio to disk and exposing the live path for the room
//! supervisor to sample.
//!
//! Grounded on `crates/agent/src/peer.rs`'s `RTCPeerConnection` construction
//! and codec-registration idiom, generalized from "offer locally, answer
//! never observed" (the teacher is the offerer) to "receive a remote offer,
//! answer it" — the shape the webrtc-rs example set's `rtp-forwarder` and
//! `save-to-disk-h264` examples use for a `recvonly` subscriber.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use janvlog_protocol::ParticipantId;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::warn;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

use crate::errors::RecorderError;
use crate::ogg_writer::OggOpusWriter;
use crate::signaling::{Handle, HandleEvent, SignalingClient};

/// A subscriber peer connection recording one publisher's audio for the
/// lifetime of their attendance.
pub struct ParticipantRecorder {
    handle: Arc<Handle>,
    peer_connection: Arc<RTCPeerConnection>,
    current_audio_file: Arc<RwLock<Option<PathBuf>>>,
    closed: Arc<AtomicBool>,
    watch_task: tokio::task::JoinHandle<()>,
}

impl ParticipantRecorder {
    pub async fn new(
        signaling: Arc<SignalingClient>,
        room_id: f64,
        participant_id: ParticipantId,
        display_name: &str,
        room_path: &Path,
    ) -> Result<Self> {
        let handle = signaling
            .attach_video_room_handle()
            .await
            .map_err(RecorderError::Attach)?;

        let join = handle
            .message(
                json!({
                    "request": "join",
                    "ptype": "subscriber",
                    "room": room_id,
                    "streams": [{"feed": participant_id.0}],
                }),
                None,
            )
            .await
            .map_err(RecorderError::Attach)?;

        let offer_sdp = join
            .jsep
            .as_ref()
            .filter(|j| j["type"] == "offer")
            .and_then(|j| j["sdp"].as_str())
            .ok_or_else(|| RecorderError::NoOffer(join.plugindata.to_string()))?
            .to_string();

        let peer_connection = match build_peer_connection().await {
            Ok(pc) => pc,
            Err(e) => {
                let _ = handle.detach().await;
                return Err(RecorderError::PeerConnection(e).into());
            }
        };

        let current_audio_file = Arc::new(RwLock::new(None));
        register_track_handler(&peer_connection, room_path.to_path_buf(), Arc::clone(&current_audio_file));

        if let Err(e) = negotiate(&peer_connection, &offer_sdp, &handle, room_id).await {
            let _ = peer_connection.close().await;
            let _ = handle.detach().await;
            return Err(e);
        }

        let handle = Arc::new(handle);
        let closed = Arc::new(AtomicBool::new(false));
        let watch_task = {
            let handle = Arc::clone(&handle);
            let peer_connection = Arc::clone(&peer_connection);
            let closed = Arc::clone(&closed);
            tokio::spawn(async move {
                while let Some(event) = handle.next_event().await {
                    if let HandleEvent::Plugin(plugin_event) = event {
                        // The server's signal that the feed this subscriber
                        // was attached to no longer exists: close ourselves
                        // exactly as an explicit `close()` call would.
                        if plugin_event.plugindata["videoroom"] == "updated" {
                            let _ = teardown(&handle, &peer_connection, &closed).await;
                            break;
                        }
                    }
                }
            })
        };

        Ok(Self {
            handle,
            peer_connection,
            current_audio_file,
            closed,
            watch_task,
        })
    }

    /// The currently open (or most recently closed) audio file for this
    /// participant, sampled by the room supervisor when it needs to attach
    /// a path to an event.
    pub async fn current_audio_file(&self) -> Option<PathBuf> {
        self.current_audio_file.read().await.clone()
    }

    #[must_use]
    pub fn handle_id(&self) -> u64 {
        self.handle.id()
    }

    /// Idempotent: only the first call actually tears anything down.
    pub async fn close(&self) -> Result<()> {
        let result = teardown(&self.handle, &self.peer_connection, &self.closed).await;
        self.watch_task.abort();
        result
    }
}

/// Shared teardown logic for an explicit `close()` call and the watch
/// task's self-close on an `"updated"` plugin event. The one-shot latch
/// makes whichever path runs first responsible for the side effects; the
/// other observes `closed` already set and does nothing.
async fn teardown(handle: &Handle, peer_connection: &RTCPeerConnection, closed: &AtomicBool) -> Result<()> {
    if closed.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    let mut errors = crate::errors::MultiError::new();
    errors.push(peer_connection.close().await.context("closing peer connection"));
    errors.push(
        handle
            .message(json!({"request": "leave"}), None)
            .await
            .map(|_| ())
            .context("sending leave request"),
    );
    errors.push(handle.detach().await);
    errors.into_result()
}

async fn build_peer_connection() -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();

    // Only Opus is ever persisted (spec Non-goals: video frames are
    // dropped), but the video `m=` section still needs a codec registered
    // or SDP negotiation for it fails outright.
    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48_000,
                channels: 1,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            payload_type: 111,
            ..Default::default()
        },
        RTPCodecType::Audio,
    )?;
    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90_000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            payload_type: 96,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: vec!["stun:stun.l.google.com:19302".to_owned()],
            ..Default::default()
        }],
        ..Default::default()
    };

    let pc = Arc::new(api.new_peer_connection(config).await?);

    pc.add_transceiver_from_kind(
        RTPCodecType::Audio,
        Some(RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Recvonly,
            ..Default::default()
        }),
    )
    .await?;
    pc.add_transceiver_from_kind(
        RTPCodecType::Video,
        Some(RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Recvonly,
            ..Default::default()
        }),
    )
    .await?;

    Ok(pc)
}

fn register_track_handler(
    pc: &Arc<RTCPeerConnection>,
    room_path: PathBuf,
    current_audio_file: Arc<RwLock<Option<PathBuf>>>,
) {
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let room_path = room_path.clone();
        let current_audio_file = Arc::clone(&current_audio_file);
        Box::pin(async move {
            let is_opus = track.codec().capability.mime_type.eq_ignore_ascii_case(MIME_TYPE_OPUS);
            if is_opus {
                tokio::spawn(record_audio_track(track, room_path, current_audio_file));
            } else {
                tokio::spawn(discard_track(track));
            }
        })
    }));
}

async fn record_audio_track(
    track: Arc<TrackRemote>,
    room_path: PathBuf,
    current_audio_file: Arc<RwLock<Option<PathBuf>>>,
) {
    if let Err(e) = tokio::fs::create_dir_all(&room_path).await {
        warn!("failed to create room directory {}: {e}", room_path.display());
        return;
    }

    let start = unix_timestamp();
    let path = room_path.join(format!("{start}.ogg"));
    let capability = track.codec().capability;
    let channels = if capability.channels == 0 { 1 } else { capability.channels };
    let mut writer = match OggOpusWriter::create(&path, capability.clock_rate, channels) {
        Ok(w) => w,
        Err(e) => {
            warn!("failed to open ogg writer at {}: {e}", path.display());
            return;
        }
    };
    *current_audio_file.write().await = Some(path.clone());

    loop {
        match track.read_rtp().await {
            Ok((packet, _)) => {
                if let Err(e) = writer.write_rtp(&packet) {
                    // Preserved from the original: a write failure mid-recording
                    // is treated as unrecoverable for this track.
                    panic!("failed writing opus rtp packet to {}: {e}", path.display());
                }
            }
            Err(webrtc::Error::ErrDataChannelNotOpen) | Err(webrtc::Error::ErrClosedPipe) => break,
            Err(webrtc::util::Error::Io(io_err)) if io_err.0.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                panic!("unexpected error reading opus rtp from {}: {e}", path.display());
            }
        }
    }

    if let Err(e) = writer.close() {
        // Preserved from the original: an Ogg close failure is as
        // unrecoverable as a mid-recording write failure.
        panic!("failed closing ogg writer at {}: {e}", path.display());
    }

    let close_ts = unix_timestamp();
    let final_path = room_path.join(format!("{start}_{close_ts}.ogg"));
    match tokio::fs::rename(&path, &final_path).await {
        Ok(()) => *current_audio_file.write().await = Some(final_path),
        Err(e) => warn!("failed to rename {} to {}: {e}", path.display(), final_path.display()),
    }
}

async fn discard_track(track: Arc<TrackRemote>) {
    while track.read_rtp().await.is_ok() {}
}

fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

async fn negotiate(pc: &Arc<RTCPeerConnection>, offer_sdp: &str, handle: &Handle, room_id: f64) -> Result<()> {
    let offer = RTCSessionDescription::offer(offer_sdp.to_string())?;
    pc.set_remote_description(offer).await?;

    let answer = pc.create_answer(None).await?;
    let mut gather_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(answer).await?;
    let _ = gather_complete.recv().await;

    let local = pc
        .local_description()
        .await
        .context("no local description after gathering completed")?;

    handle
        .message(
            json!({"request": "start", "room": room_id}),
            Some(json!({"type": "answer", "sdp": local.sdp})),
        )
        .await?;
    Ok(())
}
