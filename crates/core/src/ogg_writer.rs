//! Ogg/Opus capture for one participant's audio track.
//!
//! The Go original links `pion/webrtc`'s `pkg/media/oggwriter` package. The
//! `webrtc` crate this workspace already depends on ships the same thing as
//! `webrtc::media::io::ogg_writer::OggWriter`, used the same way the
//! `save-to-disk-h264` example in the wider webrtc-rs example set uses it:
//! construct once per file, feed it RTP packets as they arrive, `close` it
//! when the track ends.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use webrtc::media::io::ogg_writer::OggWriter;
use webrtc::media::io::Writer as MediaWriter;
use webrtc::rtp::packet::Packet as RtpPacket;

pub struct OggOpusWriter {
    inner: OggWriter<File>,
    path: PathBuf,
}

impl OggOpusWriter {
    /// `sample_rate`/`channels` come from the track's own negotiated codec
    /// capability, not a fixed constant, per the spec's "Ogg writer at the
    /// track's clock rate and channel count".
    pub fn create(path: &Path, sample_rate: u32, channels: u16) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let inner = OggWriter::new(file, sample_rate, channels)
            .with_context(|| format!("initializing ogg writer for {}", path.display()))?;
        Ok(Self {
            inner,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_rtp(&mut self, packet: &RtpPacket) -> Result<()> {
        self.inner
            .write_rtp(packet)
            .context("writing rtp packet to ogg writer")
    }

    pub fn close(mut self) -> Result<()> {
        self.inner.close().context("closing ogg writer")
    }
}
