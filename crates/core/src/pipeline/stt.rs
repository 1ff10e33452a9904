//! Speech-to-text HTTP client: one POST per recorded talking interval.
//!
//! Grounded on the teacher's `reqwest`-based HTTP clients pattern — the
//! wider pack's transcription worker (`ed707cf5_gjovanov-roomler-ai`) talks
//! to an ASR backend through a trait so the worker stays backend-agnostic;
//! the same seam is used here (`async_trait`) so the report pipeline is
//! testable against a fake transcript source without a live HTTP service.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

/// One transcribed segment within an utterance, with its offset from the
/// start of the audio file in seconds.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
pub struct Segment {
    #[allow(dead_code)]
    pub id: u32,
    #[allow(dead_code)]
    pub seek: i64,
    pub start: f64,
    #[allow(dead_code)]
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transcript {
    #[allow(dead_code)]
    pub text: String,
    pub segments: Vec<Segment>,
}

/// A backend that turns a recorded audio file into a transcript. The
/// production implementation is an HTTP call; tests supply a fake.
#[async_trait]
pub trait SpeechClient: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcript>;
}

/// Calls a speech-to-text HTTP service: `POST <endpoint>?audio=<path>` with
/// an empty body, per the spec's external-interface description.
pub struct HttpSttClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSttClient {
    #[must_use]
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SpeechClient for HttpSttClient {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcript> {
        let audio = audio_path.to_string_lossy().into_owned();
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("audio", audio.as_str())])
            .send()
            .await
            .with_context(|| format!("calling speech-to-text service for {audio}"))?
            .error_for_status()
            .with_context(|| format!("speech-to-text service rejected {audio}"))?;

        response
            .json::<Transcript>()
            .await
            .with_context(|| format!("decoding speech-to-text response for {audio}"))
    }
}

/// Converts a segment's offset-from-start (seconds as a float, per the
/// wire format) into whole milliseconds, rounding per the spec.
#[must_use]
pub fn offset_ms(segment: &Segment) -> i64 {
    (segment.start * 1000.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_ms_rounds_to_nearest_millisecond() {
        let segment = Segment {
            id: 0,
            seek: 0,
            start: 0.5005,
            end: 1.0,
            text: "hi".into(),
        };
        assert_eq!(offset_ms(&segment), 501);
    }

    #[test]
    fn offset_ms_of_zero_is_zero() {
        let segment = Segment {
            id: 0,
            seek: 0,
            start: 0.0,
            end: 0.5,
            text: "hi".into(),
        };
        assert_eq!(offset_ms(&segment), 0);
    }
}
