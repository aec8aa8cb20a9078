use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::error::SpeechError;
use crate::status;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpeechAvailability {
    Available,
    Unsupported,
    MicrophoneUnavailable,
}

impl SpeechAvailability {
    /// Fixed banner for the terminal capability states.
    pub fn notice(self) -> Option<&'static str> {
        match self {
            SpeechAvailability::Available => None,
            SpeechAvailability::Unsupported => Some(status::SPEECH_UNSUPPORTED),
            SpeechAvailability::MicrophoneUnavailable => Some(status::MICROPHONE_UNAVAILABLE),
        }
    }
}

/// Platform speech recognizer. Transcripts flow back separately as a stream
/// of whole-buffer strings.
pub trait SpeechCapability: Send + Sync {
    fn availability(&self) -> SpeechAvailability {
        SpeechAvailability::Available
    }

    fn start_continuous(&self, locale: &str) -> Result<(), SpeechError>;

    fn start_one_shot(&self, locale: &str) -> Result<(), SpeechError>;

    fn stop(&self) -> Result<(), SpeechError>;

    /// Clears the recognizer's accumulated transcript buffer.
    fn reset_transcript(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechCall {
    StartContinuous(String),
    StartOneShot(String),
    Stop,
    ResetTranscript,
}

#[derive(Debug)]
pub struct StubSpeech {
    availability: SpeechAvailability,
    start_failure: Option<SpeechError>,
    calls: Mutex<Vec<SpeechCall>>,
}

impl Default for StubSpeech {
    fn default() -> Self {
        Self::new(SpeechAvailability::Available)
    }
}

impl StubSpeech {
    pub fn new(availability: SpeechAvailability) -> Self {
        Self {
            availability,
            start_failure: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_start(mut self, error: SpeechError) -> Self {
        self.start_failure = Some(error);
        self
    }

    pub fn calls(&self) -> Vec<SpeechCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: SpeechCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl SpeechCapability for StubSpeech {
    fn availability(&self) -> SpeechAvailability {
        self.availability
    }

    fn start_continuous(&self, locale: &str) -> Result<(), SpeechError> {
        if let Some(error) = &self.start_failure {
            return Err(error.clone());
        }
        self.record(SpeechCall::StartContinuous(locale.to_string()));
        Ok(())
    }

    fn start_one_shot(&self, locale: &str) -> Result<(), SpeechError> {
        self.record(SpeechCall::StartOneShot(locale.to_string()));
        Ok(())
    }

    fn stop(&self) -> Result<(), SpeechError> {
        self.record(SpeechCall::Stop);
        Ok(())
    }

    fn reset_transcript(&self) {
        self.record(SpeechCall::ResetTranscript);
    }
}
