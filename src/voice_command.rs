//! Spoken "submit" phrases at the end of a live transcript.
//!
//! Dictation runs continuously, so the user ends a message by saying a
//! trigger phrase. The recognizer appends a full stop (`。`) to each phrase.

/// Ordered trigger table: the first matching phrase wins. Each entry is the
/// transcript ending and the word removed from the request.
const TRIGGERS: [(&str, &str); 3] = [("エンター。", "エンター"), ("送信。", "送信"), ("教えて。", "")];

const SENTENCE_END: char = '。';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceCommand {
    pub triggered: bool,
    pub strip_suffix: String,
}

impl VoiceCommand {
    fn none() -> Self {
        Self {
            triggered: false,
            strip_suffix: String::new(),
        }
    }
}

pub fn detect_voice_command(transcript: &str) -> VoiceCommand {
    TRIGGERS
        .iter()
        .find(|(ending, _)| transcript.ends_with(ending))
        .map(|(_, suffix)| VoiceCommand {
            triggered: true,
            strip_suffix: (*suffix).to_string(),
        })
        .unwrap_or_else(VoiceCommand::none)
}

/// Removes the trigger word (and its trailing full stop) from the end of the
/// transcript. An empty suffix means the whole transcript is the request.
pub fn strip_voice_command(transcript: &str, strip_suffix: &str) -> String {
    if strip_suffix.is_empty() {
        return transcript.to_string();
    }

    let body = transcript
        .strip_suffix(SENTENCE_END)
        .unwrap_or(transcript);
    match body.strip_suffix(strip_suffix) {
        Some(rest) => rest.to_string(),
        None => transcript.replacen(strip_suffix, "", 1),
    }
}
