use serde::{Deserialize, Serialize};

use crate::status;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Claude,
    ChatGpt,
    Gemini,
}

impl Backend {
    /// Next backend in the fixed Claude -> ChatGPT -> Gemini rotation.
    pub fn next(self) -> Self {
        match self {
            Backend::Claude => Backend::ChatGpt,
            Backend::ChatGpt => Backend::Gemini,
            Backend::Gemini => Backend::Claude,
        }
    }

    pub fn chat_command(self) -> &'static str {
        match self {
            Backend::Claude => "claude_request",
            Backend::ChatGpt => "chatgpt_request",
            Backend::Gemini => "gemini_request",
        }
    }

    pub fn switch_notice(self) -> &'static str {
        match self {
            Backend::Claude => status::BACKEND_CLAUDE,
            Backend::ChatGpt => status::BACKEND_CHATGPT,
            Backend::Gemini => status::BACKEND_GEMINI,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Backend::Claude => "Claude",
            Backend::ChatGpt => "ChatGPT",
            Backend::Gemini => "Gemini",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Economical,
    Performance,
}

impl ModelTier {
    pub fn toggled(self) -> Self {
        match self {
            ModelTier::Economical => ModelTier::Performance,
            ModelTier::Performance => ModelTier::Economical,
        }
    }

    /// Numeric flag understood by the chat commands.
    pub fn flag(self) -> u8 {
        match self {
            ModelTier::Economical => 0,
            ModelTier::Performance => 1,
        }
    }

    pub fn switch_notice(self) -> &'static str {
        match self {
            ModelTier::Economical => status::MODEL_ECONOMICAL,
            ModelTier::Performance => status::MODEL_PERFORMANCE,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SystemPersona {
    None,
    Strict,
    Friendly,
    Positive,
    Critical,
}

impl SystemPersona {
    pub fn id(self) -> u8 {
        match self {
            SystemPersona::None => 0,
            SystemPersona::Strict => 1,
            SystemPersona::Friendly => 2,
            SystemPersona::Positive => 3,
            SystemPersona::Critical => 4,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(SystemPersona::None),
            1 => Some(SystemPersona::Strict),
            2 => Some(SystemPersona::Friendly),
            3 => Some(SystemPersona::Positive),
            4 => Some(SystemPersona::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ListeningState {
    Idle,
    Listening,
    Transitioning,
}

/// Process-lifetime conversation state. Never persisted; the backend owns
/// the durable history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub draft_message: String,
    pub backend: Backend,
    pub model_tier: ModelTier,
    pub system_persona: SystemPersona,
    pub listening: bool,
    pub pending_image: Option<String>,
    pub attached_images: Vec<String>,
    pub status: String,
    /// Message of the most recent failed dispatch; cleared by the next success.
    pub last_error: Option<String>,
    pub last_query: String,
    pub last_result: String,
    pub last_image_url: Option<String>,
    pub last_memo: Option<String>,
    pub voice_banner: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Backend::Claude, ModelTier::Performance)
    }
}

impl Session {
    pub fn new(backend: Backend, model_tier: ModelTier) -> Self {
        Self {
            draft_message: String::new(),
            backend,
            model_tier,
            system_persona: SystemPersona::None,
            listening: false,
            pending_image: None,
            attached_images: Vec::new(),
            status: status::NEUTRAL.to_string(),
            last_error: None,
            last_query: String::new(),
            last_result: String::new(),
            last_image_url: None,
            last_memo: None,
            voice_banner: None,
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            query: self.last_query.clone(),
            result: self.last_result.clone(),
            status: self.status.clone(),
            error: self.last_error.clone(),
            draft: self.draft_message.clone(),
            backend: self.backend,
            model_tier: self.model_tier,
            listening: self.listening,
            pending_image: self.pending_image.clone(),
            images: self.attached_images.clone(),
            result_image_url: self.last_image_url.clone(),
            voice_banner: self.voice_banner.clone(),
        }
    }
}

/// Snapshot handed to the renderer after every transition.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionView {
    pub query: String,
    pub result: String,
    pub status: String,
    pub error: Option<String>,
    pub draft: String,
    pub backend: Backend,
    pub model_tier: ModelTier,
    pub listening: bool,
    pub pending_image: Option<String>,
    pub images: Vec<String>,
    pub result_image_url: Option<String>,
    pub voice_banner: Option<String>,
}
