pub const NEUTRAL: &str = "";
pub const LISTENING: &str = "Listening...";
pub const START_LISTENING: &str = "Start listening.";
pub const STOP_LISTENING: &str = "Stopped listening.";
pub const THINKING: &str = "Thinking...";
pub const EMPTY_MESSAGE: &str = "Please enter a msg.";
pub const RESET_DONE: &str = "Done! reset message history.";
pub const LISTENING_BUSY: &str = "Listening is already switching, try again.";

pub const MODEL_ECONOMICAL: &str = "Switch to model Economical.";
pub const MODEL_PERFORMANCE: &str = "Switch to model Performance.";

pub const BACKEND_CLAUDE: &str = "Switch to Claude.";
pub const BACKEND_CHATGPT: &str = "Switch to ChatGPT.";
pub const BACKEND_GEMINI: &str = "Switch to Gemini.";

pub const SPEECH_UNSUPPORTED: &str = "Speech recognition is not supported on this system.";
pub const MICROPHONE_UNAVAILABLE: &str =
    "Microphone function is off, access to microphone is required.";

pub const MISSING_CREDENTIALS: &str = "[ALERT] Unavailable: set ANTHROPIC_API_KEY, CHATGPTTOKEN or GOOGLE_GEMINI_API_KEY to use the AI services.";

pub fn error(message: impl std::fmt::Display) -> String {
    format!("error: {message}")
}

pub fn query_heading(text: &str) -> String {
    format!("<h2 class=\"line_wrap\">{text}</h2>\n")
}
