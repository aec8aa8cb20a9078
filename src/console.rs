//! Line-oriented shell used when the app is built without the desktop
//! feature. Plain lines are submitted as chat input; `:`-prefixed lines
//! drive the other dispatcher operations.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::backend::{build_runtime_backend, BackendClient};
use crate::config::AppSettings;
use crate::dispatcher::Dispatcher;
use crate::error::SpeechError;
use crate::presets::PRESETS;
use crate::runtime_log::{self as log_store, LogLevel};
use crate::session::{SessionView, SystemPersona};
use crate::speech::SpeechCapability;

const DEFAULT_LOG_LIMIT: usize = 40;

const HELP: &str = "\
Type a message and press enter to send it. An empty line sends the draft.
  /all              show the stored conversation
  /image <prompt>   generate an image
  :paste <text>     append text to the draft
  :image <data-url> attach a png/jpeg data URL to the next message
  :model            toggle the model tier
  :ai               switch to the next backend
  :listen           start or stop dictation
  :say <text>       dictate text (ends with エンター。, 送信。 or 教えて。 to send)
  :persona <0-4>    send a system directive
  :preset <n>       run a preset (:presets lists them)
  :reset            archive and clear the conversation
  :logs [n]         show recent runtime log entries
  :quit
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Submit(String),
    Paste(String),
    Say(String),
    Image(String),
    ToggleModelTier,
    CycleBackend,
    Listen,
    Reset,
    Persona(u8),
    Preset(usize),
    Presets,
    Logs(usize),
    Help,
    Quit,
    Unknown(String),
}

pub fn parse_line(line: &str) -> ConsoleCommand {
    let line = line.trim_end_matches('\r');
    let Some(rest) = line.strip_prefix(':') else {
        return ConsoleCommand::Submit(line.to_string());
    };

    let (name, arg) = rest
        .split_once(' ')
        .map(|(name, arg)| (name, arg.trim()))
        .unwrap_or((rest, ""));
    let unknown = || ConsoleCommand::Unknown(line.to_string());

    match name {
        "paste" => ConsoleCommand::Paste(arg.to_string()),
        "say" => ConsoleCommand::Say(arg.to_string()),
        "image" if !arg.is_empty() => ConsoleCommand::Image(arg.to_string()),
        "model" => ConsoleCommand::ToggleModelTier,
        "ai" => ConsoleCommand::CycleBackend,
        "listen" => ConsoleCommand::Listen,
        "reset" => ConsoleCommand::Reset,
        "persona" => arg
            .parse::<u8>()
            .map(ConsoleCommand::Persona)
            .unwrap_or_else(|_| unknown()),
        "preset" => arg
            .parse::<usize>()
            .map(ConsoleCommand::Preset)
            .unwrap_or_else(|_| unknown()),
        "presets" => ConsoleCommand::Presets,
        "logs" if arg.is_empty() => ConsoleCommand::Logs(DEFAULT_LOG_LIMIT),
        "logs" => arg
            .parse::<usize>()
            .map(|limit| ConsoleCommand::Logs(limit.clamp(1, 200)))
            .unwrap_or_else(|_| unknown()),
        "help" => ConsoleCommand::Help,
        "quit" | "q" => ConsoleCommand::Quit,
        _ => unknown(),
    }
}

/// Stand-in recognizer fed by `:say`. Like a real recognizer it keeps one
/// growing buffer and re-emits all of it on every update.
#[derive(Debug, Default)]
pub struct ConsoleSpeech {
    active: AtomicBool,
    buffer: Mutex<String>,
}

impl ConsoleSpeech {
    pub fn hear(&self, text: &str) -> Option<String> {
        if !self.active.load(Ordering::SeqCst) {
            return None;
        }
        let mut buffer = self.buffer.lock().ok()?;
        buffer.push_str(text);
        Some(buffer.clone())
    }
}

impl SpeechCapability for ConsoleSpeech {
    fn start_continuous(&self, _locale: &str) -> Result<(), SpeechError> {
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn start_one_shot(&self, _locale: &str) -> Result<(), SpeechError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), SpeechError> {
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn reset_transcript(&self) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.clear();
        }
    }
}

pub async fn run_console(settings: AppSettings, log_path: PathBuf) -> Result<(), String> {
    let backend = build_runtime_backend(&settings, None);
    let level = if backend.is_ready() {
        LogLevel::Info
    } else {
        LogLevel::Warn
    };
    let _ = log_store::append(&log_path, level, "backend.setup", &backend.description());
    info!(backend = %backend.description(), "console backend ready");

    let mut dispatcher = Dispatcher::new(backend, ConsoleSpeech::default(), &settings);
    dispatcher.check_environment().await;

    let mut stdout = tokio::io::stdout();
    write_out(&mut stdout, HELP).await?;
    write_out(&mut stdout, &format_view(&dispatcher.view())).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.map_err(|error| error.to_string())? {
        let output = match parse_line(&line) {
            ConsoleCommand::Quit => break,
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Presets => format_presets(),
            ConsoleCommand::Logs(limit) => format_logs(&log_path, limit),
            ConsoleCommand::Unknown(line) => format!("unknown command: {line}\n"),
            command => {
                execute(&mut dispatcher, command, &log_path).await;
                format_view(&dispatcher.view())
            }
        };
        write_out(&mut stdout, &output).await?;
    }

    info!("console closed");
    Ok(())
}

/// Runs one dispatcher operation. Commands that only print are handled by
/// the caller.
pub async fn execute<B: BackendClient>(
    dispatcher: &mut Dispatcher<B, ConsoleSpeech>,
    command: ConsoleCommand,
    log_path: &Path,
) {
    match command {
        ConsoleCommand::Submit(text) => {
            let outcome = dispatcher.submit(&text).await;
            crate::log_outcome(log_path, &outcome);
        }
        ConsoleCommand::Paste(text) => dispatcher.append_draft(&text),
        ConsoleCommand::Say(text) => {
            let Some(transcript) = dispatcher.speech().hear(&text) else {
                warn!("dictation ignored while not listening");
                return;
            };
            if let Some(outcome) = dispatcher.handle_transcript(&transcript).await {
                crate::log_outcome(log_path, &outcome);
            }
        }
        ConsoleCommand::Image(data_url) => {
            if let Err(error) = dispatcher.stage_image(&data_url) {
                warn!(%error, "rejected pasted image");
            }
        }
        ConsoleCommand::ToggleModelTier => dispatcher.toggle_model_tier(),
        ConsoleCommand::CycleBackend => dispatcher.cycle_backend(),
        ConsoleCommand::Listen => {
            let outcome = dispatcher.start_stop_listening();
            info!(?outcome, "listening toggled");
        }
        ConsoleCommand::Reset => {
            dispatcher.reset_session().await;
            let _ = log_store::append(log_path, LogLevel::Info, "session.reset", "history reset");
        }
        ConsoleCommand::Persona(id) => match SystemPersona::from_id(id) {
            Some(persona) => {
                dispatcher.request_with_persona(persona).await;
            }
            None => warn!(id, "unknown persona id"),
        },
        ConsoleCommand::Preset(index) => {
            if let Some(outcome) = dispatcher.select_preset(index).await {
                crate::log_outcome(log_path, &outcome);
            }
        }
        ConsoleCommand::Presets
        | ConsoleCommand::Logs(_)
        | ConsoleCommand::Help
        | ConsoleCommand::Quit
        | ConsoleCommand::Unknown(_) => {}
    }
}

pub fn format_view(view: &SessionView) -> String {
    let mut text = String::new();
    let _ = write!(text, "[{} | {:?}", view.backend.label(), view.model_tier);
    if view.listening {
        text.push_str(" | listening");
    }
    text.push(']');
    if !view.status.is_empty() {
        let _ = write!(text, " {}", view.status);
    }
    text.push('\n');

    if let Some(banner) = &view.voice_banner {
        let _ = writeln!(text, "! {banner}");
    }
    if !view.query.is_empty() {
        text.push_str(&view.query);
    }
    if !view.result.is_empty() {
        let _ = writeln!(text, "{}", view.result);
    }
    if let Some(url) = &view.result_image_url {
        let _ = writeln!(text, "image: {url}");
    }
    if let Some(error) = &view.error {
        let _ = writeln!(text, "last error: {error}");
    }
    if !view.draft.is_empty() {
        let _ = writeln!(text, "draft: {}", view.draft);
    }
    if view.pending_image.is_some() {
        text.push_str("image attached to next message\n");
    }
    text
}

fn format_presets() -> String {
    PRESETS
        .iter()
        .enumerate()
        .map(|(index, preset)| format!("{index}: {}\n", preset.label))
        .collect()
}

fn format_logs(log_path: &Path, limit: usize) -> String {
    match log_store::read_recent(log_path, limit) {
        Ok(entries) => entries
            .iter()
            .map(|entry| {
                format!(
                    "{} {:?} {} {}\n",
                    entry.timestamp_unix_ms, entry.level, entry.event, entry.message
                )
            })
            .collect(),
        Err(error) => format!("failed to read runtime log: {error}\n"),
    }
}

async fn write_out(stdout: &mut tokio::io::Stdout, text: &str) -> Result<(), String> {
    stdout
        .write_all(text.as_bytes())
        .await
        .map_err(|error| error.to_string())?;
    stdout.flush().await.map_err(|error| error.to_string())
}
