pub mod backend;
pub mod config;
pub mod console;
pub mod dispatcher;
pub mod environment;
pub mod error;
pub mod image;
pub mod presets;
pub mod routing;
pub mod runtime_log;
pub mod session;
pub mod settings_store;
pub mod speech;
pub mod status;
pub mod voice_command;

use dispatcher::DispatchOutcome;
use runtime_log::LogLevel;
use std::path::Path;

#[cfg(feature = "desktop")]
use backend::{
    build_runtime_backend, resolve_binary_candidates, resolve_binary_path, BackendClient,
    BackendCommand, RuntimeBackend,
};
#[cfg(feature = "desktop")]
use config::AppSettings;
#[cfg(feature = "desktop")]
use dispatcher::{Dispatcher, PendingDispatch};
#[cfg(feature = "desktop")]
use environment::CredentialHealth;
#[cfg(feature = "desktop")]
use error::SpeechError;
#[cfg(feature = "desktop")]
use presets::{Preset, PresetAction};
#[cfg(feature = "desktop")]
use runtime_log as log_store;
#[cfg(feature = "desktop")]
use runtime_log::RuntimeLogEntry;
#[cfg(feature = "desktop")]
use serde::Serialize;
#[cfg(feature = "desktop")]
use session::{SessionView, SystemPersona};
#[cfg(feature = "desktop")]
use settings_store::AppSettingsPatch;
#[cfg(feature = "desktop")]
use speech::{SpeechAvailability, SpeechCapability};
#[cfg(feature = "desktop")]
use std::path::PathBuf;
#[cfg(feature = "desktop")]
use std::sync::{Arc, Mutex};
#[cfg(feature = "desktop")]
use tauri::Emitter;
#[cfg(feature = "desktop")]
use tauri::Manager;
#[cfg(feature = "desktop")]
use tracing::{info, warn};

/// Appends the outcome of one dispatch to the runtime log.
pub(crate) fn log_outcome(path: &Path, outcome: &DispatchOutcome) {
    let (level, event, message) = match outcome {
        DispatchOutcome::Completed => (
            LogLevel::Info,
            "dispatch.ok",
            "request completed".to_string(),
        ),
        DispatchOutcome::Failed(message) => (LogLevel::Error, "dispatch.error", message.clone()),
        DispatchOutcome::Rejected(error) => {
            (LogLevel::Warn, "dispatch.rejected", error.to_string())
        }
    };
    let _ = runtime_log::append(path, level, event, &message);
}

#[cfg(feature = "desktop")]
type ChatDispatcher = Dispatcher<Arc<RuntimeBackend>, WebviewSpeech>;

/// Recognition runs in the webview; the core only sends it control events.
#[cfg(feature = "desktop")]
struct WebviewSpeech {
    app: tauri::AppHandle,
}

#[cfg(feature = "desktop")]
#[derive(Clone, Serialize)]
struct SpeechControlPayload {
    action: &'static str,
    locale: Option<String>,
}

#[cfg(feature = "desktop")]
impl WebviewSpeech {
    fn send(&self, action: &'static str, locale: Option<&str>) -> Result<(), SpeechError> {
        self.app
            .emit(
                "speech:control",
                SpeechControlPayload {
                    action,
                    locale: locale.map(str::to_string),
                },
            )
            .map_err(|error| SpeechError::Capability(error.to_string()))
    }
}

#[cfg(feature = "desktop")]
impl SpeechCapability for WebviewSpeech {
    fn start_continuous(&self, locale: &str) -> Result<(), SpeechError> {
        self.send("start_continuous", Some(locale))
    }

    fn start_one_shot(&self, locale: &str) -> Result<(), SpeechError> {
        self.send("start_one_shot", Some(locale))
    }

    fn stop(&self) -> Result<(), SpeechError> {
        self.send("stop", None)
    }

    fn reset_transcript(&self) {
        if let Err(error) = self.send("reset_transcript", None) {
            warn!(%error, "failed to reset webview transcript");
        }
    }
}

#[cfg(feature = "desktop")]
struct ChatState {
    dispatcher: tokio::sync::Mutex<ChatDispatcher>,
}

#[cfg(feature = "desktop")]
struct SettingsState {
    settings: Mutex<AppSettings>,
    settings_path: PathBuf,
}

#[cfg(feature = "desktop")]
impl SettingsState {
    fn new(settings: AppSettings, settings_path: PathBuf) -> Self {
        Self {
            settings: Mutex::new(settings),
            settings_path,
        }
    }

    fn current(&self) -> Result<AppSettings, String> {
        self.settings
            .lock()
            .map(|settings| settings.clone())
            .map_err(|_| "failed to acquire settings state".to_string())
    }
}

#[cfg(feature = "desktop")]
struct RuntimeLogState {
    path: PathBuf,
}

#[cfg(feature = "desktop")]
impl RuntimeLogState {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[cfg(feature = "desktop")]
#[derive(Clone, Serialize)]
struct BackendStatus {
    ready: bool,
    label: &'static str,
    description: String,
    resolved_binary_path: Option<String>,
    checked_binary_paths: Vec<String>,
}

#[cfg(feature = "desktop")]
fn publish(app: &tauri::AppHandle, dispatcher: &ChatDispatcher) -> Result<SessionView, String> {
    let view = dispatcher.view();
    app.emit("chat:view", view.clone())
        .map_err(|error| error.to_string())?;
    Ok(view)
}

/// Clones the current backend so it can be invoked with the lock released.
#[cfg(feature = "desktop")]
async fn shared_backend(chat: &ChatState) -> Arc<RuntimeBackend> {
    Arc::clone(chat.dispatcher.lock().await.backend())
}

/// Sends a request that `begin_dispatch` already accounted for. The
/// dispatcher lock is released while the backend works, so requests overlap
/// and settle in arrival order.
#[cfg(feature = "desktop")]
async fn finish_dispatch(
    app: &tauri::AppHandle,
    chat: &ChatState,
    logs: &RuntimeLogState,
    pending: PendingDispatch,
    backend: Arc<RuntimeBackend>,
) -> Result<SessionView, String> {
    let result = backend.invoke(pending.command()).await;
    let mut dispatcher = chat.dispatcher.lock().await;
    let outcome = dispatcher.complete_dispatch(pending, result);
    log_outcome(&logs.path, &outcome);
    publish(app, &dispatcher)
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn get_view(chat: tauri::State<'_, ChatState>) -> Result<SessionView, String> {
    Ok(chat.dispatcher.lock().await.view())
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn submit(
    app: tauri::AppHandle,
    chat: tauri::State<'_, ChatState>,
    logs: tauri::State<'_, RuntimeLogState>,
    text: Option<String>,
) -> Result<SessionView, String> {
    route_and_dispatch(&app, &chat, &logs, text.as_deref().unwrap_or("")).await
}

#[cfg(feature = "desktop")]
async fn route_and_dispatch(
    app: &tauri::AppHandle,
    chat: &ChatState,
    logs: &RuntimeLogState,
    text: &str,
) -> Result<SessionView, String> {
    let (pending, backend) = {
        let mut dispatcher = chat.dispatcher.lock().await;
        let routed = match dispatcher.normalize_and_route(text) {
            Ok(routed) => routed,
            Err(error) => {
                log_outcome(&logs.path, &DispatchOutcome::Rejected(error));
                return publish(app, &dispatcher);
            }
        };
        let pending = dispatcher.begin_dispatch(routed);
        publish(app, &dispatcher)?;
        (pending, Arc::clone(dispatcher.backend()))
    };

    finish_dispatch(app, chat, logs, pending, backend).await
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn on_transcript(
    app: tauri::AppHandle,
    chat: tauri::State<'_, ChatState>,
    logs: tauri::State<'_, RuntimeLogState>,
    transcript: String,
) -> Result<SessionView, String> {
    let (pending, backend) = {
        let mut dispatcher = chat.dispatcher.lock().await;
        match dispatcher.on_transcript(&transcript) {
            Some(pending) => {
                publish(&app, &dispatcher)?;
                (pending, Arc::clone(dispatcher.backend()))
            }
            None => return publish(&app, &dispatcher),
        }
    };

    finish_dispatch(&app, &chat, &logs, pending, backend).await
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn set_draft(
    app: tauri::AppHandle,
    chat: tauri::State<'_, ChatState>,
    text: String,
) -> Result<SessionView, String> {
    let mut dispatcher = chat.dispatcher.lock().await;
    dispatcher.set_draft(&text);
    publish(&app, &dispatcher)
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn append_draft(
    app: tauri::AppHandle,
    chat: tauri::State<'_, ChatState>,
    text: String,
) -> Result<SessionView, String> {
    let mut dispatcher = chat.dispatcher.lock().await;
    dispatcher.append_draft(&text);
    publish(&app, &dispatcher)
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn stage_image(
    app: tauri::AppHandle,
    chat: tauri::State<'_, ChatState>,
    data_url: String,
) -> Result<SessionView, String> {
    let mut dispatcher = chat.dispatcher.lock().await;
    dispatcher
        .stage_image(&data_url)
        .map_err(|error| error.to_string())?;
    publish(&app, &dispatcher)
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn fit_image_size(
    settings: tauri::State<'_, SettingsState>,
    width: u32,
    height: u32,
) -> Result<(u32, u32), String> {
    Ok(image::fit_pasted(width, height, &settings.current()?))
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn toggle_model_tier(
    app: tauri::AppHandle,
    chat: tauri::State<'_, ChatState>,
) -> Result<SessionView, String> {
    let mut dispatcher = chat.dispatcher.lock().await;
    dispatcher.toggle_model_tier();
    publish(&app, &dispatcher)
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn cycle_backend(
    app: tauri::AppHandle,
    chat: tauri::State<'_, ChatState>,
) -> Result<SessionView, String> {
    let mut dispatcher = chat.dispatcher.lock().await;
    dispatcher.cycle_backend();
    publish(&app, &dispatcher)
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn start_stop_listening(
    app: tauri::AppHandle,
    chat: tauri::State<'_, ChatState>,
) -> Result<SessionView, String> {
    let mut dispatcher = chat.dispatcher.lock().await;
    let outcome = dispatcher.start_stop_listening();
    info!(?outcome, "listening toggled");
    publish(&app, &dispatcher)
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn report_speech_availability(
    app: tauri::AppHandle,
    chat: tauri::State<'_, ChatState>,
    logs: tauri::State<'_, RuntimeLogState>,
    availability: SpeechAvailability,
) -> Result<SessionView, String> {
    let mut dispatcher = chat.dispatcher.lock().await;
    dispatcher.report_speech_availability(availability);
    if let Some(notice) = availability.notice() {
        let _ = log_store::append(&logs.path, LogLevel::Warn, "speech.disabled", notice);
    }
    publish(&app, &dispatcher)
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn reset_session(
    app: tauri::AppHandle,
    chat: tauri::State<'_, ChatState>,
    logs: tauri::State<'_, RuntimeLogState>,
) -> Result<SessionView, String> {
    let backend = shared_backend(&chat).await;
    let memo = backend.invoke(&BackendCommand::CreateMemo).await;
    let history = backend.invoke(&BackendCommand::ResetHistory).await;

    let mut dispatcher = chat.dispatcher.lock().await;
    dispatcher.finish_reset(memo, history);
    let _ = log_store::append(&logs.path, LogLevel::Info, "session.reset", "history reset");
    publish(&app, &dispatcher)
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn request_with_persona(
    app: tauri::AppHandle,
    chat: tauri::State<'_, ChatState>,
    persona_id: u8,
) -> Result<SessionView, String> {
    let persona = SystemPersona::from_id(persona_id)
        .ok_or_else(|| format!("unknown persona id {persona_id}"))?;
    send_persona(&app, &chat, persona).await.map(|(view, _)| view)
}

/// Sends a persona directive with the dispatcher lock released.
#[cfg(feature = "desktop")]
async fn send_persona(
    app: &tauri::AppHandle,
    chat: &ChatState,
    persona: SystemPersona,
) -> Result<(SessionView, DispatchOutcome), String> {
    let (command, backend) = {
        let mut dispatcher = chat.dispatcher.lock().await;
        let command = dispatcher.begin_persona(persona);
        (command, Arc::clone(dispatcher.backend()))
    };
    let result = backend.invoke(&command).await;

    let mut dispatcher = chat.dispatcher.lock().await;
    let outcome = dispatcher.finish_persona(persona, result);
    Ok((publish(app, &dispatcher)?, outcome))
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn get_presets() -> Vec<Preset> {
    presets::PRESETS.to_vec()
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn select_preset(
    app: tauri::AppHandle,
    chat: tauri::State<'_, ChatState>,
    logs: tauri::State<'_, RuntimeLogState>,
    index: usize,
) -> Result<SessionView, String> {
    let Some(selected) = presets::preset(index) else {
        return Ok(chat.dispatcher.lock().await.view());
    };

    match selected.action {
        PresetAction::Persona(persona) => {
            let (view, outcome) = send_persona(&app, &chat, persona).await?;
            log_outcome(&logs.path, &outcome);
            Ok(view)
        }
        PresetAction::Prompt(text) => route_and_dispatch(&app, &chat, &logs, text).await,
    }
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn get_credential_health() -> CredentialHealth {
    environment::detect_credentials()
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn get_runtime_logs(
    logs: tauri::State<'_, RuntimeLogState>,
    limit: Option<usize>,
) -> Result<Vec<RuntimeLogEntry>, String> {
    let normalized_limit = limit.unwrap_or(40).clamp(1, 200);
    log_store::read_recent(&logs.path, normalized_limit)
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn clear_runtime_logs(logs: tauri::State<'_, RuntimeLogState>) -> Result<(), String> {
    log_store::clear(&logs.path)
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn get_settings(settings: tauri::State<'_, SettingsState>) -> Result<AppSettings, String> {
    settings.current()
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn update_settings(
    app: tauri::AppHandle,
    settings_state: tauri::State<'_, SettingsState>,
    chat: tauri::State<'_, ChatState>,
    logs: tauri::State<'_, RuntimeLogState>,
    patch: AppSettingsPatch,
) -> Result<AppSettings, String> {
    let updated = {
        let mut settings = settings_state
            .settings
            .lock()
            .map_err(|_| "failed to acquire settings state".to_string())?;
        let updated = settings_store::apply_patch(&settings, patch);
        settings_store::save(&settings_state.settings_path, &updated)?;
        *settings = updated.clone();
        updated
    };

    let resource_dir = app.path().resource_dir().ok();
    let backend = build_runtime_backend(&updated, resource_dir.as_deref());
    log_backend_setup(&logs.path, &backend);

    let mut dispatcher = chat.dispatcher.lock().await;
    dispatcher.set_backend(Arc::new(backend));
    dispatcher.apply_settings(&updated);
    Ok(updated)
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn get_backend_status(
    app: tauri::AppHandle,
    chat: tauri::State<'_, ChatState>,
) -> Result<BackendStatus, String> {
    let resource_dir = app.path().resource_dir().ok();
    let dispatcher = chat.dispatcher.lock().await;
    let backend = dispatcher.backend();
    Ok(BackendStatus {
        ready: backend.is_ready(),
        label: backend.label(),
        description: backend.description(),
        resolved_binary_path: resolve_binary_path(resource_dir.as_deref())
            .map(|path| path.to_string_lossy().to_string()),
        checked_binary_paths: resolve_binary_candidates(resource_dir.as_deref())
            .into_iter()
            .map(|path| path.to_string_lossy().to_string())
            .collect(),
    })
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn check_environment(
    app: tauri::AppHandle,
    chat: tauri::State<'_, ChatState>,
) -> Result<SessionView, String> {
    run_environment_check(&app, &chat).await.map(|(view, _)| view)
}

#[cfg(feature = "desktop")]
async fn run_environment_check(
    app: &tauri::AppHandle,
    chat: &ChatState,
) -> Result<(SessionView, bool), String> {
    let backend = shared_backend(chat).await;
    let result = backend.invoke(&BackendCommand::EnvironmentCheck).await;

    let mut dispatcher = chat.dispatcher.lock().await;
    let ready = dispatcher.finish_environment_check(result);
    Ok((publish(app, &dispatcher)?, ready))
}

#[cfg(feature = "desktop")]
fn log_backend_setup(path: &Path, backend: &RuntimeBackend) {
    let level = if backend.is_ready() {
        LogLevel::Info
    } else {
        LogLevel::Warn
    };
    let _ = log_store::append(path, level, "backend.setup", &backend.description());
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let settings_path = settings_store::default_settings_path();
    let settings = settings_store::load_or_default(&settings_path);
    let logs_path = log_store::default_log_path();
    let _ = log_store::append(&logs_path, LogLevel::Info, "app.start", "application startup");

    tauri::Builder::default()
        .manage(SettingsState::new(settings, settings_path))
        .manage(RuntimeLogState::new(logs_path))
        .setup(|app| {
            let handle = app.handle().clone();
            let current = app.state::<SettingsState>().current()?;
            let resource_dir = app.path().resource_dir().ok();
            let backend = build_runtime_backend(&current, resource_dir.as_deref());
            log_backend_setup(&app.state::<RuntimeLogState>().path, &backend);
            info!(backend = %backend.description(), "backend ready");

            let dispatcher = Dispatcher::new(
                Arc::new(backend),
                WebviewSpeech { app: handle.clone() },
                &current,
            );
            app.manage(ChatState {
                dispatcher: tokio::sync::Mutex::new(dispatcher),
            });

            tauri::async_runtime::spawn(async move {
                let chat = handle.state::<ChatState>();
                match run_environment_check(&handle, &chat).await {
                    Ok((_, true)) => {}
                    Ok((_, false)) => warn!("backend reports missing provider credentials"),
                    Err(error) => warn!(%error, "failed to publish environment check"),
                }
            });

            Ok(())
        })
        .plugin(tauri_plugin_opener::init())
        .invoke_handler(tauri::generate_handler![
            get_view,
            submit,
            on_transcript,
            set_draft,
            append_draft,
            stage_image,
            fit_image_size,
            toggle_model_tier,
            cycle_backend,
            start_stop_listening,
            report_speech_availability,
            reset_session,
            request_with_persona,
            get_presets,
            select_preset,
            get_credential_health,
            get_runtime_logs,
            clear_runtime_logs,
            get_settings,
            update_settings,
            get_backend_status,
            check_environment
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}

#[cfg(not(feature = "desktop"))]
pub fn run() {
    let settings = settings_store::load_or_default(&settings_store::default_settings_path());
    let logs_path = runtime_log::default_log_path();
    let _ = runtime_log::append(&logs_path, LogLevel::Info, "app.start", "console startup");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!(%error, "failed to start async runtime");
            return;
        }
    };
    if let Err(error) = runtime.block_on(console::run_console(settings, logs_path)) {
        tracing::error!(%error, "console exited with an error");
    }
}
