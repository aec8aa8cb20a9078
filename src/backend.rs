use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::{AppSettings, ImageSize};
use crate::error::BackendError;
use crate::session::{Backend, ModelTier, SystemPersona};

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

const BACKEND_BIN_ENV_NAME: &str = "PARLEY_BACKEND_BIN";
const STUB_BACKEND_NAME: &str = "stub";

/// Every call the client can make across the backend boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCommand {
    ChatCompletion {
        backend: Backend,
        model_tier: ModelTier,
        text: String,
        image: Option<String>,
    },
    GenerateImage {
        size: ImageSize,
        prompt: String,
    },
    FetchAllHistory,
    ResetHistory,
    CreateMemo,
    SystemDirective {
        persona: SystemPersona,
    },
    EnvironmentCheck,
}

impl BackendCommand {
    pub fn name(&self) -> &'static str {
        match self {
            BackendCommand::ChatCompletion { backend, .. } => backend.chat_command(),
            BackendCommand::GenerateImage { .. } => "generate_image",
            BackendCommand::FetchAllHistory => "all_messages",
            BackendCommand::ResetHistory => "reset",
            BackendCommand::CreateMemo => "memo",
            BackendCommand::SystemDirective { .. } => "request_system",
            BackendCommand::EnvironmentCheck => "is_there_env",
        }
    }

    pub fn args(&self) -> Value {
        match self {
            BackendCommand::ChatCompletion {
                model_tier,
                text,
                image,
                ..
            } => match image {
                Some(image) => json!({
                    "model_tier": model_tier.flag(),
                    "text": text,
                    "image": image,
                }),
                None => json!({
                    "model_tier": model_tier.flag(),
                    "text": text,
                }),
            },
            BackendCommand::GenerateImage { size, prompt } => json!({
                "size": size.flag(),
                "prompt": prompt,
            }),
            BackendCommand::SystemDirective { persona } => json!({
                "persona_id": persona.id(),
            }),
            BackendCommand::FetchAllHistory
            | BackendCommand::ResetHistory
            | BackendCommand::CreateMemo
            | BackendCommand::EnvironmentCheck => json!({}),
        }
    }
}

#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn invoke(&self, command: &BackendCommand) -> Result<String, BackendError>;

    fn label(&self) -> &'static str {
        "unknown"
    }
}

/// Lets a shared client be invoked without holding the dispatcher.
#[async_trait]
impl<T: BackendClient + ?Sized> BackendClient for Arc<T> {
    async fn invoke(&self, command: &BackendCommand) -> Result<String, BackendError> {
        (**self).invoke(command).await
    }

    fn label(&self) -> &'static str {
        (**self).label()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeneratedImage {
    pub prompt: String,
    pub url: String,
}

pub fn parse_generated_image(reply: &str) -> Result<GeneratedImage, BackendError> {
    serde_json::from_str::<GeneratedImage>(reply)
        .map_err(|error| BackendError::InvalidResponse(format!("image reply: {error}")))
}

/// Only a literal JSON `true` counts as "credentials present".
pub fn parse_environment_reply(reply: &str) -> bool {
    serde_json::from_str::<bool>(reply.trim()).unwrap_or(false)
}

/// In-process backend with scripted replies, used offline and in tests.
#[derive(Debug, Default)]
pub struct StubBackend {
    replies: Mutex<HashMap<&'static str, VecDeque<Result<String, BackendError>>>>,
    calls: Mutex<Vec<BackendCommand>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply for the next call of the named command.
    pub fn with_reply(self, command: &'static str, reply: Result<String, BackendError>) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.entry(command).or_default().push_back(reply);
        }
        self
    }

    pub fn calls(&self) -> Vec<BackendCommand> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn default_reply(command: &BackendCommand) -> String {
        match command {
            BackendCommand::ChatCompletion { text, .. } => format!("<p>echo: {text}</p>"),
            BackendCommand::GenerateImage { prompt, .. } => json!({
                "prompt": prompt,
                "url": "stub://image.png",
            })
            .to_string(),
            BackendCommand::FetchAllHistory => "<p>no history</p>".to_string(),
            BackendCommand::ResetHistory => String::new(),
            BackendCommand::CreateMemo => "memo saved".to_string(),
            BackendCommand::SystemDirective { persona } => {
                format!("system directive {} applied", persona.id())
            }
            BackendCommand::EnvironmentCheck => "true".to_string(),
        }
    }
}

#[async_trait]
impl BackendClient for StubBackend {
    async fn invoke(&self, command: &BackendCommand) -> Result<String, BackendError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command.clone());
        }

        let scripted = self
            .replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.get_mut(command.name()).and_then(VecDeque::pop_front));

        scripted.unwrap_or_else(|| Ok(Self::default_reply(command)))
    }

    fn label(&self) -> &'static str {
        "stub"
    }
}

#[derive(Debug, Clone)]
pub struct SidecarConfig {
    pub binary_path: PathBuf,
    pub timeout: Duration,
}

impl SidecarConfig {
    pub fn command_args(&self, command: &BackendCommand) -> Vec<String> {
        vec![command.name().to_string()]
    }
}

/// Runs the backend executable once per command: the command name is the
/// only argument, JSON args go to stdin, the reply comes back on stdout and
/// a failure message on stderr with a non-zero exit status.
#[derive(Debug, Clone)]
pub struct SidecarBackend {
    pub config: SidecarConfig,
}

impl SidecarBackend {
    pub fn new(config: SidecarConfig) -> Self {
        Self { config }
    }

    async fn invoke_impl(&self, command: &BackendCommand) -> Result<String, BackendError> {
        let program = self.config.binary_path.to_string_lossy().to_string();
        let payload = serde_json::to_vec(&command.args())
            .map_err(|error| BackendError::InvalidResponse(error.to_string()))?;

        let mut process = Command::new(&self.config.binary_path);
        process
            .args(self.config.command_args(command))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(target_os = "windows")]
        {
            process.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = process.spawn().map_err(|error| BackendError::Launch {
            program: program.clone(),
            reason: error.to_string(),
        })?;

        // The timeout covers feeding stdin too: a child that never reads would
        // otherwise stall the write forever. Dropping the child kills it.
        let exchange = async move {
            if let Some(mut stdin) = child.stdin.take() {
                let written = match stdin.write_all(&payload).await {
                    Ok(()) => stdin.shutdown().await,
                    Err(error) => Err(error),
                };
                match written {
                    Ok(()) => {}
                    // Exit status and stderr still say what went wrong.
                    Err(error) if error.kind() == io::ErrorKind::BrokenPipe => {
                        debug!("backend closed stdin before reading all args");
                    }
                    Err(error) => return Err(error),
                }
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.config.timeout, exchange)
            .await
            .map_err(|_| BackendError::Timeout(self.config.timeout.as_secs()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{program} exited with status {}", output.status)
            } else {
                stderr
            };
            return Err(BackendError::Failed {
                status: output.status.code(),
                message,
            });
        }

        let reply = String::from_utf8_lossy(&output.stdout);
        Ok(reply.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[async_trait]
impl BackendClient for SidecarBackend {
    async fn invoke(&self, command: &BackendCommand) -> Result<String, BackendError> {
        debug!(command = command.name(), "invoking backend sidecar");
        self.invoke_impl(command).await
    }

    fn label(&self) -> &'static str {
        "sidecar"
    }
}

#[derive(Debug)]
pub enum RuntimeBackend {
    Stub(StubBackend),
    Unavailable { reason: String },
    Sidecar(SidecarBackend),
}

impl RuntimeBackend {
    pub fn description(&self) -> String {
        match self {
            RuntimeBackend::Stub(_) => "stub backend (offline echo)".to_string(),
            RuntimeBackend::Unavailable { reason } => format!("backend unavailable: {reason}"),
            RuntimeBackend::Sidecar(sidecar) => format!(
                "sidecar backend at '{}'",
                sidecar.config.binary_path.to_string_lossy()
            ),
        }
    }

    pub fn is_ready(&self) -> bool {
        !matches!(self, RuntimeBackend::Unavailable { .. })
    }
}

#[async_trait]
impl BackendClient for RuntimeBackend {
    async fn invoke(&self, command: &BackendCommand) -> Result<String, BackendError> {
        match self {
            RuntimeBackend::Stub(stub) => stub.invoke(command).await,
            RuntimeBackend::Unavailable { reason } => {
                Err(BackendError::Unavailable(reason.clone()))
            }
            RuntimeBackend::Sidecar(sidecar) => sidecar.invoke(command).await,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RuntimeBackend::Stub(stub) => stub.label(),
            RuntimeBackend::Unavailable { .. } => "unavailable",
            RuntimeBackend::Sidecar(sidecar) => sidecar.label(),
        }
    }
}

/// `stub` in place of a binary path selects the in-process echo backend.
pub fn build_runtime_backend(settings: &AppSettings, resource_dir: Option<&Path>) -> RuntimeBackend {
    let timeout = Duration::from_secs(settings.backend_timeout_secs.max(1));

    if let Some(configured) = settings.backend_binary.as_deref() {
        if configured == STUB_BACKEND_NAME {
            return RuntimeBackend::Stub(StubBackend::new());
        }
        let path = PathBuf::from(configured);
        if path.components().count() > 1 && !path.exists() {
            return RuntimeBackend::Unavailable {
                reason: format!("configured backend binary '{configured}' does not exist"),
            };
        }
        return RuntimeBackend::Sidecar(SidecarBackend::new(SidecarConfig {
            binary_path: path,
            timeout,
        }));
    }

    match resolve_binary_path(resource_dir) {
        Some(binary_path) if binary_path == Path::new(STUB_BACKEND_NAME) => {
            RuntimeBackend::Stub(StubBackend::new())
        }
        Some(binary_path) => RuntimeBackend::Sidecar(SidecarBackend::new(SidecarConfig {
            binary_path,
            timeout,
        })),
        None => RuntimeBackend::Unavailable {
            reason: "no backend binary found".to_string(),
        },
    }
}

pub fn resolve_binary_candidates(resource_dir: Option<&Path>) -> Vec<PathBuf> {
    let binary_name = default_binary_name();
    let mut candidates = Vec::<PathBuf>::new();

    if let Ok(override_path) = std::env::var(BACKEND_BIN_ENV_NAME) {
        let normalized = override_path.trim();
        if !normalized.is_empty() {
            candidates.push(PathBuf::from(normalized));
        }
    }

    candidates.push(PathBuf::from("resources/bin").join(binary_name));

    if let Some(resources) = resource_dir {
        candidates.push(resources.join("bin").join(binary_name));
        candidates.push(resources.join(binary_name));
    }

    candidates.push(PathBuf::from(binary_name));
    dedupe_paths(candidates)
}

/// First candidate that exists. A bare name only counts when a `PATH`
/// directory holds it; `stub` is always accepted.
pub fn resolve_binary_path(resource_dir: Option<&Path>) -> Option<PathBuf> {
    let search_path = std::env::var_os("PATH");
    first_existing(
        resolve_binary_candidates(resource_dir),
        search_path.as_deref(),
    )
}

fn first_existing(candidates: Vec<PathBuf>, search_path: Option<&OsStr>) -> Option<PathBuf> {
    candidates.into_iter().find(|candidate| {
        if candidate == Path::new(STUB_BACKEND_NAME) {
            return true;
        }
        if candidate.components().count() > 1 {
            return candidate.exists();
        }
        search_path
            .map(|paths| std::env::split_paths(paths).any(|dir| dir.join(candidate).is_file()))
            .unwrap_or(false)
    })
}

fn default_binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "parley-backend.exe"
    } else {
        "parley-backend"
    }
}

fn dedupe_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::<String>::new();
    paths
        .into_iter()
        .filter(|path| seen.insert(path.to_string_lossy().to_string()))
        .collect()
}
