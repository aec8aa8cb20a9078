use crate::config::{AppSettings, ImageSize};
use crate::session::{Backend, ModelTier};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppSettingsPatch {
    pub speech_locale: Option<String>,
    pub default_backend: Option<Backend>,
    pub default_model_tier: Option<ModelTier>,
    pub image_size: Option<ImageSize>,
    pub backend_binary: Option<Option<String>>,
    pub backend_timeout_secs: Option<u64>,
}

pub fn default_settings_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("parley-chat").join("settings.json")
}

pub fn load_or_default(path: &Path) -> AppSettings {
    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str::<AppSettings>(&contents).unwrap_or_default(),
        Err(_) => AppSettings::default(),
    }
}

pub fn save(path: &Path, settings: &AppSettings) -> Result<(), String> {
    let parent = path
        .parent()
        .ok_or_else(|| "settings path has no parent directory".to_string())?;
    fs::create_dir_all(parent).map_err(io_to_string)?;
    let contents = serde_json::to_string_pretty(settings).map_err(|error| error.to_string())?;
    fs::write(path, contents).map_err(io_to_string)
}

pub fn apply_patch(settings: &AppSettings, patch: AppSettingsPatch) -> AppSettings {
    AppSettings {
        speech_locale: patch
            .speech_locale
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| settings.speech_locale.clone()),
        default_backend: patch.default_backend.unwrap_or(settings.default_backend),
        default_model_tier: patch
            .default_model_tier
            .unwrap_or(settings.default_model_tier),
        image_size: patch.image_size.unwrap_or(settings.image_size),
        max_image_width: settings.max_image_width,
        max_image_height: settings.max_image_height,
        backend_binary: patch
            .backend_binary
            .map(|value| {
                value
                    .map(|path| path.trim().to_string())
                    .filter(|path| !path.is_empty())
            })
            .unwrap_or_else(|| settings.backend_binary.clone()),
        backend_timeout_secs: patch
            .backend_timeout_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(settings.backend_timeout_secs),
    }
}

fn io_to_string(error: io::Error) -> String {
    error.to_string()
}
