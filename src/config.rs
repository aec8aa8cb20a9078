use serde::{Deserialize, Serialize};

use crate::session::{Backend, ModelTier};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImageSize {
    /// 1024x1024
    Square,
    /// 1792x1024
    Landscape,
    /// 1024x1792
    Portrait,
}

impl ImageSize {
    /// Numeric size flag understood by the image-generation command.
    pub fn flag(self) -> u8 {
        match self {
            ImageSize::Square => 1,
            ImageSize::Landscape => 2,
            ImageSize::Portrait => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppSettings {
    #[serde(default = "default_speech_locale")]
    pub speech_locale: String,
    #[serde(default = "default_backend")]
    pub default_backend: Backend,
    #[serde(default = "default_model_tier")]
    pub default_model_tier: ModelTier,
    #[serde(default = "default_image_size")]
    pub image_size: ImageSize,
    #[serde(default = "default_max_image_edge")]
    pub max_image_width: u32,
    #[serde(default = "default_max_image_edge")]
    pub max_image_height: u32,
    #[serde(default)]
    pub backend_binary: Option<String>,
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
}

fn default_speech_locale() -> String {
    "ja".to_string()
}

fn default_backend() -> Backend {
    Backend::Claude
}

fn default_model_tier() -> ModelTier {
    ModelTier::Performance
}

fn default_image_size() -> ImageSize {
    ImageSize::Square
}

fn default_max_image_edge() -> u32 {
    512
}

fn default_backend_timeout_secs() -> u64 {
    120
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            speech_locale: default_speech_locale(),
            default_backend: default_backend(),
            default_model_tier: default_model_tier(),
            image_size: default_image_size(),
            max_image_width: default_max_image_edge(),
            max_image_height: default_max_image_edge(),
            backend_binary: None,
            backend_timeout_secs: default_backend_timeout_secs(),
        }
    }
}
