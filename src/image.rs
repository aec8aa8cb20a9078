use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::config::AppSettings;
use crate::error::ImageError;

const SUPPORTED_MEDIA_TYPES: [&str; 2] = ["image/png", "image/jpeg"];

/// A pasted image, kept as the `data:` URL the webview produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedImage {
    data_url: String,
    media_type: String,
}

impl StagedImage {
    pub fn parse(data_url: &str) -> Result<Self, ImageError> {
        let rest = data_url
            .strip_prefix("data:")
            .ok_or(ImageError::NotDataUrl)?;
        let (media_type, payload) = rest
            .split_once(";base64,")
            .ok_or(ImageError::NotDataUrl)?;

        if !SUPPORTED_MEDIA_TYPES.contains(&media_type) {
            return Err(ImageError::UnsupportedMediaType(media_type.to_string()));
        }

        STANDARD
            .decode(payload)
            .map_err(|error| ImageError::InvalidBase64(error.to_string()))?;

        Ok(Self {
            data_url: data_url.to_string(),
            media_type: media_type.to_string(),
        })
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn into_data_url(self) -> String {
        self.data_url
    }
}

/// Scales `(width, height)` down to fit the box, keeping the aspect ratio.
/// Images already inside the box are returned unchanged.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 || (width <= max_width && height <= max_height) {
        return (width, height);
    }

    let (width, height) = (u64::from(width), u64::from(height));
    let (max_width, max_height) = (u64::from(max_width), u64::from(max_height));

    // Compare the two scale ratios by cross-multiplying to stay in integers.
    let (scaled_width, scaled_height) = if width * max_height >= height * max_width {
        (max_width, height * max_width / width)
    } else {
        (width * max_height / height, max_height)
    };
    (scaled_width.max(1) as u32, scaled_height.max(1) as u32)
}

/// Size a pasted image is redrawn at before it is staged.
pub fn fit_pasted(width: u32, height: u32, settings: &AppSettings) -> (u32, u32) {
    fit_within(
        width,
        height,
        settings.max_image_width,
        settings.max_image_height,
    )
}
