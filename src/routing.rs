use serde::Serialize;

use crate::backend::BackendCommand;
use crate::config::ImageSize;
use crate::session::{Backend, ModelTier};
use crate::status;

pub const ALL_HISTORY: &str = "/all";
pub const IMAGE_MARKER: &str = "/image";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputRoute {
    FetchAllHistory,
    GenerateImage { prompt: String },
    Chat { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("{}", status::EMPTY_MESSAGE)]
    EmptyMessage,
}

/// Slash commands are matched on the effective text: `/all` only as the whole
/// input, `/image` anywhere (first occurrence removed, spacing kept as-is).
pub fn classify_input(text: &str) -> InputRoute {
    if text == ALL_HISTORY {
        return InputRoute::FetchAllHistory;
    }

    if text.contains(IMAGE_MARKER) {
        return InputRoute::GenerateImage {
            prompt: text.replacen(IMAGE_MARKER, "", 1),
        };
    }

    InputRoute::Chat {
        text: text.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoutedRequest {
    FetchAllHistory,
    GenerateImage {
        prompt: String,
    },
    ChatCompletion {
        backend: Backend,
        model_tier: ModelTier,
        text: String,
        image: Option<String>,
    },
}

impl RoutedRequest {
    pub fn to_command(&self, image_size: ImageSize) -> BackendCommand {
        match self {
            RoutedRequest::FetchAllHistory => BackendCommand::FetchAllHistory,
            RoutedRequest::GenerateImage { prompt } => BackendCommand::GenerateImage {
                size: image_size,
                prompt: prompt.clone(),
            },
            RoutedRequest::ChatCompletion {
                backend,
                model_tier,
                text,
                image,
            } => BackendCommand::ChatCompletion {
                backend: *backend,
                model_tier: *model_tier,
                text: text.clone(),
                image: image.clone(),
            },
        }
    }

    /// Echo of the question shown above the answer once the request settles.
    pub fn query_heading(&self) -> String {
        match self {
            RoutedRequest::FetchAllHistory => status::query_heading("historical messages: "),
            RoutedRequest::GenerateImage { prompt } => status::query_heading(prompt),
            RoutedRequest::ChatCompletion { text, .. } => {
                status::query_heading(&format!("Q: {text}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_history_needs_exact_match() {
        assert_eq!(classify_input("/all"), InputRoute::FetchAllHistory);
        assert_eq!(
            classify_input("show /all"),
            InputRoute::Chat {
                text: "show /all".to_string()
            }
        );
    }

    #[test]
    fn image_marker_is_removed_once_keeping_spaces() {
        assert_eq!(
            classify_input("describe this /image of a cat"),
            InputRoute::GenerateImage {
                prompt: "describe this  of a cat".to_string()
            }
        );
        assert_eq!(
            classify_input("/image a /image b"),
            InputRoute::GenerateImage {
                prompt: " a /image b".to_string()
            }
        );
    }

    #[test]
    fn plain_text_routes_to_chat() {
        assert_eq!(
            classify_input("hello"),
            InputRoute::Chat {
                text: "hello".to_string()
            }
        );
    }

    #[test]
    fn headings_follow_route_kind() {
        let chat = RoutedRequest::ChatCompletion {
            backend: Backend::Claude,
            model_tier: ModelTier::Performance,
            text: "why?".to_string(),
            image: None,
        };
        assert_eq!(chat.query_heading(), "<h2 class=\"line_wrap\">Q: why?</h2>\n");
        assert_eq!(
            RoutedRequest::FetchAllHistory.query_heading(),
            "<h2 class=\"line_wrap\">historical messages: </h2>\n"
        );
    }

    #[test]
    fn image_route_carries_configured_size() {
        let routed = RoutedRequest::GenerateImage {
            prompt: "a cat".to_string(),
        };
        assert_eq!(
            routed.to_command(ImageSize::Landscape),
            BackendCommand::GenerateImage {
                size: ImageSize::Landscape,
                prompt: "a cat".to_string()
            }
        );
    }
}
