use serde::Serialize;

use crate::session::Backend;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Present,
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderCredential {
    pub backend: Backend,
    pub env_var: &'static str,
    pub state: CredentialState,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialHealth {
    pub os: String,
    pub providers: Vec<ProviderCredential>,
    pub notes: Vec<String>,
}

impl CredentialHealth {
    pub fn any_present(&self) -> bool {
        self.providers
            .iter()
            .any(|provider| provider.state == CredentialState::Present)
    }
}

pub fn credential_env_var(backend: Backend) -> &'static str {
    match backend {
        Backend::Claude => "ANTHROPIC_API_KEY",
        Backend::ChatGpt => "CHATGPTTOKEN",
        Backend::Gemini => "GOOGLE_GEMINI_API_KEY",
    }
}

/// Blank values count as missing.
pub fn credential_state(value: Option<&str>) -> CredentialState {
    match value {
        Some(raw) if !raw.trim().is_empty() => CredentialState::Present,
        _ => CredentialState::Missing,
    }
}

pub fn detect_credentials() -> CredentialHealth {
    credentials_from(|name| std::env::var(name).ok())
}

fn credentials_from(lookup: impl Fn(&str) -> Option<String>) -> CredentialHealth {
    let providers = [Backend::Claude, Backend::ChatGpt, Backend::Gemini]
        .into_iter()
        .map(|backend| {
            let env_var = credential_env_var(backend);
            ProviderCredential {
                backend,
                env_var,
                state: credential_state(lookup(env_var).as_deref()),
            }
        })
        .collect::<Vec<_>>();

    let notes = providers
        .iter()
        .filter(|provider| provider.state == CredentialState::Missing)
        .map(|provider| {
            format!(
                "{} requests will fail until {} is set for the backend process.",
                provider.backend.label(),
                provider.env_var
            )
        })
        .collect();

    CredentialHealth {
        os: std::env::consts::OS.to_string(),
        providers,
        notes,
    }
}
