//! Model alias catalog and remote model listing.
//!
//! The static table maps Cursor's short model names onto canonical entries
//! carrying context-window and max-output limits. Reasoning/effort variants
//! (`-thinking`, `-high`, `-codex*`) collapse onto their base entry.

use serde::Deserialize;
use serde_json::json;

const GET_USABLE_MODELS_PATH: &str = "/aiserver.v1.AiService/GetUsableModels";
const GET_DEFAULT_MODEL_PATH: &str = "/aiserver.v1.AiService/GetDefaultModelForCli";

const DEFAULT_CONTEXT_WINDOW: u32 = 128_000;
const DEFAULT_MAX_OUTPUT: u32 = 16_384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Context-window and output ceilings for one canonical model.
pub struct ModelLimits {
    pub context_window: u32,
    pub max_output: u32,
}

struct CatalogEntry {
    canonical: &'static str,
    limits: ModelLimits,
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        canonical: "sonnet-4.5",
        limits: ModelLimits {
            context_window: 200_000,
            max_output: 64_000,
        },
    },
    CatalogEntry {
        canonical: "opus-4.1",
        limits: ModelLimits {
            context_window: 200_000,
            max_output: 32_000,
        },
    },
    CatalogEntry {
        canonical: "haiku-4.5",
        limits: ModelLimits {
            context_window: 200_000,
            max_output: 64_000,
        },
    },
    CatalogEntry {
        canonical: "gpt-5.2",
        limits: ModelLimits {
            context_window: 272_000,
            max_output: 128_000,
        },
    },
    CatalogEntry {
        canonical: "gpt-5.1",
        limits: ModelLimits {
            context_window: 272_000,
            max_output: 128_000,
        },
    },
    CatalogEntry {
        canonical: "gemini-3-pro",
        limits: ModelLimits {
            context_window: 1_000_000,
            max_output: 64_000,
        },
    },
    CatalogEntry {
        canonical: "grok-4",
        limits: ModelLimits {
            context_window: 256_000,
            max_output: 64_000,
        },
    },
];

/// Collapses a short model name onto its catalog base: `sonnet-4.5-thinking`,
/// `gpt-5.2-high`, and `gpt-5.2-codex*` all share their base entry.
pub fn canonical_model_name(name: &str) -> &str {
    let mut base = name.trim();
    for suffix in ["-thinking", "-high"] {
        if let Some(stripped) = base.strip_suffix(suffix) {
            base = stripped;
        }
    }
    if let Some(position) = base.find("-codex") {
        base = &base[..position];
    }
    base
}

/// Limits for a requested model; unmapped names get the defaults.
pub fn resolve_model_limits(name: &str) -> ModelLimits {
    let base = canonical_model_name(name);
    CATALOG
        .iter()
        .find(|entry| entry.canonical == base)
        .map(|entry| entry.limits)
        .unwrap_or(ModelLimits {
            context_window: DEFAULT_CONTEXT_WINDOW,
            max_output: DEFAULT_MAX_OUTPUT,
        })
}

#[derive(Debug, Clone, Default)]
/// Static catalog view used by the `/v1/models` listing.
pub struct ModelCatalog;

impl ModelCatalog {
    pub fn model_ids() -> Vec<&'static str> {
        CATALOG.iter().map(|entry| entry.canonical).collect()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
/// One entry from `GetUsableModels`.
pub struct RemoteModel {
    #[serde(rename = "modelId")]
    pub model_id: String,
    #[serde(rename = "displayModelId", default)]
    pub display_model_id: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(rename = "displayNameShort", default)]
    pub display_name_short: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsableModelsResponse {
    #[serde(default)]
    models: Vec<RemoteModel>,
}

/// Lists the models usable by this account via the Connect JSON sidecar RPC.
pub async fn list_remote_models(
    client: &reqwest::Client,
    base_url: &str,
    headers: reqwest::header::HeaderMap,
) -> Result<Vec<RemoteModel>, crate::OpenAiAdapterError> {
    let url = format!(
        "{}{GET_USABLE_MODELS_PATH}",
        base_url.trim_end_matches('/')
    );
    let response = client
        .post(url)
        .headers(headers)
        .json(&json!({}))
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(crate::OpenAiAdapterError::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }
    let parsed: UsableModelsResponse = response.json().await?;
    Ok(parsed.models)
}

/// Asks the backend which model the CLI should default to.
pub async fn default_remote_model(
    client: &reqwest::Client,
    base_url: &str,
    headers: reqwest::header::HeaderMap,
) -> Result<Option<String>, crate::OpenAiAdapterError> {
    let url = format!(
        "{}{GET_DEFAULT_MODEL_PATH}",
        base_url.trim_end_matches('/')
    );
    let response = client
        .post(url)
        .headers(headers)
        .json(&json!({}))
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(crate::OpenAiAdapterError::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }
    let parsed: serde_json::Value = response.json().await?;
    Ok(parsed
        .get("defaultModel")
        .or_else(|| parsed.get("modelId"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string))
}
