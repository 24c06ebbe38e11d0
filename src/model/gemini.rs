//! Gemini adapter over the Generative Language REST API.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use super::fault::{FaultCode, ModelFault};
use super::invoker::{ModelInvoker, ModelResponse};
use super::prompt::format_input;
use crate::checkpoint::Chunk;
use crate::config::ModelSettings;
use crate::error::EngineError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

const CLIENT_USER_AGENT: &str = concat!("chunkwise/", env!("CARGO_PKG_VERSION"));

/// Environment variable read by [`GeminiInvoker::from_env`].
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

const API_KEY_HEADER: &str = "x-goog-api-key";

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    total_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// GeminiInvoker
// ─────────────────────────────────────────────────────────────────────────────

/// Calls `models/{name}:generateContent` once per chunk.
///
/// The API key travels only in the request header and is never logged.
pub struct GeminiInvoker {
    http: reqwest::Client,
    endpoint: Url,
    api_key: SecretString,
    settings: ModelSettings,
}

impl std::fmt::Debug for GeminiInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiInvoker")
            .field("endpoint", &self.endpoint.path())
            .field("api_key", &"[REDACTED]")
            .field("model", &self.settings.name)
            .finish()
    }
}

impl GeminiInvoker {
    /// Builds an invoker for `settings.name` at `settings.base_url`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Backend` if the base URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(settings: ModelSettings, api_key: SecretString) -> Result<Self, EngineError> {
        let endpoint = build_endpoint(&settings.base_url, &settings.name)?;
        let http = build_http_client(Duration::from_secs(settings.timeout_secs))?;
        Ok(Self {
            http,
            endpoint,
            api_key,
            settings,
        })
    }

    /// Like [`new`](Self::new), reading the key from `GEMINI_API_KEY`.
    pub fn from_env(settings: ModelSettings) -> Result<Self, EngineError> {
        Self::from_env_var(settings, API_KEY_ENV)
    }

    pub fn from_env_var(settings: ModelSettings, var: &str) -> Result<Self, EngineError> {
        let key = std::env::var(var)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| EngineError::Config(format!("Environment variable {} is not set", var)))?;
        Self::new(settings, SecretString::from(key))
    }

    fn request_body<'a>(&self, input: &'a str) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: input }],
            }],
            generation_config: GenerationConfig {
                temperature: self.settings.temperature,
                top_k: self.settings.top_k,
                top_p: self.settings.top_p,
            },
        }
    }

    async fn generate(&self, prompt: &str, chunk: &Chunk) -> Result<ModelResponse, ModelFault> {
        let input = format_input(prompt, chunk);
        let body = self.request_body(&input);

        let start = Instant::now();
        let result = self
            .http
            .post(self.endpoint.as_str())
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&body)
            .send()
            .await;
        let duration_ms = start.elapsed().as_millis();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                info!("[GEMINI] POST {} FAILED {}ms", self.endpoint.path(), duration_ms);
                return Err(fault_for_transport(&e));
            }
        };

        let status = response.status();
        info!(
            "[GEMINI] POST {} {} {}ms",
            self.endpoint.path(),
            status.as_u16(),
            duration_ms
        );

        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&raw)
                .map(|env| env.error.message)
                .ok()
                .filter(|m| !m.is_empty());
            return Err(fault_for_status(status, message));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                fault_for_transport(&e)
            } else {
                ModelFault::new(
                    FaultCode::Other("invalid_response".into()),
                    "Response body is not a valid generateContent payload",
                )
            }
        })?;

        extract_response(parsed)
    }
}

impl ModelInvoker for GeminiInvoker {
    fn invoke<'a>(
        &'a self,
        prompt: &'a str,
        chunk: &'a Chunk,
    ) -> Pin<Box<dyn Future<Output = Result<ModelResponse, ModelFault>> + Send + 'a>> {
        Box::pin(self.generate(prompt, chunk))
    }

    fn model_version(&self) -> &str {
        &self.settings.name
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn build_endpoint(base_url: &str, model: &str) -> Result<Url, EngineError> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    let base = Url::parse(&base)
        .map_err(|_| EngineError::Backend(format!("Invalid model base URL: {}", base_url)))?;

    let model = model.trim().trim_start_matches("models/");
    if model.is_empty() || model.contains('/') {
        return Err(EngineError::Backend(format!("Invalid model name: {}", model)));
    }

    base.join(&format!("v1beta/models/{}:generateContent", model))
        .map_err(|_| EngineError::Backend(format!("Invalid model name: {}", model)))
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client, EngineError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| EngineError::Backend(format!("Failed to build HTTP client: {}", e)))
}

/// Maps a non-success HTTP status to a fault code.
fn fault_for_status(status: StatusCode, message: Option<String>) -> ModelFault {
    let code = match status.as_u16() {
        400 => FaultCode::InvalidArgument,
        401 => FaultCode::Unauthenticated,
        403 => FaultCode::PermissionDenied,
        409 => FaultCode::Aborted,
        429 => FaultCode::ResourceExhausted,
        500 => FaultCode::Internal,
        503 => FaultCode::ServiceUnavailable,
        504 => FaultCode::DeadlineExceeded,
        other => FaultCode::Other(format!("http_{}", other)),
    };
    let message = message.unwrap_or_else(|| {
        format!(
            "HTTP {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
        .trim_end()
        .to_string()
    });
    ModelFault::new(code, message)
}

/// Maps a transport error without echoing it (it may contain the URL).
fn fault_for_transport(err: &reqwest::Error) -> ModelFault {
    if err.is_timeout() {
        ModelFault::new(FaultCode::Timeout, "Request to the model service timed out")
    } else {
        ModelFault::new(
            FaultCode::Connection,
            "Connection to the model service failed",
        )
    }
}

fn extract_response(parsed: GenerateContentResponse) -> Result<ModelResponse, ModelFault> {
    let tokens_used = parsed
        .usage_metadata
        .map(|u| u.total_token_count)
        .unwrap_or(0);

    let texts: Vec<String> = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if texts.is_empty() {
        return Err(ModelFault::new(
            FaultCode::Other("empty_response".into()),
            "The model returned no text",
        ));
    }

    Ok(ModelResponse::new(texts.concat(), tokens_used))
}
