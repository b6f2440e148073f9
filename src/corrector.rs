use anyhow::{Context, Result};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GrammarConfig;

const EMPTY_RESPONSE: &str = "API returned an empty or invalid response.";

#[derive(Debug, Serialize)]
struct CorrectionRequest<'a> {
    text: &'a str,
}

/// Body returned by the correction endpoint, on success or failure.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CorrectionResponse {
    #[serde(default)]
    corrected_text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Why a correction call failed. Variants are ordered by classification
/// priority: a timed-out connect is a `Timeout`, not a `Transport` error.
#[derive(Debug, thiserror::Error)]
pub enum CorrectionError {
    #[error("request to the grammar endpoint timed out")]
    Timeout,
    #[error("could not reach the grammar endpoint: {0}")]
    Transport(String),
    #[error("grammar endpoint returned {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("{0}")]
    Unexpected(String),
}

impl CorrectionError {
    /// The reply sent to the chat for this failure.
    pub fn user_message(&self) -> String {
        match self {
            CorrectionError::Timeout => {
                "Error: El servicio de corrección tardó mucho en responder. Inténtalo de nuevo."
                    .to_string()
            }
            CorrectionError::Transport(_) => {
                "Error: No se pudo conectar con el servicio de corrección.".to_string()
            }
            CorrectionError::Api { message, .. } => format!("Error al corregir: {}", message),
            CorrectionError::Unexpected(detail) => {
                format!("Ha ocurrido un error inesperado: {}", detail)
            }
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CorrectionError::Timeout
        } else if err.is_connect() || err.is_request() {
            CorrectionError::Transport(err.to_string())
        } else {
            CorrectionError::Unexpected(err.to_string())
        }
    }

    /// Reading the body as text does no decoding of our own, so anything but
    /// a timeout here is the connection failing mid-response.
    fn from_body_read(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CorrectionError::Timeout
        } else {
            CorrectionError::Transport(err.to_string())
        }
    }
}

/// Client for the external grammar-correction endpoint. One POST per call,
/// never retried.
#[derive(Debug, Clone)]
pub struct GrammarClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl GrammarClient {
    pub fn new(config: &GrammarConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .context("Failed to build grammar HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn correct(&self, text: &str) -> Result<String, CorrectionError> {
        debug!(endpoint = %self.endpoint, chars = text.chars().count(), "Sending text for correction");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&CorrectionRequest { text })
            .send()
            .await
            .map_err(CorrectionError::from_reqwest)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(CorrectionError::from_body_read)?;

        if !status.is_success() {
            let message = serde_json::from_str::<CorrectionResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| {
                    if body.trim().is_empty() {
                        status.canonical_reason().unwrap_or_default().to_string()
                    } else {
                        body
                    }
                });
            return Err(CorrectionError::Api { status, message });
        }

        let parsed: CorrectionResponse = serde_json::from_str(&body).map_err(|e| {
            CorrectionError::Unexpected(format!("invalid JSON from grammar endpoint: {}", e))
        })?;

        // Telegram rejects blank messages, so whitespace-only counts as empty.
        parsed
            .corrected_text
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| CorrectionError::Unexpected(EMPTY_RESPONSE.to_string()))
    }
}
