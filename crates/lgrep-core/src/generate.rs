//! Text generation client for the query planner
//!
//! Speaks the Ollama `/api/generate` streaming protocol: one JSON object per
//! line, each carrying the next decoded piece of the completion.

use std::io::{BufRead, BufReader};
use std::ops::ControlFlow;
use std::time::Duration;

use serde::Deserialize;

use crate::{LgrepError, Result, config::PlannerConfig};

/// Produces a completion piece by piece under deterministic decoding.
pub trait Generator: Send + Sync {
    /// Feed decoded pieces of the completion of `prompt` to `on_token`.
    ///
    /// Stops when `on_token` breaks, the model finishes, or `max_tokens`
    /// pieces have been produced.
    fn generate(
        &self,
        prompt: &str,
        max_tokens: usize,
        on_token: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Client for an Ollama-compatible generation server.
pub struct OllamaGenerator {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
}

impl std::fmt::Debug for OllamaGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaGenerator")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OllamaGenerator {
    pub fn new(config: &PlannerConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| LgrepError::Generation(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

impl Generator for OllamaGenerator {
    fn generate(
        &self,
        prompt: &str,
        max_tokens: usize,
        on_token: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<()> {
        let url = format!("{}/api/generate", self.endpoint);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": true,
            "options": {
                "temperature": 0.0,
                "top_k": 1,
                "seed": 0,
                "num_predict": max_tokens,
            },
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| LgrepError::Generation(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(LgrepError::Generation(format!(
                "generation API error {status}: {text}"
            )));
        }

        let mut produced = 0;
        for line in BufReader::new(response).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let chunk: GenerateChunk = serde_json::from_str(&line)
                .map_err(|e| LgrepError::Generation(format!("bad stream line: {e}")))?;
            if let Some(error) = chunk.error {
                return Err(LgrepError::Generation(error));
            }

            if !chunk.response.is_empty() {
                produced += 1;
                if on_token(&chunk.response).is_break() || produced >= max_tokens {
                    break;
                }
            }
            if chunk.done {
                break;
            }
        }

        Ok(())
    }
}
