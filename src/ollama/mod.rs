#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Lines};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::RagError;
use crate::config::OllamaConfig;
use crate::embeddings::Embedder;
use crate::generation::{FragmentIter, LanguageModel};

const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Blocking client for a local Ollama server, used both for embeddings and
/// for answer generation
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    embedding_model: String,
    generation_model: String,
    batch_size: u32,
    temperature: f32,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

/// A complete response, or one line of a streamed one
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
    pub details: Option<ModelDetails>,
}

#[derive(Debug, Deserialize)]
pub struct ModelDetails {
    pub format: Option<String>,
    pub family: Option<String>,
    pub parameter_size: Option<String>,
    pub quantization_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .build()
            .into();

        Ok(Self {
            base_url,
            embedding_model: config.embedding_model.clone(),
            generation_model: config.generation_model.clone(),
            batch_size: config.batch_size,
            temperature: config.temperature,
            agent,
            retry_attempts: config.retry_attempts.max(1),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Check the server answers and that both configured models are pulled
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let version = self.ping().context("Server ping failed")?;
        self.validate_models().context("Model validation failed")?;

        info!(
            "Health check passed for Ollama {} at {} (embedding: {}, generation: {})",
            version, self.base_url, self.embedding_model, self.generation_model
        );
        Ok(())
    }

    /// Ping the server, returning its version
    #[inline]
    pub fn ping(&self) -> Result<String> {
        let url = self
            .base_url
            .join("/api/version")
            .context("Failed to build ping URL")?;

        debug!("Pinging Ollama server at {}", url);

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to ping Ollama server")?;

        let version: VersionResponse =
            serde_json::from_str(&response_text).context("Failed to parse version response")?;

        debug!("Server ping successful, version {}", version.version);
        Ok(version.version)
    }

    /// Validate that the configured models are available
    #[inline]
    pub fn validate_models(&self) -> Result<()> {
        let models = self.list_models().context("Failed to list models")?;

        let missing: Vec<&str> = [&self.embedding_model, &self.generation_model]
            .into_iter()
            .filter(|wanted| !models.iter().any(|m| model_matches(&m.name, wanted)))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            debug!("All configured models are available");
            return Ok(());
        }

        let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        warn!(
            "Models {:?} not found. Available models: {:?}",
            missing, available_models
        );
        Err(anyhow::anyhow!(
            "Models {:?} are not available. Available models: {:?}",
            missing,
            available_models
        ))
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Generate embeddings for multiple texts, `batch_size` texts per request
    #[inline]
    pub fn generate_embeddings_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());

        for (batch_index, chunk) in texts.chunks(self.batch_size.max(1) as usize).enumerate() {
            let batch_results = self
                .generate_embeddings_single_batch(chunk)
                .with_context(|| {
                    format!(
                        "Failed to process batch {} of {} texts",
                        batch_index,
                        chunk.len()
                    )
                })?;

            results.extend(batch_results);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    fn generate_embeddings_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.embedding_model,
            input: texts,
        };

        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;

        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embeddings")?;

        let response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        if response.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            ));
        }

        Ok(response.embeddings)
    }

    /// Generate a complete answer in one request
    #[inline]
    pub fn generate_text(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let (url, request_json) = self.generate_request(prompt, max_tokens, false)?;

        debug!(
            "Generating answer with {} (prompt: {} chars, max tokens: {})",
            self.generation_model,
            prompt.chars().count(),
            max_tokens
        );

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate answer")?;

        let response: GenerateResponse =
            serde_json::from_str(&response_text).context("Failed to parse generate response")?;

        if let Some(message) = response.error {
            return Err(anyhow::anyhow!("Ollama reported an error: {}", message));
        }

        Ok(response.response)
    }

    /// Start a streamed generation. Fragments are read from the response
    /// body as they arrive; dropping the stream closes the connection.
    #[inline]
    pub fn generate_stream(&self, prompt: &str, max_tokens: u32) -> Result<GenerationStream> {
        let (url, request_json) = self.generate_request(prompt, max_tokens, true)?;

        debug!(
            "Streaming answer with {} (prompt: {} chars, max tokens: {})",
            self.generation_model,
            prompt.chars().count(),
            max_tokens
        );

        let response = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
            })
            .context("Failed to start answer stream")?;

        let reader = BufReader::new(response.into_body().into_reader());
        Ok(GenerationStream {
            lines: reader.lines(),
            finished: false,
        })
    }

    fn generate_request(&self, prompt: &str, max_tokens: u32, stream: bool) -> Result<(Url, String)> {
        let url = self
            .base_url
            .join("/api/generate")
            .context("Failed to build generate URL")?;

        let request = GenerateRequest {
            model: &self.generation_model,
            prompt,
            stream,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: max_tokens,
            },
        };

        let request_json =
            serde_json::to_string(&request).context("Failed to serialize generate request")?;

        Ok((url, request_json))
    }

    fn make_request_with_retry<T, F>(&self, mut request_fn: F) -> Result<T>
    where
        F: FnMut() -> Result<T, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response);
                }
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                        let delay = Duration::from_millis(delay_ms);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

/// `nomic-embed-text` matches the `nomic-embed-text:latest` tag Ollama reports
fn model_matches(available: &str, wanted: &str) -> bool {
    available == wanted
        || (!wanted.contains(':') && available.strip_suffix(":latest") == Some(wanted))
}

/// Fragments of a streamed `/api/generate` response, one JSON object per line
pub struct GenerationStream {
    lines: Lines<BufReader<ureq::BodyReader<'static>>>,
    finished: bool,
}

impl Iterator for GenerationStream {
    type Item = crate::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(RagError::ModelUnavailable(format!(
                        "Answer stream interrupted: {}",
                        e
                    ))));
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            let chunk: GenerateResponse = match serde_json::from_str(&line) {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(RagError::ModelUnavailable(format!(
                        "Malformed stream line: {}",
                        e
                    ))));
                }
            };

            if let Some(message) = chunk.error {
                self.finished = true;
                return Some(Err(RagError::ModelUnavailable(message)));
            }

            self.finished = chunk.done;
            if !chunk.response.is_empty() {
                return Some(Ok(chunk.response));
            }
        }

        None
    }
}

impl Embedder for OllamaClient {
    fn model_id(&self) -> &str {
        &self.embedding_model
    }

    fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        self.generate_embeddings_batch(texts)
            .map_err(|e| RagError::EmbeddingUnavailable(format!("{:#}", e)))
    }
}

impl LanguageModel for OllamaClient {
    fn model_id(&self) -> &str {
        &self.generation_model
    }

    fn generate(&self, prompt: &str, max_tokens: u32) -> crate::Result<String> {
        self.generate_text(prompt, max_tokens)
            .map_err(|e| RagError::ModelUnavailable(format!("{:#}", e)))
    }

    fn stream(&self, prompt: &str, max_tokens: u32) -> crate::Result<FragmentIter> {
        let stream = self
            .generate_stream(prompt, max_tokens)
            .map_err(|e| RagError::ModelUnavailable(format!("{:#}", e)))?;
        Ok(Box::new(stream))
    }
}
