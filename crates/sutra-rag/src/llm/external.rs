//! OpenAI-compatible HTTP chat provider.
//!
//! The original deployment talks to DashScope's OpenAI-compatible mode; any
//! endpoint speaking the `/chat/completions` protocol works, including a
//! local Ollama.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::stream::StreamExt;
use reqwest::Client;
use serde_json::json;
use tokio::sync::mpsc;

use super::{ChatMessage, ChatModel, ChatRole, GenerationConfig, ProviderInfo, TokenStream};

pub struct OpenAiCompatible {
    endpoint: String,
    api_key: String,
    model: String,
    client: Client,
}

impl OpenAiCompatible {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(std::time::Duration::from_secs(300))
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    /// Parse a response body as JSON, returning a clear error if the server returned HTML.
    async fn parse_json_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body from {}: {}", endpoint, e))?;
        let trimmed = body.trim_start();
        if trimmed.starts_with('<') || trimmed.starts_with("<!") {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(anyhow!(
                "Endpoint {} returned HTML instead of JSON (HTTP {}) - service may be down. Response: {}",
                endpoint, status, preview
            ));
        }
        serde_json::from_str::<T>(&body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            anyhow!("Failed to parse JSON from {} (HTTP {}): {}. Body: {}", endpoint, status, e, preview)
        })
    }

    fn request_body(&self, messages: &[ChatMessage], config: &GenerationConfig, stream: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        ChatRole::System => "system",
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
            "stream": stream,
        });
        if !config.stop_sequences.is_empty() {
            body["stop"] = json!(config.stop_sequences);
        }
        body
    }

    fn map_send_error(endpoint: &str, e: reqwest::Error) -> anyhow::Error {
        if e.is_timeout() {
            anyhow!("Request to {} timed out - check network connectivity", endpoint)
        } else if e.is_connect() {
            anyhow!("Failed to connect to {} - check network/firewall/proxy: {}", endpoint, e)
        } else {
            anyhow!("Request to {} failed: {}", endpoint, e)
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatible {
    async fn complete(&self, messages: &[ChatMessage], config: &GenerationConfig) -> Result<String> {
        let request = self.request_body(messages, config, false);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::map_send_error(&self.endpoint, e))?;

        let body: serde_json::Value = Self::parse_json_response(response, &self.endpoint).await?;

        if let Some(error) = body.get("error") {
            return Err(anyhow!("API error from {}: {}", self.endpoint, error));
        }

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("No content in response from {}", self.endpoint))
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<TokenStream> {
        let request = self.request_body(messages, config, true);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::map_send_error(&self.endpoint, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(300).collect();
            return Err(anyhow!("Streaming request to {} failed (HTTP {}): {}", self.endpoint, status, preview));
        }

        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(error = %e, "LLM stream interrupted");
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE frames are newline-delimited `data: {...}` lines.
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);

                    let Some(payload) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if payload == "[DONE]" {
                        return;
                    }
                    if let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) {
                        if let Some(token) = value["choices"][0]["delta"]["content"].as_str() {
                            if !token.is_empty() && tx.send(token.to_string()).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(TokenStream::new(rx))
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "openai-compatible".to_string(),
            model: self.model.clone(),
            context_window: 32768,
            supports_streaming: true,
        }
    }
}
