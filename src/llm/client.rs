use crate::core::config::LlmConfig;
use crate::errors::{AgentError, Result};
use crate::llm::LanguageModel;
use crate::utils::screenshot::to_base64;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Client for OpenAI-compatible `/chat/completions` endpoints
#[derive(Clone)]
pub struct ChatCompletionClient {
    client: Client,
    config: LlmConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Plain text for a prompt alone, content parts when an image rides along.
    fn user_content(prompt: &str, image: Option<&[u8]>) -> Value {
        match image {
            None => Value::String(prompt.to_string()),
            Some(png) => json!([
                { "type": "text", "text": prompt },
                {
                    "type": "image_url",
                    "image_url": { "url": format!("data:image/png;base64,{}", to_base64(png)) }
                }
            ]),
        }
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionClient {
    async fn complete(&self, prompt: &str, image: Option<&[u8]>) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: Self::user_content(prompt, image),
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        debug!(model = %self.config.model, prompt_chars = prompt.len(), with_image = image.is_some(), "requesting completion");

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() {
                AgentError::Llm(format!("cannot connect to {}", self.config.base_url))
            } else if e.is_timeout() {
                AgentError::Timeout(format!(
                    "completion exceeded {}s",
                    self.config.timeout_secs
                ))
            } else {
                AgentError::from(e)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentError::Llm(format!("API error ({}): {}", status, error_text)));
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AgentError::Llm("completion had no content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_is_sent_as_data_url() {
        let content = ChatCompletionClient::user_content("describe", Some(b"png"));
        assert_eq!(content[0]["text"], "describe");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,cG5n");
        assert_eq!(ChatCompletionClient::user_content("hi", None), json!("hi"));
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let config = LlmConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..LlmConfig::default()
        };
        let client = ChatCompletionClient::new(config).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");
    }
}
