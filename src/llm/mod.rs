//! Language-model completion seam.

pub mod client;

use crate::errors::Result;
use async_trait::async_trait;

pub use client::ChatCompletionClient;

/// Text completion, optionally grounded on a PNG screenshot.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str, image: Option<&[u8]>) -> Result<String>;
}
