//! Chat context and completion client

use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tiktoken_rs::{CoreBPE, cl100k_base};

use crate::config::{ChatConfig, SpeechConfig};
use crate::{Error, Result};

/// Tokens added per message for role and framing
const TOKENS_PER_MESSAGE: usize = 3;

/// Tokens priming every reply
const REPLY_PRIMING_TOKENS: usize = 3;

/// Encoder shared by the chat models the brain talks to
static CL100K: LazyLock<Option<CoreBPE>> = LazyLock::new(|| match cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::warn!(error = %e, "failed to load cl100k_base, estimating tokens from length");
        None
    }
});

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Capitalized name for the conversation log
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::System => "System",
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Count `text` in `cl100k_base` tokens
///
/// Falls back to four bytes per token if the encoder cannot be loaded.
#[must_use]
pub fn count_text_tokens(text: &str) -> usize {
    CL100K.as_ref().map_or_else(
        || text.len().div_ceil(4),
        |bpe| bpe.encode_with_special_tokens(text).len(),
    )
}

/// Token budget for one completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    /// Tokens reserved for the reply
    pub max_response_tokens: usize,
    /// Model context window
    pub token_limit: usize,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            max_response_tokens: 250,
            token_limit: 4096,
        }
    }
}

impl From<&ChatConfig> for TokenBudget {
    fn from(config: &ChatConfig) -> Self {
        Self {
            max_response_tokens: config.max_response_tokens,
            token_limit: config.token_limit,
        }
    }
}

/// Conversation history, always led by the system prompt
#[derive(Debug, Clone)]
pub struct ChatContext {
    messages: Vec<ChatMessage>,
}

impl ChatContext {
    #[must_use]
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system_prompt)],
        }
    }

    /// Start a context with the system prompt read from `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read
    pub fn from_prompt_file(path: &Path) -> Result<Self> {
        let prompt = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "failed to read system prompt {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self::new(prompt))
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Never true: the system prompt is always present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Remove the newest message, never the system prompt
    pub fn pop(&mut self) -> Option<ChatMessage> {
        if self.messages.len() > 1 {
            self.messages.pop()
        } else {
            None
        }
    }

    /// Prompt tokens including per-message framing and reply priming
    #[must_use]
    pub fn estimate_tokens(&self) -> usize {
        self.messages
            .iter()
            .map(|m| {
                TOKENS_PER_MESSAGE
                    + count_text_tokens(m.role.as_str())
                    + count_text_tokens(&m.content)
            })
            .sum::<usize>()
            + REPLY_PRIMING_TOKENS
    }

    const fn over_budget(tokens: usize, budget: TokenBudget) -> bool {
        tokens + budget.max_response_tokens >= budget.token_limit
    }

    /// Check that the system prompt alone leaves room for a turn and a reply
    ///
    /// # Errors
    ///
    /// Returns a config error if the system prompt fills the budget
    pub fn check_budget(&self, budget: TokenBudget) -> Result<()> {
        let prompt = Self {
            messages: self.messages.iter().take(1).cloned().collect(),
        };
        let tokens = prompt.estimate_tokens();
        if Self::over_budget(tokens, budget) {
            return Err(Error::Config(format!(
                "system prompt uses {tokens} tokens, leaving no room for {} reply tokens \
                 within the {} token limit",
                budget.max_response_tokens, budget.token_limit
            )));
        }
        Ok(())
    }

    /// Drop the oldest turns until the prompt plus reply fits the budget
    ///
    /// The system prompt and the newest message are never removed. Returns
    /// how many messages were dropped.
    ///
    /// # Errors
    ///
    /// Returns error if the system prompt and newest message alone exceed
    /// the budget; older turns are dropped either way
    pub fn trim(&mut self, budget: TokenBudget) -> Result<usize> {
        let mut removed = 0;
        while self.messages.len() > 2 && Self::over_budget(self.estimate_tokens(), budget) {
            self.messages.remove(1);
            removed += 1;
        }

        let tokens = self.estimate_tokens();
        if removed > 0 {
            tracing::debug!(
                removed,
                remaining = self.messages.len(),
                tokens,
                "trimmed chat context"
            );
        }

        if Self::over_budget(tokens, budget) {
            return Err(Error::Chat(format!(
                "context needs {tokens} tokens plus {} for the reply, over the {} token limit",
                budget.max_response_tokens, budget.token_limit
            )));
        }
        Ok(removed)
    }
}

/// Produces the assistant's reply to a conversation
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete the conversation
    ///
    /// # Errors
    ///
    /// Returns error if the completion fails
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: usize,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client
pub struct ChatClient {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    max_tokens: usize,
}

impl ChatClient {
    /// Create a chat client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: SecretString, chat: &ChatConfig, speech: &SpeechConfig) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("API key required for chat".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: speech.api_base.trim_end_matches('/').to_string(),
            model: chat.model.clone(),
            max_tokens: chat.max_response_tokens,
        })
    }
}

#[async_trait]
impl ChatModel for ChatClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
        };

        let start = std::time::Instant::now();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Chat(format!("API error {status}: {body}")));
        }

        let result: ChatCompletionResponse = response.json().await?;
        let reply = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Chat("no reply in completion".to_string()))?;

        tracing::info!(
            model = %self.model,
            elapsed_ms = start.elapsed().as_millis(),
            "chat completion received"
        );
        Ok(reply)
    }
}
