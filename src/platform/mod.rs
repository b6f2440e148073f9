pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;

/// A message received from the platform, reduced to what the handlers read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Platform chat id the reply goes to
    pub chat_id: i64,
    /// Platform user id of the sender
    pub user_id: u64,
    /// Display name of the user
    pub user_name: String,
    /// The message text, absent for stickers, photos and the like
    pub text: Option<String>,
}

/// Outbound calls the bot makes against the messaging platform.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;

    /// Show the transient "typing…" indicator in a chat.
    async fn send_typing(&self, chat_id: i64) -> Result<()>;

    /// Ask the platform to push future updates to `url`.
    async fn set_webhook(&self, url: &Url) -> Result<()>;
}
