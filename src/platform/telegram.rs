use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, UpdateKind};
use tracing::{error, info, warn};

use crate::bot::Router;
use crate::config::TelegramConfig;
use crate::platform::{IncomingMessage, Messenger};

impl IncomingMessage {
    /// Project a Telegram update onto the fields the handlers use. Updates
    /// that carry no new message (edits, callbacks, …) yield `None`.
    pub fn from_update(update: &Update) -> Option<Self> {
        match &update.kind {
            UpdateKind::Message(msg) => Self::from_message(msg),
            _ => None,
        }
    }

    pub fn from_message(msg: &Message) -> Option<Self> {
        let user = msg.from.as_ref()?;
        Some(Self {
            chat_id: msg.chat.id.0,
            user_id: user.id.0,
            user_name: user.first_name.clone(),
            text: msg.text().map(str::to_string),
        })
    }
}

/// Bot API client backed by teloxide.
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(config: &TelegramConfig) -> Self {
        let bot = Bot::new(&config.bot_token);
        let bot = match &config.api_url {
            Some(url) => bot.set_api_url(url.clone()),
            None => bot,
        };
        Self { bot }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .with_context(|| format!("Failed to send message to chat {}", chat_id))?;
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .await
            .with_context(|| format!("Failed to send chat action to chat {}", chat_id))?;
        Ok(())
    }

    async fn set_webhook(&self, url: &Url) -> Result<()> {
        self.bot
            .set_webhook(url.clone())
            .await
            .with_context(|| format!("Failed to set webhook to {}", url))?;
        Ok(())
    }
}

/// Run the bot with long polling instead of the webhook server. Announces
/// itself to the admin chat first.
pub async fn run_polling(router: Arc<Router>, bot: Bot) -> Result<()> {
    info!("Starting Telegram long polling...");

    router.announce_startup().await;

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![router])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(msg: Message, router: Arc<Router>) -> ResponseResult<()> {
    let Some(incoming) = IncomingMessage::from_message(&msg) else {
        return Ok(());
    };

    let chat_id = incoming.chat_id;
    if let Err(e) = router.dispatch(incoming).await {
        error!(chat_id, "Failed to handle message: {:#}", e);
    }

    Ok(())
}
