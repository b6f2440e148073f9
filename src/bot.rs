use std::sync::Arc;

use anyhow::Result;
use reqwest::Url;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::corrector::{CorrectionError, GrammarClient};
use crate::platform::{IncomingMessage, Messenger};

const NOTIFY_SENT: &str = "Notificación enviada al admin.";
const NOTIFY_FAILED: &str = "Error: No se pudo enviar el mensaje al admin.";
const STARTUP_NOTICE: &str = "✅ ¡Bot iniciado y en línea! Este es un mensaje de prueba.";

/// Telegram caps messages at 4096 characters.
const MAX_MESSAGE_LEN: usize = 4000;

/// Which handler an incoming message goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `/start`
    Start,
    /// `/notify`
    Notify,
    /// Plain text to send through the grammar service
    Correct(String),
    /// Unknown commands and messages without text
    Ignore,
}

impl Route {
    /// Commands are matched case-insensitively. A `@mention` suffix must name
    /// this bot; while the bot's username is unknown only bare commands match.
    pub fn classify(msg: &IncomingMessage, bot_username: Option<&str>) -> Route {
        let Some(text) = msg.text.as_deref() else {
            return Route::Ignore;
        };

        if let Some(command) = text.strip_prefix('/') {
            // "/start@my_bot extra" -> ("start", Some("my_bot"))
            let word = command.split_whitespace().next().unwrap_or_default();
            let (name, mention) = match word.split_once('@') {
                Some((name, mention)) => (name, Some(mention)),
                None => (word, None),
            };
            if let Some(mention) = mention {
                if !bot_username.is_some_and(|own| own.eq_ignore_ascii_case(mention)) {
                    return Route::Ignore;
                }
            }
            return match name.to_lowercase().as_str() {
                "start" => Route::Start,
                "notify" => Route::Notify,
                _ => Route::Ignore,
            };
        }

        if text.trim().is_empty() {
            Route::Ignore
        } else {
            Route::Correct(text.to_string())
        }
    }
}

fn greeting(user_name: &str, chat_id: i64) -> String {
    format!(
        "¡Hola {user_name}!\n\n\
         Envíame cualquier texto y yo lo corregiré (gramática y ortografía) \
         y lo traduciré a inglés americano estándar.\n\n\
         Tu `chat_id` es: {chat_id}\n"
    )
}

/// Split long messages for Telegram's length limit, preferring newline or
/// space boundaries.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

fn admin_notice(user_name: &str) -> String {
    format!(
        "¡Hola Admin! El usuario {} acaba de usar el comando /notify.",
        user_name
    )
}

/// Routes messages to their handlers. Built once at startup and shared
/// read-only between requests.
pub struct Router {
    messenger: Arc<dyn Messenger>,
    grammar: GrammarClient,
    admin_chat_id: i64,
    public_url: Url,
    bot_username: Option<String>,
}

impl Router {
    pub fn new(config: &Config, messenger: Arc<dyn Messenger>, grammar: GrammarClient) -> Self {
        Self {
            messenger,
            grammar,
            admin_chat_id: config.telegram.admin_chat_id,
            public_url: config.server.public_url.clone(),
            bot_username: None,
        }
    }

    /// Accept `/command@username` mentions addressed to this bot.
    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = Some(username.into());
        self
    }

    /// Handle one message. Errors are failed replies to the sender; handler
    /// failures are already answered in the chat.
    pub async fn dispatch(&self, msg: IncomingMessage) -> Result<()> {
        match Route::classify(&msg, self.bot_username.as_deref()) {
            Route::Start => self.greet(&msg).await,
            Route::Notify => self.notify_admin(&msg).await,
            Route::Correct(text) => self.correct(&msg, &text).await,
            Route::Ignore => {
                debug!(chat_id = msg.chat_id, "No handler for message");
                Ok(())
            }
        }
    }

    async fn greet(&self, msg: &IncomingMessage) -> Result<()> {
        info!(
            "User {} (ID: {}) started a chat. Chat_ID is: {}",
            msg.user_name, msg.user_id, msg.chat_id
        );
        self.messenger
            .send_text(msg.chat_id, &greeting(&msg.user_name, msg.chat_id))
            .await
    }

    async fn notify_admin(&self, msg: &IncomingMessage) -> Result<()> {
        info!(
            admin_chat_id = self.admin_chat_id,
            "Command /notify triggered by {}", msg.user_name
        );

        let reply = match self
            .messenger
            .send_text(self.admin_chat_id, &admin_notice(&msg.user_name))
            .await
        {
            Ok(()) => NOTIFY_SENT,
            Err(e) => {
                error!(
                    admin_chat_id = self.admin_chat_id,
                    "Failed to send message to admin: {:#}", e
                );
                NOTIFY_FAILED
            }
        };

        self.messenger.send_text(msg.chat_id, reply).await
    }

    async fn correct(&self, msg: &IncomingMessage, text: &str) -> Result<()> {
        let chat_id = msg.chat_id;
        info!(chat_id, "Received text for correction");

        if let Err(e) = self.messenger.send_typing(chat_id).await {
            warn!(chat_id, "Failed to send typing indicator: {:#}", e);
        }

        let reply = match self.grammar.correct(text).await {
            Ok(corrected) => corrected,
            Err(err) => {
                self.log_correction_failure(chat_id, &err);
                err.user_message()
            }
        };

        self.send_reply(chat_id, &reply).await
    }

    /// Send a reply in Telegram-sized chunks. If a chunk is rejected the chat
    /// gets the unexpected-error message rather than nothing.
    async fn send_reply(&self, chat_id: i64, reply: &str) -> Result<()> {
        for chunk in split_message(reply, MAX_MESSAGE_LEN) {
            if let Err(e) = self.messenger.send_text(chat_id, &chunk).await {
                error!(chat_id, "Failed to send correction reply: {:#}", e);
                let fallback = CorrectionError::Unexpected(format!("{:#}", e)).user_message();
                return self.messenger.send_text(chat_id, &fallback).await;
            }
        }
        Ok(())
    }

    fn log_correction_failure(&self, chat_id: i64, err: &CorrectionError) {
        let endpoint = self.grammar.endpoint();
        match err {
            CorrectionError::Timeout => {
                error!(chat_id, %endpoint, "Grammar request timed out")
            }
            CorrectionError::Transport(detail) => {
                error!(chat_id, %endpoint, "Grammar request failed: {}", detail)
            }
            CorrectionError::Api { status, message } => error!(
                chat_id,
                %endpoint,
                status = status.as_u16(),
                "Grammar API error: {}",
                message
            ),
            CorrectionError::Unexpected(detail) => {
                error!(chat_id, %endpoint, "Unexpected correction failure: {}", detail)
            }
        }
    }

    /// Point the platform at this deployment, then tell the admin chat.
    /// A failed admin notice does not fail the registration.
    pub async fn register_webhook(&self) -> Result<Url> {
        self.messenger.set_webhook(&self.public_url).await?;
        info!("Webhook set to {}", self.public_url);

        let notice = format!("Webhook configurado exitosamente en: {}", self.public_url);
        if let Err(e) = self.messenger.send_text(self.admin_chat_id, &notice).await {
            warn!(
                admin_chat_id = self.admin_chat_id,
                "Failed to notify admin about webhook: {:#}", e
            );
        }

        Ok(self.public_url.clone())
    }

    /// Tell the admin chat the bot is online. Failure is only logged.
    pub async fn announce_startup(&self) {
        match self
            .messenger
            .send_text(self.admin_chat_id, STARTUP_NOTICE)
            .await
        {
            Ok(()) => info!(admin_chat_id = self.admin_chat_id, "Startup notice sent"),
            Err(e) => error!(
                admin_chat_id = self.admin_chat_id,
                "Failed to send startup notice: {:#}. Has the admin started a chat with the bot?",
                e
            ),
        }
    }
}
