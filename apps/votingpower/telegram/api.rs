use super::models::{
    AnswerCallbackQueryRequest, DeleteMessageRequest, GetUpdatesRequest, InlineKeyboardMarkup,
    LinkPreviewOptions, Message, SendMessageRequest, TelegramResponse, Update,
};
use crate::report::{DeliveryOptions, MessagingGateway};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, instrument};
use utils::errors::{
    ANSWER_CALLBACK_FAILED, DELETE_MESSAGE_FAILED, POLL_UPDATES_FAILED, SEND_MESSAGE_FAILED,
};

pub const PROGRESS_TEXT: &str = "Fetching data...";

const ALLOWED_UPDATES: &[&str] = &["message", "callback_query"];

/// Thin client over the Telegram Bot HTTP API.
///
/// The bot token is part of every request URL, so request errors are stripped
/// of their URL before they are returned and nothing here logs a URL.
#[derive(Clone)]
pub struct TelegramApi {
    client: Client,
    base_url: String,
}

impl TelegramApi {
    pub fn new(client: Client, api_url: &str, bot_token: &str) -> Self {
        Self {
            client,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), bot_token),
        }
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, method);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| anyhow!("Telegram {method} request failed: {}", e.without_url()))?;

        let status = response.status();
        let parsed: TelegramResponse<T> = response
            .json()
            .await
            .map_err(|e| anyhow!("Invalid Telegram {method} response ({status}): {}", e.without_url()))?;

        if !parsed.ok {
            bail!(
                "Telegram {method} rejected ({}): {}",
                parsed.error_code.unwrap_or_else(|| i64::from(status.as_u16())),
                parsed.description.unwrap_or_default()
            );
        }

        parsed
            .result
            .with_context(|| format!("Telegram {method} returned no result"))
    }

    pub async fn get_updates(&self, offset: Option<i64>, timeout_secs: u64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &GetUpdatesRequest {
                offset,
                timeout: timeout_secs,
                allowed_updates: ALLOWED_UPDATES,
            },
        )
        .await
        .context(POLL_UPDATES_FAILED)
    }

    #[instrument(skip(self, text, keyboard), fields(len = text.len()))]
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        options: DeliveryOptions,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message> {
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: options.rich_text.then_some("HTML"),
            link_preview_options: options
                .disable_link_preview
                .then_some(LinkPreviewOptions { is_disabled: true }),
            reply_markup: keyboard,
        };

        let message: Message = self
            .call("sendMessage", &request)
            .await
            .context(SEND_MESSAGE_FAILED)?;
        debug!(message_id = message.message_id, "Message sent");
        Ok(message)
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let _: bool = self
            .call(
                "deleteMessage",
                &DeleteMessageRequest {
                    chat_id,
                    message_id,
                },
            )
            .await
            .context(DELETE_MESSAGE_FAILED)?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, callback_query_id: &str) -> Result<()> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &AnswerCallbackQueryRequest { callback_query_id },
            )
            .await
            .context(ANSWER_CALLBACK_FAILED)?;
        Ok(())
    }
}

/// One Telegram chat seen as a report destination.
#[derive(Clone)]
pub struct TelegramChat {
    api: TelegramApi,
    chat_id: i64,
}

impl TelegramChat {
    pub fn new(api: TelegramApi, chat_id: i64) -> Self {
        Self { api, chat_id }
    }
}

#[async_trait]
impl MessagingGateway for TelegramChat {
    /// Id of the "Fetching data..." message.
    type ProgressHandle = i64;

    async fn show_progress(&self) -> Result<i64> {
        let message = self
            .api
            .send_message(self.chat_id, PROGRESS_TEXT, DeliveryOptions::plain(), None)
            .await?;
        Ok(message.message_id)
    }

    async fn clear_progress(&self, handle: i64) -> Result<()> {
        self.api.delete_message(self.chat_id, handle).await
    }

    async fn deliver(&self, text: &str, options: DeliveryOptions) -> Result<()> {
        self.api
            .send_message(self.chat_id, text, options, None)
            .await
            .map(|_| ())
    }
}
