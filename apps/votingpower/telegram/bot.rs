use super::{
    api::{TelegramApi, TelegramChat},
    models::{InlineKeyboardButton, InlineKeyboardMarkup, Update},
};
use crate::report::{DeliveryOptions, ReportService};
use anyhow::Result;
use html_escape::{encode_double_quoted_attribute, encode_text};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

pub const RECENT_CALLBACK: &str = "recent";
pub const RECENT_BUTTON_TEXT: &str = "📊 Recent Activity";
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Recent,
    Test,
}

/// Reads a leading bot command, accepting `/cmd@botname` as well as `/cmd`.
pub fn parse_command(text: &str) -> Option<Command> {
    let token = text.split_whitespace().next()?.strip_prefix('/')?;
    let name = token.split('@').next().unwrap_or(token);

    match name.to_ascii_lowercase().as_str() {
        "start" => Some(Command::Start),
        "recent" => Some(Command::Recent),
        "test" => Some(Command::Test),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Welcome {
        chat_id: i64,
    },
    Report {
        chat_id: i64,
        callback_query_id: Option<String>,
    },
    Echo {
        chat_id: i64,
    },
}

pub fn route_update(update: &Update) -> Option<Action> {
    if let Some(callback) = &update.callback_query {
        if callback.data.as_deref() != Some(RECENT_CALLBACK) {
            return None;
        }
        let chat_id = callback.message.as_ref()?.chat.id;
        return Some(Action::Report {
            chat_id,
            callback_query_id: Some(callback.id.clone()),
        });
    }

    let message = update.message.as_ref()?;
    let chat_id = message.chat.id;
    match parse_command(message.text.as_deref()?)? {
        Command::Start => Some(Action::Welcome { chat_id }),
        Command::Recent => Some(Action::Report {
            chat_id,
            callback_query_id: None,
        }),
        Command::Test => Some(Action::Echo { chat_id }),
    }
}

pub fn welcome_text(site_url: &str) -> String {
    let label = site_url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    format!(
        "Welcome to Voting Power Bot!\n\n🔗 <a href=\"{}\">{}</a>",
        encode_double_quoted_attribute(site_url),
        encode_text(label)
    )
}

pub fn recent_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![vec![InlineKeyboardButton {
            text: RECENT_BUTTON_TEXT.to_string(),
            callback_data: RECENT_CALLBACK.to_string(),
        }]],
    }
}

#[derive(Clone)]
pub struct Bot {
    api: TelegramApi,
    service: Arc<ReportService>,
    site_url: String,
    poll_timeout_secs: u64,
}

impl Bot {
    pub fn new(
        api: TelegramApi,
        service: Arc<ReportService>,
        site_url: String,
        poll_timeout_secs: u64,
    ) -> Self {
        Self {
            api,
            service,
            site_url,
            poll_timeout_secs,
        }
    }

    /// Long-polls for updates until the future is dropped. Every routed update
    /// is handled on its own task.
    pub async fn run(&self) -> Result<()> {
        info!(poll_timeout_secs = self.poll_timeout_secs, "Bot polling started");
        let mut offset: Option<i64> = None;

        loop {
            let updates = match self.api.get_updates(offset, self.poll_timeout_secs).await {
                Ok(updates) => updates,
                Err(e) => {
                    error!(error = %e, error_chain = ?e, "Polling for updates failed");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                offset = Some(update.update_id + 1);

                let Some(action) = route_update(&update) else {
                    continue;
                };

                let bot = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = bot.handle(action.clone()).await {
                        error!(action = ?action, error = %e, error_chain = ?e, "Failed to handle update");
                    }
                });
            }
        }
    }

    pub async fn handle(&self, action: Action) -> Result<()> {
        match action {
            Action::Welcome { chat_id } => {
                info!(chat_id, "Handling /start");
                self.api
                    .send_message(
                        chat_id,
                        &welcome_text(&self.site_url),
                        DeliveryOptions::html(),
                        Some(&recent_keyboard()),
                    )
                    .await?;
            }
            Action::Echo { chat_id } => {
                info!(chat_id, "Handling /test");
                self.api
                    .send_message(chat_id, "test", DeliveryOptions::plain(), None)
                    .await?;
            }
            Action::Report {
                chat_id,
                callback_query_id,
            } => {
                info!(chat_id, from_button = callback_query_id.is_some(), "Handling report request");
                if let Some(id) = callback_query_id {
                    if let Err(e) = self.api.answer_callback_query(&id).await {
                        warn!(error = %e, "Failed to acknowledge button press");
                    }
                }

                let chat = TelegramChat::new(self.api.clone(), chat_id);
                let summary = self.service.run(&chat).await?;
                info!(
                    chat_id,
                    final_state = ?summary.final_state(),
                    blocks_delivered = summary.blocks_delivered,
                    "Report request finished"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetchers::{EnsResolver, VotingPowerApi};
    use mockito::{Matcher, Server};
    use reqwest::Client;
    use serde_json::json;

    fn update(value: serde_json::Value) -> Update {
        serde_json::from_value(value).unwrap()
    }

    fn text_update(text: &str) -> Update {
        update(json!({
            "update_id": 1,
            "message": {"message_id": 3, "chat": {"id": 42}, "text": text}
        }))
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("/start"), Some(Command::Start));
        assert_eq!(parse_command("/recent@VotingPowerBot"), Some(Command::Recent));
        assert_eq!(parse_command("/TEST extra words"), Some(Command::Test));
        assert_eq!(parse_command("recent"), None);
        assert_eq!(parse_command("/help"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn test_route_messages() {
        assert_eq!(
            route_update(&text_update("/start")),
            Some(Action::Welcome { chat_id: 42 })
        );
        assert_eq!(
            route_update(&text_update("/recent")),
            Some(Action::Report {
                chat_id: 42,
                callback_query_id: None
            })
        );
        assert_eq!(
            route_update(&text_update("/test")),
            Some(Action::Echo { chat_id: 42 })
        );
        assert_eq!(route_update(&text_update("hello")), None);
        assert_eq!(route_update(&update(json!({"update_id": 2}))), None);
    }

    #[test]
    fn test_route_recent_button() {
        let pressed = update(json!({
            "update_id": 5,
            "callback_query": {"id": "cb-9", "data": "recent",
                "message": {"message_id": 3, "chat": {"id": 42}}}
        }));
        assert_eq!(
            route_update(&pressed),
            Some(Action::Report {
                chat_id: 42,
                callback_query_id: Some("cb-9".to_string())
            })
        );

        let other = update(json!({
            "update_id": 6,
            "callback_query": {"id": "cb-10", "data": "other",
                "message": {"message_id": 3, "chat": {"id": 42}}}
        }));
        assert_eq!(route_update(&other), None);
    }

    #[test]
    fn test_welcome_text() {
        assert_eq!(
            welcome_text("https://votingpower.xyz"),
            "Welcome to Voting Power Bot!\n\n🔗 <a href=\"https://votingpower.xyz\">votingpower.xyz</a>"
        );
    }

    fn bot_for(server: &Server) -> Bot {
        let client = Client::new();
        let service = ReportService::new(
            Arc::new(VotingPowerApi::new_with_endpoint(
                client.clone(),
                format!("{}/api/get-recent-activity", server.url()),
            )),
            Arc::new(EnsResolver::new_with_endpoint(
                client.clone(),
                format!("{}/address", server.url()),
            )),
        );
        Bot::new(
            TelegramApi::new(client, &server.url(), "TOKEN"),
            Arc::new(service),
            "https://votingpower.xyz".to_string(),
            0,
        )
    }

    fn sent(message_id: i64) -> String {
        json!({"ok": true, "result": {"message_id": message_id, "chat": {"id": 42}}}).to_string()
    }

    #[tokio::test]
    async fn test_welcome_sends_keyboard() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/botTOKEN/sendMessage")
            .match_body(Matcher::PartialJson(json!({
                "chat_id": 42,
                "parse_mode": "HTML",
                "reply_markup": {"inline_keyboard": [[{"text": "📊 Recent Activity", "callback_data": "recent"}]]}
            })))
            .with_status(200)
            .with_body(sent(1))
            .create_async()
            .await;

        bot_for(&server)
            .handle(Action::Welcome { chat_id: 42 })
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_button_report_with_feed_down_sends_notice() {
        let mut server = Server::new_async().await;
        let answer = server
            .mock("POST", "/botTOKEN/answerCallbackQuery")
            .match_body(Matcher::Json(json!({"callback_query_id": "cb-9"})))
            .with_status(200)
            .with_body(r#"{"ok":true,"result":true}"#)
            .create_async()
            .await;
        let feed = server
            .mock("GET", "/api/get-recent-activity")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        let progress = server
            .mock("POST", "/botTOKEN/sendMessage")
            .match_body(Matcher::PartialJson(json!({"text": "Fetching data..."})))
            .with_status(200)
            .with_body(sent(8))
            .create_async()
            .await;
        let cleared = server
            .mock("POST", "/botTOKEN/deleteMessage")
            .match_body(Matcher::Json(json!({"chat_id": 42, "message_id": 8})))
            .with_status(200)
            .with_body(r#"{"ok":true,"result":true}"#)
            .create_async()
            .await;
        let notice = server
            .mock("POST", "/botTOKEN/sendMessage")
            .match_body(Matcher::Json(json!({
                "chat_id": 42,
                "text": "Error fetching data.",
                "link_preview_options": {"is_disabled": true}
            })))
            .with_status(200)
            .with_body(sent(9))
            .create_async()
            .await;

        bot_for(&server)
            .handle(Action::Report {
                chat_id: 42,
                callback_query_id: Some("cb-9".to_string()),
            })
            .await
            .unwrap();

        answer.assert_async().await;
        feed.assert_async().await;
        progress.assert_async().await;
        cleared.assert_async().await;
        notice.assert_async().await;
    }
}
