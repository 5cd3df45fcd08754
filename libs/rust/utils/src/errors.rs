//env
pub const TELEGRAM_BOT_TOKEN_NOT_SET: &str = "TELEGRAM_BOT_TOKEN not set!";

//config
pub const CONFIG_PARSE_FAILED: &str = "Failed to parse config";
pub const HTTP_CLIENT_BUILD_FAILED: &str = "Failed to build HTTP client";

//bot
pub const SEND_MESSAGE_FAILED: &str = "Failed to send message";
pub const DELETE_MESSAGE_FAILED: &str = "Failed to delete message";
pub const ANSWER_CALLBACK_FAILED: &str = "Failed to answer callback query";
pub const POLL_UPDATES_FAILED: &str = "Failed to poll updates";
