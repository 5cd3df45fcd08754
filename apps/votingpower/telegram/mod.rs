pub mod api;
pub mod bot;
pub mod models;

pub use api::{TelegramApi, TelegramChat};
pub use bot::Bot;
