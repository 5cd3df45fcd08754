use anyhow::{Context, Result};
use dotenv::dotenv;
use reqwest::Client;
use std::{sync::Arc, time::Duration};
use tracing::{error, info};
use utils::{errors::HTTP_CLIENT_BUILD_FAILED, tracing::run_with_tracing};
use votingpower::{
    config,
    report::ReportService,
    telegram::{Bot, TelegramApi},
};

#[tokio::main]
async fn main() {
    dotenv().ok();
    run_with_tracing(run).await;
}

async fn run() -> Result<()> {
    info!("Voting power bot starting up");

    let config = config::load();
    let bot_token = config.telegram.bot_token()?;

    let service = Arc::new(ReportService::from_config(&config)?);

    // getUpdates holds the connection open for up to poll_timeout_secs
    let telegram_client = Client::builder()
        .timeout(Duration::from_secs(
            config.telegram.poll_timeout_secs + config.providers.request_timeout_secs,
        ))
        .build()
        .context(HTTP_CLIENT_BUILD_FAILED)?;
    let api = TelegramApi::new(telegram_client, &config.telegram.api_url, bot_token);

    let bot = Bot::new(
        api,
        service,
        config.telegram.site_url.clone(),
        config.telegram.poll_timeout_secs,
    );

    tokio::select! {
        result = bot.run() => {
            if let Err(e) = &result {
                error!(error = %e, error_chain = ?e, "Bot stopped unexpectedly");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully");
            Ok(())
        }
    }
}
