use crate::{
    errors::ReportError,
    models::events::{RawEvent, RecentActivityResponse},
};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, instrument, warn};

pub const ACTIVITY_API_ENDPOINT: &str = "https://votingpower.xyz/api/get-recent-activity";
/// 1000 tokens in base units; the feed only returns changes at least this large.
pub const DEFAULT_FEED_THRESHOLD: &str = "1000000000000000000000";
pub const DEFAULT_MAX_EVENTS: usize = 20;

/// Source of recent delegation power changes, newest first.
#[async_trait]
pub trait ActivityFeed: Send + Sync {
    async fn fetch_recent_activity(&self) -> Result<Vec<RawEvent>, ReportError>;
}

/// Client for the votingpower.xyz recent-activity endpoint.
#[derive(Clone)]
pub struct VotingPowerApi {
    client: Client,
    endpoint: String,
    feed_threshold: String,
    max_events: usize,
}

impl VotingPowerApi {
    pub fn new_with_endpoint(client: Client, endpoint: String) -> Self {
        Self {
            client,
            endpoint,
            feed_threshold: DEFAULT_FEED_THRESHOLD.to_string(),
            max_events: DEFAULT_MAX_EVENTS,
        }
    }

    pub fn with_feed_threshold(mut self, feed_threshold: impl Into<String>) -> Self {
        self.feed_threshold = feed_threshold.into();
        self
    }

    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }
}

#[async_trait]
impl ActivityFeed for VotingPowerApi {
    #[instrument(name = "fetch_recent_activity", skip(self), fields(endpoint = %self.endpoint))]
    async fn fetch_recent_activity(&self) -> Result<Vec<RawEvent>, ReportError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("threshold", self.feed_threshold.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = body, "Activity feed request failed");
            return Err(ReportError::ProviderUnavailable(format!(
                "activity feed returned HTTP {status}"
            )));
        }

        let body = response.text().await?;
        let parsed: RecentActivityResponse = serde_json::from_str(&body)?;
        let total = parsed.data.len();

        let events = parsed
            .data
            .into_iter()
            .take(self.max_events)
            .map(RawEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        info!(received = total, kept = events.len(), "Fetched recent activity");
        debug!(events = ?events, "Recent activity events");

        Ok(events)
    }
}
