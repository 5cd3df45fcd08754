use crate::{
    aggregator::{self, SignificanceThreshold},
    config::BotConfig,
    errors::ReportError,
    fetchers::{ActivityFeed, EnsResolver, IdentityResolver, VotingPowerApi},
    models::{
        events::{EnrichedEvent, RawEvent},
        identity::Identity,
    },
    renderer::{self, RenderOptions, ReportBlock},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, error, info, instrument, warn};
use utils::errors::HTTP_CLIENT_BUILD_FAILED;

pub const DEFAULT_FAILURE_NOTICE: &str = "Error fetching data.";
pub const DEFAULT_RESOLVER_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportState {
    Idle,
    Fetching,
    Enriching,
    Aggregating,
    Rendering,
    Delivering,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOptions {
    pub rich_text: bool,
    pub disable_link_preview: bool,
}

impl DeliveryOptions {
    pub fn html() -> Self {
        Self {
            rich_text: true,
            disable_link_preview: true,
        }
    }

    pub fn plain() -> Self {
        Self {
            rich_text: false,
            disable_link_preview: true,
        }
    }
}

/// Where a report goes. One gateway instance addresses a single conversation.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    type ProgressHandle: Send;

    async fn show_progress(&self) -> Result<Self::ProgressHandle>;
    async fn clear_progress(&self, handle: Self::ProgressHandle) -> Result<()>;
    async fn deliver(&self, text: &str, options: DeliveryOptions) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    /// Every state the run passed through, ending in `Done` or `Failed`.
    pub states: Vec<ReportState>,
    pub blocks_delivered: usize,
}

impl ReportSummary {
    pub fn final_state(&self) -> ReportState {
        self.states.last().copied().unwrap_or(ReportState::Idle)
    }
}

struct StateTracker {
    states: Vec<ReportState>,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            states: vec![ReportState::Idle],
        }
    }

    fn advance(&mut self, next: ReportState) {
        debug!(from = ?self.states.last(), to = ?next, "Report state transition");
        self.states.push(next);
    }
}

pub struct ReportService {
    feed: Arc<dyn ActivityFeed>,
    resolver: Arc<dyn IdentityResolver>,
    threshold: SignificanceThreshold,
    render_options: RenderOptions,
    resolver_concurrency: usize,
    failure_notice: String,
}

impl ReportService {
    pub fn new(feed: Arc<dyn ActivityFeed>, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            feed,
            resolver,
            threshold: SignificanceThreshold::default(),
            render_options: RenderOptions::default(),
            resolver_concurrency: DEFAULT_RESOLVER_CONCURRENCY,
            failure_notice: DEFAULT_FAILURE_NOTICE.to_string(),
        }
    }

    pub fn from_config(config: &BotConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.providers.request_timeout_secs))
            .build()
            .context(HTTP_CLIENT_BUILD_FAILED)?;

        let feed = VotingPowerApi::new_with_endpoint(
            client.clone(),
            config.providers.activity_api_url.clone(),
        )
        .with_feed_threshold(config.providers.feed_threshold.clone())
        .with_max_events(config.providers.max_events);
        let resolver = EnsResolver::new_with_endpoint(client, config.providers.ens_api_url.clone());

        Ok(Self::new(Arc::new(feed), Arc::new(resolver))
            .with_threshold(SignificanceThreshold::from_tokens(
                config.report.significance_threshold,
            ))
            .with_render_options(config.report.render_options())
            .with_resolver_concurrency(config.providers.resolver_concurrency)
            .with_failure_notice(config.report.failure_notice.clone()))
    }

    pub fn with_threshold(mut self, threshold: SignificanceThreshold) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_render_options(mut self, render_options: RenderOptions) -> Self {
        self.render_options = render_options;
        self
    }

    pub fn with_resolver_concurrency(mut self, concurrency: usize) -> Self {
        self.resolver_concurrency = concurrency.max(1);
        self
    }

    pub fn with_failure_notice(mut self, failure_notice: String) -> Self {
        self.failure_notice = failure_notice;
        self
    }

    /// Fetches, enriches, aggregates and renders one report without touching
    /// any gateway.
    pub async fn build_report(&self) -> Result<Vec<ReportBlock>, ReportError> {
        let mut tracker = StateTracker::new();
        self.build_report_tracked(&mut tracker).await
    }

    async fn build_report_tracked(
        &self,
        tracker: &mut StateTracker,
    ) -> Result<Vec<ReportBlock>, ReportError> {
        tracker.advance(ReportState::Fetching);
        let events = self.feed.fetch_recent_activity().await?;

        tracker.advance(ReportState::Enriching);
        let enriched = self.enrich(events).await;

        tracker.advance(ReportState::Aggregating);
        let buckets = aggregator::aggregate(enriched, &self.threshold);

        tracker.advance(ReportState::Rendering);
        let blocks = renderer::render(&buckets, &self.render_options);

        info!(months = blocks.len(), "Report built");
        Ok(blocks)
    }

    /// Resolves every distinct address once, concurrently, and attaches the
    /// identities to the events. Feed order is preserved.
    pub async fn enrich(&self, events: Vec<RawEvent>) -> Vec<EnrichedEvent> {
        let addresses: Vec<String> = {
            let mut seen = HashSet::new();
            let mut addresses = Vec::new();
            for event in &events {
                let involved =
                    std::iter::once(&event.delegate_address).chain(event.delegator_address.as_ref());
                for address in involved {
                    if seen.insert(address.as_str()) {
                        addresses.push(address.clone());
                    }
                }
            }
            addresses
        };

        debug!(addresses = addresses.len(), "Resolving identities");

        let resolver = &self.resolver;
        let identities: HashMap<String, Identity> = stream::iter(addresses)
            .map(|address| async move {
                let identity = resolver.resolve(&address).await;
                (address, identity)
            })
            .buffer_unordered(self.resolver_concurrency)
            .collect()
            .await;

        let lookup = |address: &str| {
            identities
                .get(address)
                .cloned()
                .unwrap_or_else(|| Identity::unresolved(address))
        };

        events
            .into_iter()
            .map(|event| EnrichedEvent {
                delegate: lookup(&event.delegate_address),
                delegator: event.delegator_address.as_deref().map(lookup),
                event,
            })
            .collect()
    }

    /// Runs one report end to end against a gateway. Report failures end in
    /// `Failed` with a notice delivered; only gateway delivery errors are
    /// returned as `Err`.
    #[instrument(name = "report_run", skip_all)]
    pub async fn run<G: MessagingGateway>(&self, gateway: &G) -> Result<ReportSummary> {
        let mut tracker = StateTracker::new();

        let progress = match gateway.show_progress().await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Failed to show progress indicator");
                None
            }
        };

        let outcome = self.build_report_tracked(&mut tracker).await;

        if let Some(handle) = progress {
            if let Err(e) = gateway.clear_progress(handle).await {
                warn!(error = %e, "Failed to clear progress indicator");
            }
        }

        let blocks = match outcome {
            Ok(blocks) => blocks,
            Err(e) => {
                error!(error = %e, "Report generation failed");
                tracker.advance(ReportState::Failed);
                gateway
                    .deliver(&self.failure_notice, DeliveryOptions::plain())
                    .await?;
                return Ok(ReportSummary {
                    states: tracker.states,
                    blocks_delivered: 0,
                });
            }
        };

        tracker.advance(ReportState::Delivering);
        let mut blocks_delivered = 0;
        for block in &blocks {
            gateway
                .deliver(&block.text(), DeliveryOptions::html())
                .await
                .with_context(|| format!("Failed to deliver report for {}", block.month.label()))?;
            blocks_delivered += 1;
        }

        tracker.advance(ReportState::Done);
        info!(blocks_delivered, "Report delivered");

        Ok(ReportSummary {
            states: tracker.states,
            blocks_delivered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BASE_UNITS_PER_TOKEN;
    use chrono::DateTime;
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    const MARCH_20: i64 = 1_710_892_800;

    fn raw(delegate: &str, delegator: Option<&str>, tokens: i128) -> RawEvent {
        RawEvent {
            delegate_address: delegate.to_string(),
            delegator_address: delegator.map(str::to_string),
            voting_power_change: tokens * BASE_UNITS_PER_TOKEN as i128,
            voting_power: 10_000 * BASE_UNITS_PER_TOKEN,
            block_timestamp: DateTime::from_timestamp(MARCH_20, 0).unwrap(),
        }
    }

    struct StaticFeed(Vec<RawEvent>);

    #[async_trait]
    impl ActivityFeed for StaticFeed {
        async fn fetch_recent_activity(&self) -> Result<Vec<RawEvent>, ReportError> {
            Ok(self.0.clone())
        }
    }

    struct FailingFeed;

    #[async_trait]
    impl ActivityFeed for FailingFeed {
        async fn fetch_recent_activity(&self) -> Result<Vec<RawEvent>, ReportError> {
            Err(ReportError::ProviderUnavailable("down".to_string()))
        }
    }

    /// Slower for addresses ending in `a`, so completion order differs from
    /// request order.
    struct SlowResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityResolver for SlowResolver {
        async fn resolve(&self, address: &str) -> Identity {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = if address.ends_with('a') { 30 } else { 1 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if address.starts_with("0xnamed") {
                Identity::Resolved {
                    name: format!("{address}.eth"),
                    social_handle: None,
                }
            } else {
                Identity::unresolved(address)
            }
        }
    }

    #[derive(Default)]
    struct RecordingGateway {
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessagingGateway for RecordingGateway {
        type ProgressHandle = u32;

        async fn show_progress(&self) -> Result<u32> {
            self.log.lock().unwrap().push("show".to_string());
            Ok(7)
        }

        async fn clear_progress(&self, handle: u32) -> Result<()> {
            self.log.lock().unwrap().push(format!("clear:{handle}"));
            Ok(())
        }

        async fn deliver(&self, text: &str, options: DeliveryOptions) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("deliver:{}:{text}", options.rich_text));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_enrich_matches_identities_by_address_and_keeps_order() {
        let resolver = Arc::new(SlowResolver {
            calls: AtomicUsize::new(0),
        });
        let service = ReportService::new(Arc::new(StaticFeed(Vec::new())), resolver.clone());

        let events = vec![
            raw("0xnamed-a", Some("0xdelegator-b"), 1),
            raw("0xplain-b", None, 2),
            raw("0xnamed-a", Some("0xdelegator-a"), 3),
        ];
        let enriched = service.enrich(events.clone()).await;

        assert_eq!(enriched.len(), 3);
        for (original, enriched) in events.iter().zip(&enriched) {
            assert_eq!(original, &enriched.event);
        }
        assert_eq!(enriched[0].delegate.display_name(), "0xnamed-a.eth");
        assert_eq!(
            enriched[0].delegator,
            Some(Identity::unresolved("0xdelegator-b"))
        );
        assert_eq!(enriched[1].delegate, Identity::unresolved("0xplain-b"));
        assert_eq!(enriched[1].delegator, None);
        assert_eq!(
            enriched[2].delegator,
            Some(Identity::unresolved("0xdelegator-a"))
        );

        // each distinct address resolved once
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_run_delivers_blocks_after_clearing_progress() {
        let service = ReportService::new(
            Arc::new(StaticFeed(vec![
                raw("0xnamed-a", None, 600),
                raw("0xnamed-a", None, 500),
                raw("0xplain-b", None, 10),
            ])),
            Arc::new(SlowResolver {
                calls: AtomicUsize::new(0),
            }),
        );
        let gateway = RecordingGateway::default();

        let summary = service.run(&gateway).await.unwrap();

        assert_eq!(summary.blocks_delivered, 1);
        assert_eq!(
            summary.states,
            vec![
                ReportState::Idle,
                ReportState::Fetching,
                ReportState::Enriching,
                ReportState::Aggregating,
                ReportState::Rendering,
                ReportState::Delivering,
                ReportState::Done,
            ]
        );

        let log = gateway.log.lock().unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0], "show");
        assert_eq!(log[1], "clear:7");
        assert!(log[2].starts_with("deliver:true:======== March 2024 ======="));
        assert!(log[2].contains("0xnamed-a.eth"));
        assert!(log[2].contains("+1,100 ENS → 10,000 total"));
        assert!(!log[2].contains("0xplain-b"));
    }

    #[tokio::test]
    async fn test_run_with_nothing_significant_delivers_nothing() {
        let service = ReportService::new(
            Arc::new(StaticFeed(vec![raw("0xplain-b", None, 500)])),
            Arc::new(SlowResolver {
                calls: AtomicUsize::new(0),
            }),
        );
        let gateway = RecordingGateway::default();

        let summary = service.run(&gateway).await.unwrap();

        assert_eq!(summary.blocks_delivered, 0);
        assert_eq!(summary.final_state(), ReportState::Done);
        assert_eq!(*gateway.log.lock().unwrap(), vec!["show", "clear:7"]);
    }

    #[tokio::test]
    async fn test_run_failure_clears_progress_and_sends_notice() {
        let service = ReportService::new(
            Arc::new(FailingFeed),
            Arc::new(SlowResolver {
                calls: AtomicUsize::new(0),
            }),
        );
        let gateway = RecordingGateway::default();

        let summary = service.run(&gateway).await.unwrap();

        assert_eq!(
            summary.states,
            vec![ReportState::Idle, ReportState::Fetching, ReportState::Failed]
        );
        assert_eq!(
            *gateway.log.lock().unwrap(),
            vec!["show", "clear:7", "deliver:false:Error fetching data."]
        );
    }
}
