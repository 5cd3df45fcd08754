use crate::{
    fetchers::{
        activity::{ACTIVITY_API_ENDPOINT, DEFAULT_FEED_THRESHOLD, DEFAULT_MAX_EVENTS},
        ens::ENS_API_ENDPOINT,
    },
    renderer::{RenderOptions, UnresolvedNamePolicy},
    report::{DEFAULT_FAILURE_NOTICE, DEFAULT_RESOLVER_CONCURRENCY},
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::{env, fmt, fs, path::Path};
use tracing::{info, warn};
use utils::errors::{CONFIG_PARSE_FAILED, TELEGRAM_BOT_TOKEN_NOT_SET};

pub const CONFIG_PATH_ENV: &str = "VOTINGPOWER_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "votingpower.yaml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BotConfig {
    pub telegram: TelegramConfig,
    pub providers: ProvidersConfig,
    pub report: ReportConfig,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Only ever read from `TELEGRAM_BOT_TOKEN`.
    #[serde(skip)]
    pub bot_token: Option<String>,
    pub api_url: String,
    pub poll_timeout_secs: u64,
    pub site_url: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_url: "https://api.telegram.org".to_string(),
            poll_timeout_secs: 30,
            site_url: "https://votingpower.xyz".to_string(),
        }
    }
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("site_url", &self.site_url)
            .finish()
    }
}

impl TelegramConfig {
    pub fn bot_token(&self) -> Result<&str> {
        self.bot_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .context(TELEGRAM_BOT_TOKEN_NOT_SET)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub activity_api_url: String,
    /// Minimum change the feed should return, in base units.
    pub feed_threshold: String,
    pub max_events: usize,
    pub ens_api_url: String,
    pub request_timeout_secs: u64,
    pub resolver_concurrency: usize,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            activity_api_url: ACTIVITY_API_ENDPOINT.to_string(),
            feed_threshold: DEFAULT_FEED_THRESHOLD.to_string(),
            max_events: DEFAULT_MAX_EVENTS,
            ens_api_url: ENS_API_ENDPOINT.to_string(),
            request_timeout_secs: 10,
            resolver_concurrency: DEFAULT_RESOLVER_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Whole tokens.
    pub significance_threshold: u64,
    pub token_symbol: String,
    pub explorer_url: String,
    pub social_url: String,
    pub unresolved_name_policy: UnresolvedNamePolicy,
    pub failure_notice: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        let render = RenderOptions::default();
        Self {
            significance_threshold: 1000,
            token_symbol: render.token_symbol,
            explorer_url: render.explorer_url,
            social_url: render.social_url,
            unresolved_name_policy: render.unresolved_name_policy,
            failure_notice: DEFAULT_FAILURE_NOTICE.to_string(),
        }
    }
}

impl ReportConfig {
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            token_symbol: self.token_symbol.clone(),
            explorer_url: self.explorer_url.trim_end_matches('/').to_string(),
            social_url: self.social_url.trim_end_matches('/').to_string(),
            unresolved_name_policy: self.unresolved_name_policy,
        }
    }
}

impl BotConfig {
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).context(CONFIG_PARSE_FAILED)
    }
}

/// Reads the YAML file named by `VOTINGPOWER_CONFIG_PATH` (falling back to
/// defaults when it is missing or invalid) and applies environment overrides.
pub fn load() -> BotConfig {
    let path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = load_file(Path::new(&path));

    apply_env_overrides(&mut config);

    info!(
        activity_api_url = %config.providers.activity_api_url,
        ens_api_url = %config.providers.ens_api_url,
        max_events = config.providers.max_events,
        significance_threshold = config.report.significance_threshold,
        unresolved_name_policy = ?config.report.unresolved_name_policy,
        bot_token_set = config.telegram.bot_token.is_some(),
        "Bot config loaded"
    );

    config
}

fn load_file(path: &Path) -> BotConfig {
    match fs::read_to_string(path) {
        Ok(contents) => match BotConfig::from_yaml_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                warn!(error = ?err, path = %path.display(), "Failed to parse bot config, using defaults");
                BotConfig::default()
            }
        },
        Err(err) => {
            warn!(error = %err, path = %path.display(), "Bot config not found, using defaults");
            BotConfig::default()
        }
    }
}

fn apply_env_overrides(config: &mut BotConfig) {
    if let Ok(value) = env::var("TELEGRAM_BOT_TOKEN") {
        config.telegram.bot_token = Some(value.trim().to_string());
    }

    if let Ok(value) = env::var("TELEGRAM_API_URL") {
        config.telegram.api_url = value;
    }

    if let Ok(value) = env::var("ACTIVITY_API_URL") {
        config.providers.activity_api_url = value;
    }

    if let Ok(value) = env::var("ENS_API_URL") {
        config.providers.ens_api_url = value;
    }

    if let Ok(value) = env::var("MAX_EVENTS") {
        match value.parse::<usize>() {
            Ok(max_events) => config.providers.max_events = max_events,
            Err(err) => warn!(error = %err, "Failed to parse MAX_EVENTS override"),
        }
    }

    if let Ok(value) = env::var("REQUEST_TIMEOUT_SECS") {
        match value.parse::<u64>() {
            Ok(secs) => config.providers.request_timeout_secs = secs,
            Err(err) => warn!(error = %err, "Failed to parse REQUEST_TIMEOUT_SECS override"),
        }
    }

    if let Ok(value) = env::var("SIGNIFICANCE_THRESHOLD") {
        match value.parse::<u64>() {
            Ok(tokens) => config.report.significance_threshold = tokens,
            Err(err) => warn!(error = %err, "Failed to parse SIGNIFICANCE_THRESHOLD override"),
        }
    }

    if let Ok(value) = env::var("UNRESOLVED_NAME_POLICY") {
        match UnresolvedNamePolicy::parse(&value) {
            Some(policy) => config.report.unresolved_name_policy = policy,
            None => warn!(value = %value, "Unknown UNRESOLVED_NAME_POLICY override"),
        }
    }
}
