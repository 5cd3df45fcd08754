use crate::{
    BASE_UNITS_PER_TOKEN,
    aggregator::{DelegateAggregate, MonthBucket, MonthKey},
};
use html_escape::{encode_double_quoted_attribute, encode_text};
use serde::Deserialize;

/// How a delegate without a resolved name is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedNamePolicy {
    /// `0xAbCd..1234`
    #[default]
    Truncate,
    FullAddress,
}

impl UnresolvedNamePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "truncate" => Some(Self::Truncate),
            "full_address" | "full" => Some(Self::FullAddress),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub token_symbol: String,
    pub explorer_url: String,
    pub social_url: String,
    pub unresolved_name_policy: UnresolvedNamePolicy,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            token_symbol: "ENS".to_string(),
            explorer_url: "https://etherscan.io/address".to_string(),
            social_url: "https://x.com".to_string(),
            unresolved_name_policy: UnresolvedNamePolicy::default(),
        }
    }
}

/// One message of the report: a month header followed by its delegate lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportBlock {
    pub month: MonthKey,
    pub header: String,
    pub lines: Vec<String>,
}

impl ReportBlock {
    pub fn text(&self) -> String {
        format!("{}\n\n{}", self.header, self.lines.join("\n\n"))
    }
}

pub fn render(buckets: &[MonthBucket], options: &RenderOptions) -> Vec<ReportBlock> {
    buckets
        .iter()
        .filter(|bucket| !bucket.is_empty())
        .map(|bucket| ReportBlock {
            month: bucket.month,
            header: render_header(&bucket.month),
            lines: bucket
                .aggregates
                .iter()
                .map(|aggregate| render_delegate_line(aggregate, options))
                .collect(),
        })
        .collect()
}

pub fn render_header(month: &MonthKey) -> String {
    format!("======== {} =======", month.label())
}

pub fn render_delegate_line(aggregate: &DelegateAggregate, options: &RenderOptions) -> String {
    let display_name = if aggregate.identity.is_resolved() {
        aggregate.identity.display_name().to_string()
    } else {
        match options.unresolved_name_policy {
            UnresolvedNamePolicy::Truncate => truncate_address(&aggregate.delegate_address),
            UnresolvedNamePolicy::FullAddress => aggregate.delegate_address.clone(),
        }
    };

    let identity_link = link(
        &format!("{}/{}", options.explorer_url, aggregate.delegate_address),
        &display_name,
    );

    let social_section = aggregate
        .identity
        .social_handle()
        .map(|handle| format!(" | {}", link(&format!("{}/{}", options.social_url, handle), "X")))
        .unwrap_or_default();

    let sign = if aggregate.net_change < 0 { "-" } else { "+" };

    format!(
        "{identity_link}{social_section}\n{sign}{change} {symbol} → {power} total",
        change = format_tokens(aggregate.net_change.unsigned_abs()),
        symbol = options.token_symbol,
        power = format_tokens(aggregate.final_power),
    )
}

fn link(href: &str, text: &str) -> String {
    format!(
        "<a href=\"{}\">{}</a>",
        encode_double_quoted_attribute(href),
        encode_text(text)
    )
}

/// First 6 and last 4 characters joined by `..`. Short inputs are returned as-is.
pub fn truncate_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 10 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}..{tail}")
}

/// Base units to whole tokens, halves rounded up, with `,` thousands separators.
pub fn format_tokens(base_units: u128) -> String {
    let whole = base_units.saturating_add(BASE_UNITS_PER_TOKEN / 2) / BASE_UNITS_PER_TOKEN;
    group_thousands(whole)
}

fn group_thousands(value: u128) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}
