//! Month bucketing, per-delegate netting and the significance filter.
//!
//! Everything here is pure and works on request-scoped data. Ordering is
//! deterministic: months and delegates keep the order in which they first
//! appear in the feed.

use crate::{
    BASE_UNITS_PER_TOKEN,
    models::{events::EnrichedEvent, identity::Identity},
};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::collections::HashMap;

/// Calendar month of an event, taken in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn of(timestamp: &DateTime<Utc>) -> Self {
        Self {
            year: timestamp.year(),
            month: timestamp.month(),
        }
    }

    /// English month and year, e.g. "October 2025".
    pub fn label(&self) -> String {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .map(|date| date.format("%B %Y").to_string())
            .unwrap_or_else(|| format!("{}-{:02}", self.year, self.month))
    }
}

/// Minimum absolute net change, in base units, for a delegate to be reported.
/// The bound is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignificanceThreshold {
    min_base_units: u128,
}

impl SignificanceThreshold {
    pub fn from_tokens(tokens: u64) -> Self {
        Self {
            min_base_units: u128::from(tokens) * BASE_UNITS_PER_TOKEN,
        }
    }

    pub fn is_significant(&self, net_change: i128) -> bool {
        net_change.unsigned_abs() >= self.min_base_units
    }
}

impl Default for SignificanceThreshold {
    fn default() -> Self {
        Self::from_tokens(1000)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateAggregate {
    pub delegate_address: String,
    pub identity: Identity,
    /// Exact signed sum of every contributing change.
    pub net_change: i128,
    /// Power reported by the most recent contributing event.
    pub final_power: u128,
    pub final_power_at: DateTime<Utc>,
    /// Contributing events in feed order.
    pub events: Vec<EnrichedEvent>,
}

impl DelegateAggregate {
    fn new(event: EnrichedEvent) -> Self {
        Self {
            delegate_address: event.event.delegate_address.clone(),
            identity: event.delegate.clone(),
            net_change: event.event.voting_power_change,
            final_power: event.event.voting_power,
            final_power_at: event.event.block_timestamp,
            events: vec![event],
        }
    }

    fn absorb(&mut self, event: EnrichedEvent) {
        self.net_change = self.net_change.saturating_add(event.event.voting_power_change);

        // Strictly newer only: on equal timestamps the event seen first in the
        // newest-first feed keeps its power.
        if event.event.block_timestamp > self.final_power_at {
            self.final_power = event.event.voting_power;
            self.final_power_at = event.event.block_timestamp;
        }

        self.events.push(event);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthBucket {
    pub month: MonthKey,
    pub aggregates: Vec<DelegateAggregate>,
}

impl MonthBucket {
    fn new(month: MonthKey) -> Self {
        Self {
            month,
            aggregates: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }
}

/// Buckets events by month, then nets every delegate's changes inside each
/// bucket. Nothing is filtered.
pub fn group_by_month(events: Vec<EnrichedEvent>) -> Vec<MonthBucket> {
    let mut buckets: Vec<MonthBucket> = Vec::new();
    let mut bucket_index: HashMap<MonthKey, usize> = HashMap::new();
    let mut delegate_index: HashMap<(MonthKey, String), usize> = HashMap::new();

    for event in events {
        let month = MonthKey::of(&event.event.block_timestamp);
        let bucket_pos = *bucket_index.entry(month).or_insert_with(|| {
            buckets.push(MonthBucket::new(month));
            buckets.len() - 1
        });
        let bucket = &mut buckets[bucket_pos];

        let key = (month, event.event.delegate_address.clone());
        match delegate_index.get(&key) {
            Some(&pos) => bucket.aggregates[pos].absorb(event),
            None => {
                delegate_index.insert(key, bucket.aggregates.len());
                bucket.aggregates.push(DelegateAggregate::new(event));
            }
        }
    }

    buckets
}

/// Drops insignificant aggregates, then any month left empty.
pub fn filter_significant(
    buckets: Vec<MonthBucket>,
    threshold: &SignificanceThreshold,
) -> Vec<MonthBucket> {
    buckets
        .into_iter()
        .map(|mut bucket| {
            bucket
                .aggregates
                .retain(|aggregate| threshold.is_significant(aggregate.net_change));
            bucket
        })
        .filter(|bucket| !bucket.is_empty())
        .collect()
}

pub fn aggregate(
    events: Vec<EnrichedEvent>,
    threshold: &SignificanceThreshold,
) -> Vec<MonthBucket> {
    filter_significant(group_by_month(events), threshold)
}
