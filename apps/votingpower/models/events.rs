use crate::{BASE_UNITS_PER_TOKEN, errors::MalformedEventError, models::identity::Identity};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Upper bound for any single amount, 10^18 whole tokens. Keeps netted sums
/// and rounding far away from the i128/u128 limits.
pub const MAX_ABS_BASE_UNITS: u128 = BASE_UNITS_PER_TOKEN * BASE_UNITS_PER_TOKEN;

/// Response of the recent-activity endpoint. Records are kept as raw JSON so
/// that the recency window is applied before any record is validated.
#[derive(Debug, Deserialize)]
pub struct RecentActivityResponse {
    pub data: Vec<Value>,
}

/// One record of the activity feed as it appears on the wire. Amounts arrive
/// either as decimal strings or as JSON integers.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivityRecord {
    pub delegate_address: String,
    #[serde(default)]
    pub delegator_address: Option<String>,
    pub voting_power_change: Value,
    pub voting_power: Value,
    pub block_timestamp: Value,
}

/// A validated delegation power change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub delegate_address: String,
    pub delegator_address: Option<String>,
    /// Signed change in base units.
    pub voting_power_change: i128,
    /// Delegate's total power after the event, in base units.
    pub voting_power: u128,
    pub block_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedEvent {
    pub event: RawEvent,
    pub delegate: Identity,
    pub delegator: Option<Identity>,
}

impl TryFrom<Value> for RawEvent {
    type Error = MalformedEventError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let record: ActivityRecord = serde_json::from_value(value.clone())
            .map_err(|e| MalformedEventError::new("record", value, e))?;
        RawEvent::try_from(record)
    }
}

impl TryFrom<ActivityRecord> for RawEvent {
    type Error = MalformedEventError;

    fn try_from(record: ActivityRecord) -> Result<Self, Self::Error> {
        let delegate_address = record.delegate_address.trim().to_string();
        if delegate_address.is_empty() {
            return Err(MalformedEventError::new(
                "delegate_address",
                record.delegate_address,
                "empty address",
            ));
        }

        let delegator_address = record
            .delegator_address
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());

        let voting_power_change = parse_signed("voting_power_change", &record.voting_power_change)?;
        let voting_power = parse_unsigned("voting_power", &record.voting_power)?;
        let timestamp = parse_signed("block_timestamp", &record.block_timestamp)?;
        let block_timestamp = i64::try_from(timestamp)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| {
                MalformedEventError::new(
                    "block_timestamp",
                    &record.block_timestamp,
                    "timestamp out of range",
                )
            })?;

        Ok(RawEvent {
            delegate_address,
            delegator_address,
            voting_power_change,
            voting_power,
            block_timestamp,
        })
    }
}

fn parse_signed(field: &'static str, value: &Value) -> Result<i128, MalformedEventError> {
    let parsed = match value {
        Value::String(s) => s
            .trim()
            .parse::<i128>()
            .map_err(|e| MalformedEventError::new(field, value, e))?,
        // arbitrary_precision keeps the literal digits, so wei-sized integers survive
        Value::Number(n) => n
            .to_string()
            .parse::<i128>()
            .map_err(|_| MalformedEventError::new(field, value, "not an integer"))?,
        _ => return Err(MalformedEventError::new(field, value, "expected an integer")),
    };

    if parsed.unsigned_abs() > MAX_ABS_BASE_UNITS {
        return Err(MalformedEventError::new(field, value, "amount out of range"));
    }
    Ok(parsed)
}

fn parse_unsigned(field: &'static str, value: &Value) -> Result<u128, MalformedEventError> {
    let parsed = parse_signed(field, value)?;
    u128::try_from(parsed).map_err(|_| MalformedEventError::new(field, value, "negative amount"))
}
