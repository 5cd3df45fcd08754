use thiserror::Error;

/// A record from the activity feed that cannot be turned into an event.
///
/// Bad records are never skipped: dropping one would misstate the monthly
/// totals, so the whole report fails instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed `{field}` in activity record ({value}): {reason}")]
pub struct MalformedEventError {
    pub field: &'static str,
    pub value: String,
    pub reason: String,
}

impl MalformedEventError {
    pub fn new(field: &'static str, value: impl ToString, reason: impl ToString) -> Self {
        Self {
            field,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    /// Feed request failed, returned a non-success status or unparseable JSON.
    #[error("activity provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error(transparent)]
    MalformedEvent(#[from] MalformedEventError),
}

impl From<reqwest::Error> for ReportError {
    fn from(e: reqwest::Error) -> Self {
        ReportError::ProviderUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(e: serde_json::Error) -> Self {
        ReportError::ProviderUnavailable(format!("invalid response body: {e}"))
    }
}
