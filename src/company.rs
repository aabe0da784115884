// 🏢 Company Entity - registration number is IDENTITY, everything else is a value
//
// The registration number never changes after creation. Name and deadline
// are values: the name comes from import, the deadline from import or
// registry reconciliation. Internal status belongs to the user; the filed
// flag belongs to reconciliation.

use crate::error::TrackerError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Date format used everywhere a deadline is stored or exported
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// INTERNAL STATUS
// ============================================================================

/// Internal workflow status, changed only by explicit user action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum InternalStatus {
    #[default]
    #[serde(rename = "Not Started")]
    NotStarted,
    Started,
    #[serde(rename = "Sent to Client")]
    SentToClient,
    #[serde(rename = "Missing Information")]
    MissingInformation,
    #[serde(rename = "Ready to Submit")]
    ReadyToSubmit,
}

impl InternalStatus {
    pub const ALL: [InternalStatus; 5] = [
        InternalStatus::NotStarted,
        InternalStatus::Started,
        InternalStatus::SentToClient,
        InternalStatus::MissingInformation,
        InternalStatus::ReadyToSubmit,
    ];

    /// Label as stored in the database and shown in exports
    pub fn as_str(&self) -> &'static str {
        match self {
            InternalStatus::NotStarted => "Not Started",
            InternalStatus::Started => "Started",
            InternalStatus::SentToClient => "Sent to Client",
            InternalStatus::MissingInformation => "Missing Information",
            InternalStatus::ReadyToSubmit => "Ready to Submit",
        }
    }

    /// Next status in workflow order, wrapping back to NotStarted
    pub fn next(&self) -> InternalStatus {
        match self {
            InternalStatus::NotStarted => InternalStatus::Started,
            InternalStatus::Started => InternalStatus::SentToClient,
            InternalStatus::SentToClient => InternalStatus::MissingInformation,
            InternalStatus::MissingInformation => InternalStatus::ReadyToSubmit,
            InternalStatus::ReadyToSubmit => InternalStatus::NotStarted,
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            InternalStatus::NotStarted => "NotStarted",
            InternalStatus::Started => "Started",
            InternalStatus::SentToClient => "SentToClient",
            InternalStatus::MissingInformation => "MissingInformation",
            InternalStatus::ReadyToSubmit => "ReadyToSubmit",
        }
    }
}

impl fmt::Display for InternalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts either the stored label ("Ready to Submit") or the variant name
/// ("ReadyToSubmit"). Anything else is rejected, never coerced.
impl FromStr for InternalStatus {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        InternalStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == trimmed || status.variant_name() == trimmed)
            .ok_or_else(|| {
                let valid: Vec<&str> = InternalStatus::ALL.iter().map(|s| s.as_str()).collect();
                TrackerError::Validation(format!(
                    "invalid status '{}', must be one of: {}",
                    s,
                    valid.join(", ")
                ))
            })
    }
}

// ============================================================================
// COMPANY ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    /// Registration number (primary key, immutable)
    pub number: String,

    pub name: String,

    pub filing_deadline: NaiveDate,

    /// User-owned workflow state
    pub internal_status: InternalStatus,

    /// Last filed state observed at the registry
    pub filed_with_registry: bool,

    pub last_updated: DateTime<Utc>,
}

impl Company {
    /// New company as created by import: NotStarted, not filed
    pub fn new(number: impl Into<String>, name: impl Into<String>, filing_deadline: NaiveDate) -> Self {
        Company {
            number: number.into(),
            name: name.into(),
            filing_deadline,
            internal_status: InternalStatus::NotStarted,
            filed_with_registry: false,
            last_updated: Utc::now(),
        }
    }

    /// Days from `today` until the deadline (negative once overdue)
    pub fn days_until(&self, today: NaiveDate) -> i64 {
        (self.filing_deadline - today).num_days()
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.filing_deadline < today
    }

    /// Case-insensitive substring match on name or number
    pub fn matches(&self, term: &str) -> bool {
        let lower = term.to_lowercase();
        self.name.to_lowercase().contains(&lower) || self.number.to_lowercase().contains(&lower)
    }

    pub fn deadline_str(&self) -> String {
        self.filing_deadline.format(DATE_FORMAT).to_string()
    }
}

// ============================================================================
// TESTS
// ============================================================================
