// 📅 Deadline Resolver - pure derivation from a registry profile
//
// Precedence is fixed:
//   1. exempt lifecycle status   -> no deadline (Exempt)
//   2. accounts.next_due present -> that date, filed = last accounts present
//   3. otherwise                 -> no deadline (NoNextDue)

use crate::registry::ResolvedProfile;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Dissolved, in liquidation, receivership or administration
    Exempt,
    /// Registry profile carries no next_due date
    NoNextDue,
    /// Registry has no record of the number
    NotFound,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Exempt => "exempt",
            SkipReason::NoNextDue => "no next due date",
            SkipReason::NotFound => "not found",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub deadline: Option<NaiveDate>,
    pub filed: bool,
    pub skip_reason: Option<SkipReason>,
}

impl Resolution {
    fn skipped(reason: SkipReason) -> Self {
        Resolution {
            deadline: None,
            filed: false,
            skip_reason: Some(reason),
        }
    }
}

pub fn resolve(profile: &ResolvedProfile) -> Resolution {
    if profile.status.is_exempt() {
        log::debug!("Company is {} - no deadline required", profile.status.as_str());
        return Resolution::skipped(SkipReason::Exempt);
    }

    if let Some(next_due) = profile.next_due {
        return Resolution {
            deadline: Some(next_due),
            filed: profile.last_filed_date.is_some(),
            skip_reason: None,
        };
    }

    log::debug!(
        "No next_due field (overdue: {}, last accounts made up to: {}, accounts fields: [{}])",
        profile.overdue,
        profile
            .last_filed_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "none".to_string()),
        profile.details.accounts_fields.join(", ")
    );
    Resolution::skipped(SkipReason::NoNextDue)
}

/// Filed state for status-sync paths. A "made up to" date means filed;
/// an overdue flag or no evidence at all both mean not filed. There is no
/// third "unknown" state.
pub fn filed_status(profile: &ResolvedProfile) -> bool {
    profile.last_filed_date.is_some()
}
