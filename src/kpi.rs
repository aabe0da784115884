// 📊 KPI Aggregator - dashboard counters over the current roster
//
// Pure read-side computation. The cutoff and "today" are always passed in;
// there is no hidden default inside the calculation.

use crate::company::{Company, InternalStatus};
use crate::db::CompanyStore;
use crate::error::Result;
use chrono::NaiveDate;
use serde::Serialize;

/// Reference cutoff used by the dashboard when the caller does not choose one
pub fn default_cutoff() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 7, 31).unwrap_or(NaiveDate::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct KpiCounts {
    /// Deadline on or before the cutoff and not yet filed
    pub outstanding: usize,
    pub ready: usize,
    pub sent: usize,
    pub missing: usize,
    pub started: usize,
    /// Deadline strictly before today
    pub overdue: usize,
    /// Deadline on or before the cutoff, filed or not
    pub due_by_cutoff: usize,
}

impl KpiCounts {
    pub fn compute(companies: &[Company], cutoff: NaiveDate, today: NaiveDate) -> Self {
        let mut counts = KpiCounts::default();

        for company in companies {
            if company.filing_deadline <= cutoff {
                counts.due_by_cutoff += 1;
                if !company.filed_with_registry {
                    counts.outstanding += 1;
                }
            }
            if company.is_overdue(today) {
                counts.overdue += 1;
            }
            match company.internal_status {
                InternalStatus::ReadyToSubmit => counts.ready += 1,
                InternalStatus::SentToClient => counts.sent += 1,
                InternalStatus::MissingInformation => counts.missing += 1,
                InternalStatus::Started => counts.started += 1,
                InternalStatus::NotStarted => {}
            }
        }

        counts
    }

    pub fn summary(&self) -> String {
        format!(
            "{} outstanding, {} ready to submit, {} sent to client, {} missing information, {} overdue",
            self.outstanding, self.ready, self.sent, self.missing, self.overdue
        )
    }
}

/// KPI counts over everything currently in the store
pub fn kpi_counts(store: &CompanyStore, cutoff: NaiveDate, today: NaiveDate) -> Result<KpiCounts> {
    let companies = store.list_all()?;
    Ok(KpiCounts::compute(&companies, cutoff, today))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn company(number: &str, deadline: &str, filed: bool, status: InternalStatus) -> Company {
        let mut company = Company::new(number, format!("Company {}", number), date(deadline));
        company.filed_with_registry = filed;
        company.internal_status = status;
        company
    }

    #[test]
    fn test_outstanding_respects_cutoff_and_filed() {
        let companies = vec![
            company("1", "2026-01-01", false, InternalStatus::NotStarted),
            company("2", "2026-08-01", false, InternalStatus::NotStarted),
            company("3", "2025-01-01", true, InternalStatus::NotStarted),
        ];

        let counts = KpiCounts::compute(&companies, date("2026-07-31"), date("2025-06-01"));

        assert_eq!(counts.outstanding, 1);
        assert_eq!(counts.due_by_cutoff, 2);
    }

    #[test]
    fn test_cutoff_is_inclusive() {
        let companies = vec![company("1", "2026-07-31", false, InternalStatus::NotStarted)];
        let counts = KpiCounts::compute(&companies, default_cutoff(), date("2026-01-01"));
        assert_eq!(counts.outstanding, 1);
    }

    #[test]
    fn test_status_counts() {
        let companies = vec![
            company("1", "2026-01-01", false, InternalStatus::ReadyToSubmit),
            company("2", "2026-01-01", false, InternalStatus::ReadyToSubmit),
            company("3", "2026-01-01", false, InternalStatus::SentToClient),
            company("4", "2026-01-01", false, InternalStatus::MissingInformation),
            company("5", "2026-01-01", false, InternalStatus::Started),
            company("6", "2026-01-01", false, InternalStatus::NotStarted),
        ];

        let counts = KpiCounts::compute(&companies, default_cutoff(), date("2025-01-01"));

        assert_eq!((counts.ready, counts.sent, counts.missing, counts.started), (2, 1, 1, 1));
    }

    #[test]
    fn test_overdue_is_strictly_before_today() {
        let companies = vec![
            company("1", "2026-10-15", false, InternalStatus::NotStarted),
            company("2", "2026-10-16", false, InternalStatus::NotStarted),
            company("3", "2026-10-17", true, InternalStatus::NotStarted),
        ];

        let counts = KpiCounts::compute(&companies, default_cutoff(), date("2026-10-16"));
        assert_eq!(counts.overdue, 1);
    }

    #[test]
    fn test_kpi_counts_from_store() {
        let store = CompanyStore::open_in_memory().unwrap();
        store
            .upsert_if_absent(&Company::new("00000001", "Acme Ltd", date("2026-01-01")))
            .unwrap();
        store.set_status("00000001", InternalStatus::SentToClient).unwrap();

        let counts = kpi_counts(&store, default_cutoff(), date("2025-12-01")).unwrap();
        assert_eq!(counts.outstanding, 1);
        assert_eq!(counts.sent, 1);
        assert_eq!(counts.overdue, 0);
    }

    #[test]
    fn test_empty_roster() {
        assert_eq!(
            KpiCounts::compute(&[], default_cutoff(), date("2026-01-01")),
            KpiCounts::default()
        );
    }
}
