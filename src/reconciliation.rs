// ⚖️ Reconciliation Engine - registry deadlines merged into the store
//
// For each company number, independently:
//   registry NotFound        -> Skipped(NotFound)
//   registry TransientError  -> Failed(message)
//   resolver gives no date   -> Skipped(reason)
//   resolver gives a date    -> write-through, Deadline(date)
//
// Only a positive resolution ever writes. A failed or skipped lookup leaves
// the stored deadline exactly as it was.

use crate::db::{CompanyStore, WriteThrough};
use crate::registry::{RegistryClient, RegistryError, ResolvedProfile};
use crate::resolver::{filed_status, resolve, SkipReason};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

pub const DEFAULT_CONCURRENCY: usize = 4;

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Outcome {
    /// Deadline resolved (and written through when reconciling)
    Deadline(NaiveDate),
    /// Filed state resolved by a status sync
    Filed(bool),
    Skipped(SkipReason),
    Failed(String),
}

impl Outcome {
    pub fn is_update(&self) -> bool {
        matches!(self, Outcome::Deadline(_) | Outcome::Filed(_))
    }

    pub fn deadline(&self) -> Option<NaiveDate> {
        match self {
            Outcome::Deadline(date) => Some(*date),
            _ => None,
        }
    }
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub outcomes: BTreeMap<String, Outcome>,
    /// Numbers never looked up because the batch was cancelled
    pub not_attempted: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn updated(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_update()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, Outcome::Skipped(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, Outcome::Failed(_)))
            .count()
    }

    pub fn was_cancelled(&self) -> bool {
        !self.not_attempted.is_empty()
    }

    pub fn get(&self, number: &str) -> Option<&Outcome> {
        self.outcomes.get(number)
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Updated {}, skipped {}, failed {}",
            self.updated(),
            self.skipped(),
            self.failed()
        );
        if self.was_cancelled() {
            summary.push_str(&format!(" (cancelled, {} not attempted)", self.not_attempted.len()));
        }
        summary
    }
}

// ============================================================================
// CANCELLATION
// ============================================================================

/// Shared abort switch. Workers stop taking new numbers once set; lookups
/// already in flight finish and their results are still applied.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    /// Maximum registry lookups in flight at once
    pub concurrency: usize,

    cancel: CancelFlag,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            concurrency: DEFAULT_CONCURRENCY,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_concurrency(concurrency: usize) -> Self {
        ReconciliationEngine {
            concurrency: concurrency.max(1),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Resolve deadlines for `numbers` and write positive results through to the store.
    ///
    /// Example:
    /// ```
    /// use accounts_tracker::{
    ///     Company, CompanyStatus, CompanyStore, ReconciliationEngine, ResolvedProfile, StaticRegistry,
    /// };
    /// use chrono::NaiveDate;
    ///
    /// let store = CompanyStore::open_in_memory().unwrap();
    /// let old = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
    /// let new = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
    /// store.upsert_if_absent(&Company::new("00000001", "Acme Ltd", old)).unwrap();
    ///
    /// let registry = StaticRegistry::new()
    ///     .with_profile("00000001", ResolvedProfile::new(CompanyStatus::Active).with_next_due(new));
    ///
    /// let report = ReconciliationEngine::new().reconcile(&store, &registry, &["00000001".to_string()]);
    /// assert_eq!(report.updated(), 1);
    /// assert_eq!(store.get("00000001").unwrap().filing_deadline, new);
    /// ```
    pub fn reconcile(
        &self,
        store: &CompanyStore,
        registry: &dyn RegistryClient,
        numbers: &[String],
    ) -> ReconciliationReport {
        self.reconcile_with(registry, numbers, |number, deadline, filed| {
            store.record_resolution(number, deadline, filed)
        })
    }

    /// Same as [`reconcile`](Self::reconcile), with each positive resolution
    /// handed to `write` instead of a borrowed store. Callers that share the
    /// store behind a lock take it inside `write`, so it is held per record
    /// and never across registry lookups.
    pub fn reconcile_with<W>(
        &self,
        registry: &dyn RegistryClient,
        numbers: &[String],
        mut write: W,
    ) -> ReconciliationReport
    where
        W: FnMut(&str, NaiveDate, bool) -> crate::error::Result<WriteThrough>,
    {
        self.run(registry, numbers, |number, lookup| {
            let profile = match lookup {
                Ok(profile) => profile,
                Err(err) => return lookup_failure(number, err),
            };

            let resolution = resolve(&profile);
            let deadline = match resolution.deadline {
                Some(deadline) => deadline,
                None => {
                    let reason = resolution.skip_reason.unwrap_or(SkipReason::NoNextDue);
                    log::info!("Skipping {}: {}", number, reason);
                    return Outcome::Skipped(reason);
                }
            };

            match write(number, deadline, resolution.filed) {
                Ok(WriteThrough::Updated) => {
                    log::info!("{}: deadline {} (filed: {})", number, deadline, resolution.filed);
                    Outcome::Deadline(deadline)
                }
                Ok(WriteThrough::Unchanged) => Outcome::Deadline(deadline),
                Ok(WriteThrough::Missing) => not_in_store(number),
                Err(e) => {
                    log::warn!("Failed to store deadline for {}: {}", number, e);
                    Outcome::Failed(e.to_string())
                }
            }
        })
    }

    /// Update only the filed-with-registry flag for `numbers`. Deadlines and
    /// internal status are never touched.
    pub fn sync_filed_status(
        &self,
        store: &CompanyStore,
        registry: &dyn RegistryClient,
        numbers: &[String],
    ) -> ReconciliationReport {
        self.run(registry, numbers, |number, lookup| {
            let profile = match lookup {
                Ok(profile) => profile,
                Err(err) => return lookup_failure(number, err),
            };

            let filed = filed_status(&profile);
            match store.record_filed_state(number, filed) {
                Ok(WriteThrough::Updated | WriteThrough::Unchanged) => Outcome::Filed(filed),
                Ok(WriteThrough::Missing) => not_in_store(number),
                Err(e) => {
                    log::warn!("Failed to store filed state for {}: {}", number, e);
                    Outcome::Failed(e.to_string())
                }
            }
        })
    }

    /// Resolve deadlines without touching any store (used by import to pick
    /// between registry and supplied deadlines).
    pub fn resolve_deadlines(&self, registry: &dyn RegistryClient, numbers: &[String]) -> ReconciliationReport {
        self.run(registry, numbers, |number, lookup| match lookup {
            Ok(profile) => {
                let resolution = resolve(&profile);
                match resolution.deadline {
                    Some(deadline) => Outcome::Deadline(deadline),
                    None => Outcome::Skipped(resolution.skip_reason.unwrap_or(SkipReason::NoNextDue)),
                }
            }
            Err(err) => lookup_failure(number, err),
        })
    }

    /// Fan registry lookups out over worker threads and apply `handle` to
    /// each result on the calling thread, in arrival order. Store writes in
    /// `handle` are therefore serialized and committed one by one.
    fn run<F>(&self, registry: &dyn RegistryClient, numbers: &[String], mut handle: F) -> ReconciliationReport
    where
        F: FnMut(&str, Result<ResolvedProfile, RegistryError>) -> Outcome,
    {
        let started_at = Utc::now();
        let mut seen = HashSet::new();
        let unique: Vec<&String> = numbers.iter().filter(|n| seen.insert(n.as_str())).collect();

        let workers = self.concurrency.clamp(1, unique.len().max(1));
        let queue = Mutex::new(unique.iter().copied());
        let mut outcomes = BTreeMap::new();

        log::info!("Reconciling {} companies with {} workers", unique.len(), workers);

        thread::scope(|scope| {
            let (tx, rx) = mpsc::channel::<(&String, Result<ResolvedProfile, RegistryError>)>();

            for _ in 0..workers {
                let tx = tx.clone();
                let queue = &queue;
                let cancel = &self.cancel;
                scope.spawn(move || loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = match queue.lock() {
                        Ok(mut pending) => pending.next(),
                        Err(_) => None,
                    };
                    let Some(number) = next else { break };
                    if tx.send((number, registry.fetch_profile(number))).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            for (number, lookup) in rx {
                let outcome = handle(number, lookup);
                outcomes.insert(number.clone(), outcome);
            }
        });

        let not_attempted: Vec<String> = unique
            .iter()
            .filter(|n| !outcomes.contains_key(n.as_str()))
            .map(|n| n.to_string())
            .collect();

        let report = ReconciliationReport {
            outcomes,
            not_attempted,
            started_at,
            finished_at: Utc::now(),
        };
        log::info!("{}", report.summary());
        report
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup_failure(number: &str, err: RegistryError) -> Outcome {
    match err {
        RegistryError::NotFound => {
            log::info!("Company {} not found at registry", number);
            Outcome::Skipped(SkipReason::NotFound)
        }
        RegistryError::Transient(message) => {
            log::warn!("Error fetching company {}: {}", number, message);
            Outcome::Failed(message)
        }
    }
}

fn not_in_store(number: &str) -> Outcome {
    log::warn!("Company {} resolved but is not in the store", number);
    Outcome::Failed(format!("company {} is not in the store", number))
}

// ============================================================================
// IMPORT FALLBACK
// ============================================================================

/// Pick the deadline for a new company during import: a successful registry
/// resolution wins, otherwise the supplied value, otherwise nothing.
pub fn compose_deadline(supplied: Option<NaiveDate>, registry: Option<&Outcome>) -> Option<NaiveDate> {
    registry.and_then(Outcome::deadline).or(supplied)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::company::{Company, InternalStatus};
    use crate::registry::{CompanyStatus, StaticRegistry};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn numbers(list: &[&str]) -> Vec<String> {
        list.iter().map(|n| n.to_string()).collect()
    }

    fn store_with(companies: &[(&str, &str)]) -> CompanyStore {
        let store = CompanyStore::open_in_memory().unwrap();
        for (number, deadline) in companies {
            store
                .upsert_if_absent(&Company::new(*number, format!("Company {}", number), date(deadline)))
                .unwrap();
        }
        store
    }

    fn active(next_due: &str) -> ResolvedProfile {
        ResolvedProfile::new(CompanyStatus::Active).with_next_due(date(next_due))
    }

    #[test]
    fn test_reconcile_mixed_batch() {
        let store = store_with(&[
            ("00000001", "2026-03-01"),
            ("00000002", "2026-03-01"),
            ("00000003", "2026-03-01"),
            ("00000004", "2026-03-01"),
            ("00000005", "2026-03-01"),
        ]);
        let registry = StaticRegistry::new()
            .with_profile("00000001", active("2026-12-31").with_last_filed(date("2025-03-31")))
            .with_profile("00000002", ResolvedProfile::new(CompanyStatus::Dissolved))
            .with_profile("00000003", ResolvedProfile::new(CompanyStatus::Active))
            .with_error("00000004", RegistryError::Transient("timed out".to_string()));

        let report = ReconciliationEngine::with_concurrency(3).reconcile(
            &store,
            &registry,
            &numbers(&["00000001", "00000002", "00000003", "00000004", "00000005"]),
        );

        assert_eq!(report.get("00000001"), Some(&Outcome::Deadline(date("2026-12-31"))));
        assert_eq!(report.get("00000002"), Some(&Outcome::Skipped(SkipReason::Exempt)));
        assert_eq!(report.get("00000003"), Some(&Outcome::Skipped(SkipReason::NoNextDue)));
        assert_eq!(report.get("00000004"), Some(&Outcome::Failed("timed out".to_string())));
        assert_eq!(report.get("00000005"), Some(&Outcome::Skipped(SkipReason::NotFound)));
        assert_eq!((report.updated(), report.skipped(), report.failed()), (1, 3, 1));
        assert_eq!(report.summary(), "Updated 1, skipped 3, failed 1");

        let updated = store.get("00000001").unwrap();
        assert_eq!(updated.deadline_str(), "2026-12-31");
        assert!(updated.filed_with_registry);

        for number in ["00000002", "00000003", "00000004", "00000005"] {
            assert_eq!(store.get(number).unwrap().deadline_str(), "2026-03-01");
        }
    }

    #[test]
    fn test_transient_error_keeps_stored_deadline() {
        let store = store_with(&[("00000001", "2026-03-01")]);
        let before = store.get("00000001").unwrap();
        let registry = StaticRegistry::new()
            .with_error("00000001", RegistryError::Transient("HTTP 503".to_string()));

        let report = ReconciliationEngine::new().reconcile(&store, &registry, &numbers(&["00000001"]));

        assert_eq!(report.failed(), 1);
        assert_eq!(store.get("00000001").unwrap(), before);
    }

    #[test]
    fn test_reconcile_twice_is_idempotent() {
        let store = store_with(&[("00000001", "2026-03-01"), ("00000002", "2026-04-01")]);
        let registry = StaticRegistry::new()
            .with_profile("00000001", active("2026-12-31"))
            .with_profile("00000002", active("2027-01-31").with_last_filed(date("2025-10-31")));
        let engine = ReconciliationEngine::new();
        let all = store.numbers().unwrap();

        engine.reconcile(&store, &registry, &all);
        let first = store.list_all().unwrap();
        let second_report = engine.reconcile(&store, &registry, &all);
        let second = store.list_all().unwrap();

        assert_eq!(first, second);
        assert_eq!(second_report.updated(), 2);
    }

    #[test]
    fn test_reconcile_never_touches_internal_status_or_name() {
        let store = store_with(&[("00000001", "2026-03-01")]);
        store.set_status("00000001", InternalStatus::MissingInformation).unwrap();
        let registry = StaticRegistry::new().with_profile("00000001", active("2026-12-31"));

        ReconciliationEngine::new().reconcile(&store, &registry, &numbers(&["00000001"]));

        let company = store.get("00000001").unwrap();
        assert_eq!(company.internal_status, InternalStatus::MissingInformation);
        assert_eq!(company.name, "Company 00000001");
    }

    #[test]
    fn test_duplicate_numbers_are_looked_up_once() {
        let store = store_with(&[("00000001", "2026-03-01")]);
        let registry = StaticRegistry::new().with_profile("00000001", active("2026-12-31"));

        let report = ReconciliationEngine::new().reconcile(
            &store,
            &registry,
            &numbers(&["00000001", "00000001", "00000001"]),
        );

        assert_eq!(registry.calls(), 1);
        assert_eq!(report.outcomes.len(), 1);
    }

    #[test]
    fn test_number_missing_from_store_is_failed() {
        let store = store_with(&[]);
        let registry = StaticRegistry::new().with_profile("00000009", active("2026-12-31"));

        let report = ReconciliationEngine::new().reconcile(&store, &registry, &numbers(&["00000009"]));

        assert!(matches!(report.get("00000009"), Some(Outcome::Failed(_))));
        assert!(store.find("00000009").unwrap().is_none());
    }

    #[test]
    fn test_cancelled_batch_attempts_nothing() {
        let store = store_with(&[("00000001", "2026-03-01"), ("00000002", "2026-03-01")]);
        let registry = StaticRegistry::new().with_profile("00000001", active("2026-12-31"));
        let engine = ReconciliationEngine::new();
        engine.cancel_flag().cancel();

        let report = engine.reconcile(&store, &registry, &store.numbers().unwrap());

        assert_eq!(registry.calls(), 0);
        assert!(report.outcomes.is_empty());
        assert_eq!(report.not_attempted.len(), 2);
        assert!(report.summary().contains("cancelled"));
        assert_eq!(store.get("00000001").unwrap().deadline_str(), "2026-03-01");
    }

    /// Cancels the batch from inside the first lookup
    struct CancelOnFirstLookup<'a> {
        inner: &'a StaticRegistry,
        cancel: CancelFlag,
    }

    impl RegistryClient for CancelOnFirstLookup<'_> {
        fn fetch_profile(&self, number: &str) -> Result<ResolvedProfile, RegistryError> {
            self.cancel.cancel();
            self.inner.fetch_profile(number)
        }
    }

    /// Records the highest number of lookups running at the same time
    #[derive(Default)]
    struct PeakTracking {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl RegistryClient for PeakTracking {
        fn fetch_profile(&self, _number: &str) -> Result<ResolvedProfile, RegistryError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(active("2026-12-31"))
        }
    }

    #[test]
    fn test_cancel_mid_batch_keeps_committed_writes() {
        let all = ["00000001", "00000002", "00000003", "00000004", "00000005"];
        let store = store_with(&all.map(|n| (n, "2026-03-01")));
        let mut registry = StaticRegistry::new();
        for number in all {
            registry = registry.with_profile(number, active("2026-12-31"));
        }
        let engine = ReconciliationEngine::with_concurrency(1);
        let cancelling = CancelOnFirstLookup {
            inner: &registry,
            cancel: engine.cancel_flag(),
        };

        let report = engine.reconcile(&store, &cancelling, &numbers(&all));

        assert_eq!(registry.calls(), 1);
        assert_eq!(report.get("00000001"), Some(&Outcome::Deadline(date("2026-12-31"))));
        assert_eq!(report.not_attempted, numbers(&all[1..]));
        assert_eq!(report.summary(), "Updated 1, skipped 0, failed 0 (cancelled, 4 not attempted)");

        assert_eq!(store.get("00000001").unwrap().deadline_str(), "2026-12-31");
        for number in &all[1..] {
            assert_eq!(store.get(number).unwrap().deadline_str(), "2026-03-01");
        }
    }

    #[test]
    fn test_lookups_in_flight_never_exceed_concurrency() {
        let batch: Vec<String> = (1..=12).map(|i| format!("{:08}", i)).collect();

        for concurrency in [1, 3] {
            let registry = PeakTracking::default();
            let report = ReconciliationEngine::with_concurrency(concurrency).resolve_deadlines(&registry, &batch);

            assert_eq!(report.outcomes.len(), batch.len());
            let peak = registry.peak.load(Ordering::SeqCst);
            assert!(peak >= 1 && peak <= concurrency, "peak {} with concurrency {}", peak, concurrency);
        }
    }

    #[test]
    fn test_reconcile_with_routes_writes_through_callback() {
        let registry = StaticRegistry::new()
            .with_profile("00000001", active("2026-12-31"))
            .with_profile("00000002", ResolvedProfile::new(CompanyStatus::Dissolved));
        let mut written = Vec::new();

        let report = ReconciliationEngine::new().reconcile_with(
            &registry,
            &numbers(&["00000001", "00000002"]),
            |number, deadline, filed| {
                written.push((number.to_string(), deadline, filed));
                Ok(WriteThrough::Updated)
            },
        );

        assert_eq!(written, vec![("00000001".to_string(), date("2026-12-31"), false)]);
        assert_eq!(report.updated(), 1);
        assert_eq!(report.skipped(), 1);
    }

    #[test]
    fn test_empty_batch() {
        let store = store_with(&[]);
        let report = ReconciliationEngine::new().reconcile(&store, &StaticRegistry::new(), &[]);

        assert!(report.outcomes.is_empty());
        assert_eq!(report.summary(), "Updated 0, skipped 0, failed 0");
    }

    #[test]
    fn test_sync_filed_status_updates_only_flag() {
        let store = store_with(&[("00000001", "2026-03-01"), ("00000002", "2026-03-01")]);
        store.set_filed_state("00000002", true).unwrap();
        let registry = StaticRegistry::new()
            .with_profile(
                "00000001",
                ResolvedProfile::new(CompanyStatus::Active).with_last_filed(date("2025-03-31")),
            )
            .with_profile("00000002", ResolvedProfile::new(CompanyStatus::Active).overdue(true));

        let report = ReconciliationEngine::new().sync_filed_status(&store, &registry, &store.numbers().unwrap());

        assert_eq!(report.get("00000001"), Some(&Outcome::Filed(true)));
        assert_eq!(report.get("00000002"), Some(&Outcome::Filed(false)));

        let first = store.get("00000001").unwrap();
        assert!(first.filed_with_registry);
        assert_eq!(first.deadline_str(), "2026-03-01");
        assert!(!store.get("00000002").unwrap().filed_with_registry);
    }

    #[test]
    fn test_resolve_deadlines_does_not_write() {
        let registry = StaticRegistry::new()
            .with_profile("00000001", active("2026-12-31"))
            .with_profile("00000002", ResolvedProfile::new(CompanyStatus::Liquidation));

        let report = ReconciliationEngine::new().resolve_deadlines(&registry, &numbers(&["00000001", "00000002"]));

        assert_eq!(report.get("00000001").and_then(Outcome::deadline), Some(date("2026-12-31")));
        assert_eq!(report.get("00000002"), Some(&Outcome::Skipped(SkipReason::Exempt)));
    }

    #[test]
    fn test_compose_deadline_precedence() {
        let supplied = Some(date("2026-05-01"));
        let resolved = Outcome::Deadline(date("2026-12-31"));
        let skipped = Outcome::Skipped(SkipReason::Exempt);
        let failed = Outcome::Failed("timeout".to_string());

        assert_eq!(compose_deadline(supplied, Some(&resolved)), Some(date("2026-12-31")));
        assert_eq!(compose_deadline(supplied, Some(&skipped)), supplied);
        assert_eq!(compose_deadline(supplied, Some(&failed)), supplied);
        assert_eq!(compose_deadline(supplied, None), supplied);
        assert_eq!(compose_deadline(None, Some(&failed)), None);
        assert_eq!(compose_deadline(None, Some(&resolved)), Some(date("2026-12-31")));
    }
}
