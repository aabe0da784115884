// End-to-end tracker workflow through the public library API:
// roster import -> registry reconciliation -> user status -> KPIs -> export

use accounts_tracker::{
    default_cutoff, export_file, import_file, import_rows, kpi_counts, read_rows, CompanyStatus,
    CompanyStore, InternalStatus, Outcome, ReconciliationEngine, RegistryError, ResolvedProfile,
    SkipReason, StaticRegistry,
};
use chrono::NaiveDate;
use std::fs;
use std::path::PathBuf;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("accounts-tracker-{}-{}", uuid::Uuid::new_v4(), name))
}

fn roster_store(sheet: &str) -> CompanyStore {
    let store = CompanyStore::open_in_memory().unwrap();
    let rows = read_rows(sheet.as_bytes(), true).unwrap();
    import_rows(&store, &rows, None, &ReconciliationEngine::new()).unwrap();
    store
}

#[test]
fn import_reconcile_and_report() {
    let store = roster_store(
        "Company_Name,Company_Number,Filing_Deadline\n\
         Acme Ltd,00000001,2026-03-01\n\
         Beta Ltd,00000002,2026-04-30\n\
         Gamma Ltd,00000003,2026-06-30\n\
         Delta Ltd,00000004,2026-09-30\n",
    );

    let registry = StaticRegistry::new()
        .with_profile(
            "00000001",
            ResolvedProfile::new(CompanyStatus::Active)
                .with_next_due(date("2026-12-31"))
                .with_last_filed(date("2025-03-31")),
        )
        .with_profile("00000002", ResolvedProfile::new(CompanyStatus::Dissolved))
        .with_error("00000003", RegistryError::Transient("request timed out".to_string()));

    let report = ReconciliationEngine::with_concurrency(2).reconcile(&store, &registry, &store.numbers().unwrap());

    assert_eq!(report.get("00000001"), Some(&Outcome::Deadline(date("2026-12-31"))));
    assert_eq!(report.get("00000002"), Some(&Outcome::Skipped(SkipReason::Exempt)));
    assert!(matches!(report.get("00000003"), Some(Outcome::Failed(_))));
    assert_eq!(report.get("00000004"), Some(&Outcome::Skipped(SkipReason::NotFound)));

    store.set_internal_status("00000002", "Ready to Submit").unwrap();
    store.set_internal_status("00000003", "Missing Information").unwrap();

    // Acme moved past the cutoff, Delta was already past it
    let counts = kpi_counts(&store, default_cutoff(), date("2026-04-01")).unwrap();
    assert_eq!(counts.outstanding, 2);
    assert_eq!(counts.ready, 1);
    assert_eq!(counts.missing, 1);
    assert_eq!(counts.overdue, 0);

    let history = store.events_for("00000001").unwrap();
    assert_eq!(history[0].event_type, "deadline_updated");
    assert_eq!(history[0].actor, "reconciliation");
}

#[test]
fn transient_failure_keeps_stored_deadline() {
    let store = roster_store("Company_Name,Company_Number,Filing_Deadline\nAcme Ltd,00000001,2026-03-01\n");
    let registry = StaticRegistry::new().with_error("00000001", RegistryError::Transient("HTTP 503".to_string()));

    let report = ReconciliationEngine::new().reconcile(&store, &registry, &["00000001".to_string()]);

    assert_eq!(report.failed(), 1);
    assert_eq!(store.get("00000001").unwrap().deadline_str(), "2026-03-01");
}

#[test]
fn reconcile_twice_leaves_store_identical() {
    let store = roster_store(
        "Company_Name,Company_Number,Filing_Deadline\nAcme Ltd,00000001,2026-03-01\nBeta Ltd,00000002,2026-04-01\n",
    );
    let registry = StaticRegistry::new()
        .with_profile("00000001", ResolvedProfile::new(CompanyStatus::Active).with_next_due(date("2026-12-31")))
        .with_profile("00000002", ResolvedProfile::new(CompanyStatus::Active));
    let engine = ReconciliationEngine::new();
    let numbers = store.numbers().unwrap();

    engine.reconcile(&store, &registry, &numbers);
    let first = (store.list_all().unwrap(), store.events_for("00000001").unwrap().len());
    engine.reconcile(&store, &registry, &numbers);
    let second = (store.list_all().unwrap(), store.events_for("00000001").unwrap().len());

    assert_eq!(first, second);
}

#[test]
fn reimport_never_overwrites() {
    let sheet = "Company_Name,Company_Number,Filing_Deadline\nAcme Ltd,00000001,2026-05-01\n";
    let store = roster_store(sheet);
    store.set_internal_status("00000001", "Started").unwrap();
    let before = store.get("00000001").unwrap();

    let rows = read_rows(
        "Company_Name,Company_Number,Filing_Deadline\nAcme Holdings,00000001,2027-01-01\n".as_bytes(),
        true,
    )
    .unwrap();
    let summary = import_rows(&store, &rows, None, &ReconciliationEngine::new()).unwrap();

    assert_eq!(summary.imported, 0);
    assert_eq!(store.get("00000001").unwrap(), before);
}

#[test]
fn invalid_status_is_rejected_without_change() {
    let store = roster_store("Company_Name,Company_Number,Filing_Deadline\nAcme Ltd,00000001,2026-05-01\n");
    let before = store.get("00000001").unwrap();

    let err = store.set_internal_status("00000001", "Bogus").unwrap_err();

    assert!(err.is_validation());
    assert_eq!(store.get("00000001").unwrap(), before);
    assert_eq!(before.internal_status, InternalStatus::NotStarted);
}

#[test]
fn import_and_export_files() {
    let roster = temp_path("roster.csv");
    let export = temp_path("export.csv");
    fs::write(
        &roster,
        "Company_Name,Company_Number,Filing_Deadline\nAcme Ltd,00000001,2026-05-01\nBeta Ltd,00000002,\n",
    )
    .unwrap();

    let store = CompanyStore::open_in_memory().unwrap();
    let summary = import_file(&store, &roster, None, &ReconciliationEngine::new()).unwrap();
    assert_eq!(summary.imported, 1);
    assert_eq!(summary.skipped, vec!["00000002".to_string()]);

    store.set_internal_status("00000001", "Sent to Client").unwrap();
    export_file(&store.list_all().unwrap(), &export).unwrap();

    assert_eq!(
        fs::read_to_string(&export).unwrap(),
        "Company_Name,Company_Number,Filing_Deadline,Internal_Status\nAcme Ltd,00000001,2026-05-01,Sent to Client\n"
    );

    fs::remove_file(roster).ok();
    fs::remove_file(export).ok();
}

#[test]
fn workbook_export_imports_into_fresh_store() {
    let workbook = temp_path("export.xlsx");
    let source = roster_store(
        "Company_Name,Company_Number,Filing_Deadline\nAcme Ltd,00000001,2026-05-01\nBeta Ltd,00000002,2026-09-30\n",
    );
    source.set_internal_status("00000002", "Ready to Submit").unwrap();

    export_file(&source.list_all().unwrap(), &workbook).unwrap();

    let target = CompanyStore::open_in_memory().unwrap();
    let summary = import_file(&target, &workbook, None, &ReconciliationEngine::new()).unwrap();
    assert_eq!(summary.imported, 2);

    let imported = target.get("00000002").unwrap();
    assert_eq!(imported.name, "Beta Ltd");
    assert_eq!(imported.deadline_str(), "2026-09-30");
    // Import starts every company at Not Started
    assert_eq!(imported.internal_status, InternalStatus::NotStarted);

    fs::remove_file(workbook).ok();
}

#[test]
fn store_persists_across_reopen() {
    let db = temp_path("tracker.db");
    {
        let store = CompanyStore::open(&db).unwrap();
        let rows = read_rows("Company_Name,Company_Number,Filing_Deadline\nAcme Ltd,00000001,2026-05-01\n".as_bytes(), true)
            .unwrap();
        import_rows(&store, &rows, None, &ReconciliationEngine::new()).unwrap();
        store.set_internal_status("00000001", "Ready to Submit").unwrap();
    }

    let reopened = CompanyStore::open(&db).unwrap();
    let company = reopened.get("00000001").unwrap();
    assert_eq!(company.internal_status, InternalStatus::ReadyToSubmit);
    assert_eq!(company.deadline_str(), "2026-05-01");

    drop(reopened);
    for suffix in ["", "-wal", "-shm"] {
        fs::remove_file(format!("{}{}", db.display(), suffix)).ok();
    }
}
