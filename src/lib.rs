// Accounts Tracker - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod company;
pub mod db;
pub mod error;
pub mod kpi;            // Dashboard counters
pub mod reconciliation; // Registry deadlines -> store
pub mod registry;       // Companies House client
pub mod resolver;       // Profile -> deadline
pub mod spreadsheet;    // Roster import / export

// Re-export commonly used types
pub use company::{Company, InternalStatus, DATE_FORMAT};
pub use db::{
    CompanyStore, DatabaseStats, Event, WriteThrough,
    setup_database, insert_event,
    ACTOR_IMPORT, ACTOR_RECONCILIATION, ACTOR_USER,
};
pub use error::{Result, TrackerError};
pub use kpi::{default_cutoff, kpi_counts, KpiCounts};
pub use reconciliation::{
    compose_deadline, CancelFlag, Outcome, ReconciliationEngine, ReconciliationReport,
    DEFAULT_CONCURRENCY,
};
pub use registry::{
    parse_profile, CompaniesHouseClient, CompanyStatus, ProfileDetails, RegistryClient,
    RegistryConfig, RegistryError, ResolvedProfile, StaticRegistry,
};
pub use resolver::{filed_status, resolve, Resolution, SkipReason};
pub use spreadsheet::{
    export_companies, export_file, export_workbook, import_file, import_rows, read_rows,
    read_workbook_rows, template_workbook, write_template, ImportRow, ImportSummary, SheetFormat,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
