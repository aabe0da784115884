// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use accounts_tracker::{
    default_cutoff, export_file, filed_status, import_file, kpi_counts, resolve, write_template,
    CompaniesHouseClient, CompanyStore, Outcome, ReconciliationEngine, ReconciliationReport,
    RegistryClient, RegistryConfig, RegistryError, DEFAULT_CONCURRENCY,
};
use accounts_tracker::registry::DEFAULT_BASE_URL;
use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "accounts-tracker", version, about = "Track UK company accounts filing deadlines")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Settings shared by every subcommand
#[derive(Args, Debug)]
struct Config {
    /// SQLite database file
    #[arg(long, env = "ACCOUNTS_DB", default_value = "client_data.db", global = true)]
    db: PathBuf,

    /// Companies House API key
    #[arg(long, env = "COMPANIES_HOUSE_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Registry base URL
    #[arg(long, env = "COMPANIES_HOUSE_URL", default_value = DEFAULT_BASE_URL, global = true)]
    registry_url: String,

    /// Per-request registry timeout in seconds
    #[arg(long, default_value_t = 10, global = true)]
    timeout_secs: u64,

    /// Registry lookups in flight at once
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY, global = true)]
    concurrency: usize,

    /// KPI cutoff date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date, global = true)]
    cutoff: Option<NaiveDate>,
}

impl Config {
    fn open_store(&self) -> Result<CompanyStore> {
        CompanyStore::open(&self.db).with_context(|| format!("Failed to open database {}", self.db.display()))
    }

    fn registry(&self) -> Result<CompaniesHouseClient> {
        let config = RegistryConfig::new(self.api_key.clone().unwrap_or_default())?
            .with_base_url(self.registry_url.as_str())
            .with_timeout(Duration::from_secs(self.timeout_secs));
        Ok(CompaniesHouseClient::new(config)?)
    }

    /// Registry for import. Without a usable key the import goes ahead on
    /// sheet deadlines alone.
    fn import_registry(&self, use_registry: bool) -> Option<CompaniesHouseClient> {
        if !use_registry {
            return None;
        }
        match self.registry() {
            Ok(registry) => Some(registry),
            Err(e) => {
                println!("⚠️  Companies House lookups disabled ({:#}); using sheet deadlines", e);
                None
            }
        }
    }

    fn engine(&self) -> ReconciliationEngine {
        ReconciliationEngine::with_concurrency(self.concurrency)
    }

    fn cutoff(&self) -> NaiveDate {
        self.cutoff.unwrap_or_else(default_cutoff)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import companies from a CSV or Excel roster (existing companies are never overwritten)
    Import {
        file: PathBuf,
        /// Look deadlines up at Companies House, falling back to the sheet
        #[arg(long)]
        use_registry: bool,
    },
    /// Refresh deadlines from Companies House (all companies when none given)
    Reconcile { numbers: Vec<String> },
    /// Refresh only the filed-with-registry flag
    SyncFiled { numbers: Vec<String> },
    /// List companies by deadline
    List {
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Dashboard counters
    Kpi,
    /// Set a company's internal workflow status
    SetStatus { number: String, status: String },
    /// Export the current view (.xlsx writes a workbook, anything else CSV)
    Export {
        file: PathBuf,
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Show the registry profile and deadline verdict for companies
    Diagnose {
        #[arg(required = true)]
        numbers: Vec<String>,
    },
    /// Write an empty import roster (CSV or .xlsx)
    Template { file: PathBuf },
    /// Delete every company and its history
    Reset {
        /// Import this roster after clearing
        #[arg(long)]
        reimport: Option<PathBuf>,
        #[arg(long)]
        use_registry: bool,
        /// Skip the confirmation guard
        #[arg(long)]
        yes: bool,
    },
    /// Database statistics
    Stats,
    /// Interactive terminal dashboard (default)
    Dashboard,
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, accounts_tracker::DATE_FORMAT)
        .map_err(|e| format!("expected YYYY-MM-DD: {}", e))
}

fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    let cli = Cli::parse();
    let config = &cli.config;

    match cli.command.unwrap_or(Command::Dashboard) {
        Command::Import { file, use_registry } => run_import(config, &file, use_registry),
        Command::Reconcile { numbers } => run_reconcile(config, numbers),
        Command::SyncFiled { numbers } => run_sync_filed(config, numbers),
        Command::List { search } => run_list(config, search.as_deref()),
        Command::Kpi => run_kpi(config),
        Command::SetStatus { number, status } => run_set_status(config, &number, &status),
        Command::Export { file, search } => run_export(config, &file, search.as_deref()),
        Command::Diagnose { numbers } => run_diagnose(config, &numbers),
        Command::Template { file } => {
            write_template(&file).with_context(|| format!("Failed to write {}", file.display()))?;
            println!("✓ Template written to {}", file.display());
            Ok(())
        }
        Command::Reset { reimport, use_registry, yes } => run_reset(config, reimport.as_deref(), use_registry, yes),
        Command::Stats => run_stats(config),
        Command::Dashboard => run_ui_mode(config),
    }
}

fn run_import(config: &Config, file: &Path, use_registry: bool) -> Result<()> {
    println!("📂 Importing {}", file.display());

    let store = config.open_store()?;
    let registry = config.import_registry(use_registry);
    let registry_ref = registry.as_ref().map(|r| r as &dyn RegistryClient);

    let summary = import_file(&store, file, registry_ref, &config.engine())
        .with_context(|| format!("Failed to import {}", file.display()))?;

    println!("✓ Imported {} companies", summary.imported);
    if registry.is_some() {
        println!("  {} deadlines from registry, {} from sheet", summary.from_registry, summary.from_sheet);
    }
    if summary.already_present > 0 {
        println!("  {} already tracked (left unchanged)", summary.already_present);
    }
    for number in &summary.skipped {
        println!("  ⚠️  {} skipped: no deadline available", number);
    }
    for line in &summary.invalid_rows {
        println!("  ⚠️  line {} ignored: blank company number or name", line);
    }
    Ok(())
}

/// Explicit numbers win; otherwise every stored company
fn target_numbers(store: &CompanyStore, numbers: Vec<String>) -> Result<Vec<String>> {
    if numbers.is_empty() {
        Ok(store.numbers()?)
    } else {
        Ok(numbers)
    }
}

fn print_report(report: &ReconciliationReport) {
    for (number, outcome) in &report.outcomes {
        match outcome {
            Outcome::Deadline(date) => println!("  ✓ {} → {}", number, date),
            Outcome::Filed(filed) => println!("  ✓ {} filed: {}", number, if *filed { "yes" } else { "no" }),
            Outcome::Skipped(reason) => println!("  - {} skipped: {}", number, reason),
            Outcome::Failed(message) => println!("  ❌ {} failed: {}", number, message),
        }
    }
    println!("\n{}", report.summary());
}

fn run_reconcile(config: &Config, numbers: Vec<String>) -> Result<()> {
    let store = config.open_store()?;
    let registry = config.registry()?;
    let numbers = target_numbers(&store, numbers)?;

    println!("🔄 Reconciling {} companies with Companies House", numbers.len());
    let report = config.engine().reconcile(&store, &registry, &numbers);
    print_report(&report);
    Ok(())
}

fn run_sync_filed(config: &Config, numbers: Vec<String>) -> Result<()> {
    let store = config.open_store()?;
    let registry = config.registry()?;
    let numbers = target_numbers(&store, numbers)?;

    println!("🔄 Syncing filed status for {} companies", numbers.len());
    let report = config.engine().sync_filed_status(&store, &registry, &numbers);
    print_report(&report);
    Ok(())
}

fn run_list(config: &Config, search: Option<&str>) -> Result<()> {
    let store = config.open_store()?;
    let companies = store.view(search)?;
    let today = Local::now().date_naive();

    println!(
        "{:<12} {:>6}  {:<10} {:<40} {:<20} {}",
        "Deadline", "Days", "Number", "Company", "Status", "Filed"
    );
    for company in &companies {
        println!(
            "{:<12} {:>6}  {:<10} {:<40} {:<20} {}",
            company.deadline_str(),
            company.days_until(today),
            company.number,
            company.name,
            company.internal_status.as_str(),
            if company.filed_with_registry { "✓" } else { "" }
        );
    }
    println!("\n{} companies", companies.len());
    Ok(())
}

fn run_kpi(config: &Config) -> Result<()> {
    let store = config.open_store()?;
    let cutoff = config.cutoff();
    let counts = kpi_counts(&store, cutoff, Local::now().date_naive())?;

    println!("📊 Filing KPIs (cutoff {})", cutoff);
    println!("  Outstanding:          {}", counts.outstanding);
    println!("  Deadline ≤ cutoff:    {}", counts.due_by_cutoff);
    println!("  Started:              {}", counts.started);
    println!("  Sent to Client:       {}", counts.sent);
    println!("  Missing Information:  {}", counts.missing);
    println!("  Ready to Submit:      {}", counts.ready);
    println!("  Overdue:              {}", counts.overdue);
    Ok(())
}

fn run_set_status(config: &Config, number: &str, status: &str) -> Result<()> {
    let store = config.open_store()?;
    if !store.set_internal_status(number, status)? {
        bail!("Company {} is not tracked", number);
    }
    let company = store.get(number)?;
    println!("✓ {} ({}) → {}", company.name, company.number, company.internal_status);
    Ok(())
}

fn run_export(config: &Config, file: &Path, search: Option<&str>) -> Result<()> {
    let store = config.open_store()?;
    let companies = store.view(search)?;
    export_file(&companies, file).with_context(|| format!("Failed to export to {}", file.display()))?;
    println!("✓ Exported {} companies to {}", companies.len(), file.display());
    Ok(())
}

fn run_diagnose(config: &Config, numbers: &[String]) -> Result<()> {
    let registry = config.registry()?;

    for number in numbers {
        println!("\n🔍 {}", number);
        let profile = match registry.fetch_profile(number) {
            Ok(profile) => profile,
            Err(RegistryError::NotFound) => {
                println!("  Not found at Companies House");
                continue;
            }
            Err(RegistryError::Transient(message)) => {
                println!("  ❌ Lookup failed: {}", message);
                continue;
            }
        };

        let details = &profile.details;
        let show = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
        println!("  Name:              {}", show(&details.company_name));
        println!("  Status:            {}", profile.status.as_str());
        println!("  Type:              {}", show(&details.company_type));
        println!("  Incorporated:      {}", show(&details.date_of_creation));
        if let Some((day, month)) = &details.accounting_reference_date {
            println!("  Reference date:    {}/{}", day, month);
        }
        println!("  Accounts fields:   [{}]", details.accounts_fields.join(", "));
        println!(
            "  Next due:          {}",
            profile.next_due.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
        );
        println!(
            "  Last made up to:   {} ({})",
            profile.last_filed_date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
            show(&details.last_accounts_type)
        );
        println!("  Overdue flag:      {}", profile.overdue);

        let resolution = resolve(&profile);
        match (resolution.deadline, resolution.skip_reason) {
            (Some(deadline), _) => println!("  ✓ Deadline:        {}", deadline),
            (None, Some(reason)) => println!("  - No deadline:     {}", reason),
            (None, None) => println!("  - No deadline"),
        }
        println!("  Filed:             {}", filed_status(&profile));
    }
    Ok(())
}

fn run_reset(config: &Config, reimport: Option<&Path>, use_registry: bool, yes: bool) -> Result<()> {
    if !yes {
        bail!("Reset deletes every tracked company and its history. Re-run with --yes to confirm.");
    }

    let store = config.open_store()?;
    let removed = store.reset()?;
    println!("✓ Removed {} companies", removed);

    if let Some(file) = reimport {
        drop(store);
        run_import(config, file, use_registry)?;
    }
    Ok(())
}

fn run_stats(config: &Config) -> Result<()> {
    let store = config.open_store()?;
    let stats = store.stats()?;

    println!("🗄️  {}", config.db.display());
    println!("  Companies:   {}", stats.total_companies);
    println!("  Filed:       {}", stats.filed_count);
    println!("  Not filed:   {}", stats.unfiled_count);
    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &Config) -> Result<()> {
    if !config.db.exists() {
        eprintln!("❌ Database not found: {}", config.db.display());
        eprintln!("   Run: accounts-tracker import <file>");
        eprintln!("   to import companies first.");
        std::process::exit(1);
    }

    let store = config.open_store()?;
    let mut app = ui::App::new(&store, config.cutoff(), Local::now().date_naive())?;
    ui::run_ui(&mut app)?;

    println!("\n✅ Dashboard closed");
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &Config) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin accounts-server --features server");
    std::process::exit(1);
}
