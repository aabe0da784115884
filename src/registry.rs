// 🌐 Registry Client - Companies House company profile lookup
//
// One capability: fetch a company profile by number. 404 is a typed
// absence, everything else that goes wrong (timeout, 5xx, bad JSON, bad
// dates) is a transient error. Single attempt per call, no retries.

use crate::error::TrackerError;
use chrono::NaiveDate;
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.company-information.service.gov.uk";
pub const API_KEY_ENV: &str = "COMPANIES_HOUSE_API_KEY";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const REGISTRY_DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// PROFILE TYPES
// ============================================================================

/// Registry lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompanyStatus {
    Active,
    Dissolved,
    Liquidation,
    Receivership,
    Administration,
    Other(String),
}

impl CompanyStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "active" => CompanyStatus::Active,
            "dissolved" => CompanyStatus::Dissolved,
            "liquidation" => CompanyStatus::Liquidation,
            "receivership" => CompanyStatus::Receivership,
            "administration" => CompanyStatus::Administration,
            other => CompanyStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CompanyStatus::Active => "active",
            CompanyStatus::Dissolved => "dissolved",
            CompanyStatus::Liquidation => "liquidation",
            CompanyStatus::Receivership => "receivership",
            CompanyStatus::Administration => "administration",
            CompanyStatus::Other(s) => s,
        }
    }

    /// Statuses that carry no accounts-filing obligation
    pub fn is_exempt(&self) -> bool {
        matches!(
            self,
            CompanyStatus::Dissolved
                | CompanyStatus::Liquidation
                | CompanyStatus::Receivership
                | CompanyStatus::Administration
        )
    }
}

/// Normalized view of a registry response. Built fresh per lookup, never cached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedProfile {
    pub status: CompanyStatus,
    pub next_due: Option<NaiveDate>,
    pub overdue: bool,
    pub last_filed_date: Option<NaiveDate>,
    pub details: ProfileDetails,
}

/// Descriptive fields used only for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileDetails {
    pub company_name: Option<String>,
    pub company_type: Option<String>,
    pub date_of_creation: Option<String>,
    pub last_accounts_type: Option<String>,
    /// (day, month)
    pub accounting_reference_date: Option<(String, String)>,
    pub accounts_fields: Vec<String>,
}

impl ResolvedProfile {
    /// Bare profile with no accounts data
    pub fn new(status: CompanyStatus) -> Self {
        ResolvedProfile {
            status,
            next_due: None,
            overdue: false,
            last_filed_date: None,
            details: ProfileDetails::default(),
        }
    }

    pub fn with_next_due(mut self, next_due: NaiveDate) -> Self {
        self.next_due = Some(next_due);
        self
    }

    pub fn with_last_filed(mut self, made_up_to: NaiveDate) -> Self {
        self.last_filed_date = Some(made_up_to);
        self
    }

    pub fn overdue(mut self, overdue: bool) -> Self {
        self.overdue = overdue;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("company not found at registry")]
    NotFound,

    #[error("{0}")]
    Transient(String),
}

impl From<RegistryError> for TrackerError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound => TrackerError::NotFound("company not found at registry".to_string()),
            RegistryError::Transient(message) => TrackerError::Transient(message),
        }
    }
}

// ============================================================================
// CLIENT TRAIT
// ============================================================================

/// The registry capability. Implementations hold no mutable shared state,
/// so lookups for different companies may run in parallel.
pub trait RegistryClient: Send + Sync {
    fn fetch_profile(&self, number: &str) -> Result<ResolvedProfile, RegistryError>;
}

// ============================================================================
// COMPANIES HOUSE (HTTP)
// ============================================================================

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl RegistryConfig {
    /// Fails with a configuration error when the credential is absent or blank
    pub fn new(api_key: impl Into<String>) -> Result<Self, TrackerError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(TrackerError::Configuration(format!(
                "Companies House API key is required. Set {} environment variable.",
                API_KEY_ENV
            )));
        }

        Ok(RegistryConfig {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn from_env() -> Result<Self, TrackerError> {
        Self::new(std::env::var(API_KEY_ENV).unwrap_or_default())
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct CompaniesHouseClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl CompaniesHouseClient {
    pub fn new(config: RegistryConfig) -> Result<Self, TrackerError> {
        if config.api_key.trim().is_empty() {
            return Err(TrackerError::Configuration("empty Companies House API key".to_string()));
        }

        let base_url = Url::parse(&config.base_url).map_err(|e| {
            TrackerError::Configuration(format!("invalid registry url '{}': {}", config.base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(TrackerError::Configuration(format!(
                "registry url '{}' cannot be used as a base",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TrackerError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(CompaniesHouseClient {
            client,
            base_url,
            api_key: config.api_key,
        })
    }

    fn profile_url(&self, number: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("company").push(number);
        }
        url
    }
}

impl RegistryClient for CompaniesHouseClient {
    fn fetch_profile(&self, number: &str) -> Result<ResolvedProfile, RegistryError> {
        let url = self.profile_url(number);
        log::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .basic_auth(&self.api_key, Some(""))
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    RegistryError::Transient(format!("request timed out: {}", e))
                } else {
                    RegistryError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound);
        }
        if !status.is_success() {
            return Err(RegistryError::Transient(format!("registry returned HTTP {}", status)));
        }

        let body = response
            .text()
            .map_err(|e| RegistryError::Transient(format!("failed to read response body: {}", e)))?;
        parse_profile(&body)
    }
}

// ============================================================================
// RESPONSE PARSING
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawProfile {
    company_status: Option<String>,
    company_name: Option<String>,
    #[serde(rename = "type")]
    company_type: Option<String>,
    date_of_creation: Option<String>,
    accounts: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAccounts {
    next_due: Option<String>,
    #[serde(default)]
    overdue: Option<bool>,
    last_accounts: Option<RawLastAccounts>,
    accounting_reference_date: Option<RawReferenceDate>,
}

#[derive(Debug, Deserialize)]
struct RawLastAccounts {
    made_up_to: Option<String>,
    #[serde(rename = "type")]
    accounts_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReferenceDate {
    day: Option<String>,
    month: Option<String>,
}

/// Parse a `/company/{number}` JSON body. A body that is not the expected
/// shape is a transient error, never a silent "no deadline".
pub fn parse_profile(body: &str) -> Result<ResolvedProfile, RegistryError> {
    let raw: RawProfile = serde_json::from_str(body)
        .map_err(|e| RegistryError::Transient(format!("malformed registry response: {}", e)))?;

    let accounts_fields: Vec<String> = raw
        .accounts
        .as_ref()
        .map(|a| a.keys().cloned().collect())
        .unwrap_or_default();

    let accounts: RawAccounts = match raw.accounts {
        Some(map) => serde_json::from_value(serde_json::Value::Object(map))
            .map_err(|e| RegistryError::Transient(format!("malformed accounts section: {}", e)))?,
        None => RawAccounts::default(),
    };

    let (made_up_to, last_accounts_type) = match accounts.last_accounts {
        Some(last) => (last.made_up_to, last.accounts_type),
        None => (None, None),
    };

    Ok(ResolvedProfile {
        status: CompanyStatus::parse(raw.company_status.as_deref().unwrap_or("unknown")),
        next_due: parse_registry_date("accounts.next_due", accounts.next_due)?,
        overdue: accounts.overdue.unwrap_or(false),
        last_filed_date: parse_registry_date("accounts.last_accounts.made_up_to", made_up_to)?,
        details: ProfileDetails {
            company_name: raw.company_name,
            company_type: raw.company_type,
            date_of_creation: raw.date_of_creation,
            last_accounts_type,
            accounting_reference_date: accounts
                .accounting_reference_date
                .and_then(|r| Some((r.day?, r.month?))),
            accounts_fields,
        },
    })
}

fn parse_registry_date(field: &str, value: Option<String>) -> Result<Option<NaiveDate>, RegistryError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, REGISTRY_DATE_FORMAT)
            .map(Some)
            .map_err(|e| RegistryError::Transient(format!("invalid {} '{}': {}", field, s, e))),
    }
}

// ============================================================================
// STATIC REGISTRY (in-process)
// ============================================================================

/// In-memory registry with canned answers. Unknown numbers are NotFound.
/// Used for dry runs and tests; counts every lookup.
#[derive(Default)]
pub struct StaticRegistry {
    responses: HashMap<String, Result<ResolvedProfile, RegistryError>>,
    calls: AtomicUsize,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, number: &str, profile: ResolvedProfile) -> Self {
        self.responses.insert(number.to_string(), Ok(profile));
        self
    }

    pub fn with_error(mut self, number: &str, error: RegistryError) -> Self {
        self.responses.insert(number.to_string(), Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RegistryClient for StaticRegistry {
    fn fetch_profile(&self, number: &str) -> Result<ResolvedProfile, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(number)
            .cloned()
            .unwrap_or(Err(RegistryError::NotFound))
    }
}

// ============================================================================
// TESTS
// ============================================================================
