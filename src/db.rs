// 🗄️ Company Store - SQLite + WAL
// Single keyed table of companies plus an append-only audit trail.
//
// Every mutation runs in its own transaction together with its audit event,
// so each update is atomic per record. Nothing here ever writes a NULL
// deadline: the column is NOT NULL and only typed dates are bound.

use crate::company::{Company, InternalStatus, DATE_FORMAT};
use crate::error::{Result, TrackerError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Who performed a mutation (recorded in the audit trail)
pub const ACTOR_IMPORT: &str = "import";
pub const ACTOR_USER: &str = "user";
pub const ACTOR_RECONCILIATION: &str = "reconciliation";

const SQLITE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const COMPANY_COLUMNS: &str =
    "company_number, company_name, filing_deadline, internal_status, accounts_filed_ch, last_updated";

/// Event for audit trail (every change is an event)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub company_number: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(event_type: &str, company_number: &str, data: serde_json::Value, actor: &str) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            company_number: company_number.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Result of a reconciliation write-through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteThrough {
    /// Deadline or filed state changed and was committed
    Updated,
    /// Stored values already matched; nothing written
    Unchanged,
    /// No company with that number
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub total_companies: i64,
    pub filed_count: i64,
    pub unfiled_count: i64,
}

pub struct CompanyStore {
    conn: Connection,
}

impl CompanyStore {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(CompanyStore { conn })
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Insert-only: an existing number is left completely untouched.
    /// Returns true when the company was inserted.
    pub fn upsert_if_absent(&self, company: &Company) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO companies (
                company_number, company_name, filing_deadline,
                internal_status, accounts_filed_ch, last_updated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                company.number,
                company.name,
                company.deadline_str(),
                company.internal_status.as_str(),
                company.filed_with_registry,
                company.last_updated.to_rfc3339(),
            ],
        )? > 0;

        if inserted {
            insert_event(
                &tx,
                &Event::new(
                    "company_imported",
                    &company.number,
                    serde_json::json!({
                        "name": company.name,
                        "filing_deadline": company.deadline_str(),
                    }),
                    ACTOR_IMPORT,
                ),
            )?;
        }
        tx.commit()?;

        Ok(inserted)
    }

    /// Validates `status` against the fixed enum before touching storage.
    /// Returns false when the company does not exist.
    pub fn set_internal_status(&self, number: &str, status: &str) -> Result<bool> {
        let status: InternalStatus = status.parse()?;
        self.set_status(number, status)
    }

    pub fn set_status(&self, number: &str, status: InternalStatus) -> Result<bool> {
        self.update_with_event(
            "UPDATE companies SET internal_status = ?1, last_updated = ?2 WHERE company_number = ?3",
            status.as_str(),
            number,
            Event::new(
                "status_changed",
                number,
                serde_json::json!({ "status": status.as_str() }),
                ACTOR_USER,
            ),
        )
    }

    pub fn set_filing_deadline(&self, number: &str, deadline: NaiveDate) -> Result<bool> {
        let deadline = deadline.format(DATE_FORMAT).to_string();
        self.update_with_event(
            "UPDATE companies SET filing_deadline = ?1, last_updated = ?2 WHERE company_number = ?3",
            &deadline,
            number,
            Event::new(
                "deadline_updated",
                number,
                serde_json::json!({ "filing_deadline": deadline }),
                ACTOR_RECONCILIATION,
            ),
        )
    }

    pub fn set_filed_state(&self, number: &str, filed: bool) -> Result<bool> {
        self.update_with_event(
            "UPDATE companies SET accounts_filed_ch = ?1, last_updated = ?2 WHERE company_number = ?3",
            filed,
            number,
            Event::new(
                "filed_state_updated",
                number,
                serde_json::json!({ "filed": filed }),
                ACTOR_RECONCILIATION,
            ),
        )
    }

    /// Write a positive resolution (deadline + filed state) in one statement.
    /// Skips the write entirely when the stored values already match, so a
    /// repeated reconciliation leaves the row byte-identical.
    pub fn record_resolution(&self, number: &str, deadline: NaiveDate, filed: bool) -> Result<WriteThrough> {
        self.write_through(number, Some(deadline), filed)
    }

    /// Filed-state-only variant of `record_resolution`; the deadline is left alone
    pub fn record_filed_state(&self, number: &str, filed: bool) -> Result<WriteThrough> {
        self.write_through(number, None, filed)
    }

    fn write_through(&self, number: &str, deadline: Option<NaiveDate>, filed: bool) -> Result<WriteThrough> {
        let tx = self.conn.unchecked_transaction()?;

        let current: Option<(String, bool)> = tx
            .query_row(
                "SELECT filing_deadline, accounts_filed_ch FROM companies WHERE company_number = ?1",
                [number],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let outcome = match current {
            None => WriteThrough::Missing,
            Some((stored_deadline, stored_filed)) => {
                let new_deadline = deadline
                    .map(|d| d.format(DATE_FORMAT).to_string())
                    .unwrap_or_else(|| stored_deadline.clone());

                if new_deadline == stored_deadline && filed == stored_filed {
                    WriteThrough::Unchanged
                } else {
                    tx.execute(
                        "UPDATE companies
                         SET filing_deadline = ?1, accounts_filed_ch = ?2, last_updated = ?3
                         WHERE company_number = ?4",
                        params![new_deadline, filed, Utc::now().to_rfc3339(), number],
                    )?;
                    let event_type = if new_deadline != stored_deadline {
                        "deadline_updated"
                    } else {
                        "filed_state_updated"
                    };
                    insert_event(
                        &tx,
                        &Event::new(
                            event_type,
                            number,
                            serde_json::json!({
                                "previous_deadline": stored_deadline,
                                "filing_deadline": new_deadline,
                                "previous_filed": stored_filed,
                                "filed": filed,
                            }),
                            ACTOR_RECONCILIATION,
                        ),
                    )?;
                    WriteThrough::Updated
                }
            }
        };
        tx.commit()?;

        Ok(outcome)
    }

    /// Delete every company and audit event. Returns the number of companies removed.
    pub fn reset(&self) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute("DELETE FROM companies", [])?;
        tx.execute("DELETE FROM events", [])?;
        tx.commit()?;
        Ok(removed)
    }

    fn update_with_event<V: rusqlite::ToSql>(
        &self,
        sql: &str,
        value: V,
        number: &str,
        event: Event,
    ) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let updated = tx.execute(sql, params![value, Utc::now().to_rfc3339(), number])? > 0;
        if updated {
            insert_event(&tx, &event)?;
        }
        tx.commit()?;
        Ok(updated)
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn get(&self, number: &str) -> Result<Company> {
        self.find(number)?
            .ok_or_else(|| TrackerError::NotFound(format!("company {}", number)))
    }

    pub fn find(&self, number: &str) -> Result<Option<Company>> {
        let company = self
            .conn
            .query_row(
                &format!("SELECT {} FROM companies WHERE company_number = ?1", COMPANY_COLUMNS),
                [number],
                company_from_row,
            )
            .optional()?;
        Ok(company)
    }

    /// All companies, earliest deadline first
    pub fn list_all(&self) -> Result<Vec<Company>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM companies ORDER BY filing_deadline ASC, company_number ASC",
            COMPANY_COLUMNS
        ))?;
        let companies = stmt
            .query_map([], company_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(companies)
    }

    /// Case-insensitive substring search on name or number.
    /// Filtering happens in Rust so LIKE wildcards in `term` are literal.
    pub fn search(&self, term: &str) -> Result<Vec<Company>> {
        let companies = self.list_all()?;
        Ok(companies.into_iter().filter(|c| c.matches(term)).collect())
    }

    /// `search` for non-empty terms, `list_all` otherwise
    pub fn view(&self, term: Option<&str>) -> Result<Vec<Company>> {
        match term.map(str::trim) {
            Some(t) if !t.is_empty() => self.search(t),
            _ => self.list_all(),
        }
    }

    pub fn numbers(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT company_number FROM companies ORDER BY filing_deadline ASC, company_number ASC")?;
        let numbers = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(numbers)
    }

    pub fn stats(&self) -> Result<DatabaseStats> {
        let (total, filed): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN accounts_filed_ch = 1 THEN 1 ELSE 0 END), 0)
             FROM companies",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(DatabaseStats {
            total_companies: total,
            filed_count: filed,
            unfiled_count: total - filed,
        })
    }

    /// Audit events for a company, newest first
    pub fn events_for(&self, number: &str) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, timestamp, event_type, company_number, data, actor
             FROM events
             WHERE company_number = ?1
             ORDER BY id DESC",
        )?;

        let events = stmt
            .query_map([number], |row| {
                let timestamp_str: String = row.get(1)?;
                let data_json: String = row.get(4)?;

                Ok(Event {
                    event_id: row.get(0)?,
                    timestamp: parse_timestamp(&timestamp_str, 1)?,
                    event_type: row.get(2)?,
                    company_number: row.get(3)?,
                    data: serde_json::from_str(&data_json)
                        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
                    actor: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(events)
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS companies (
            company_number TEXT PRIMARY KEY,
            company_name TEXT NOT NULL,
            filing_deadline TEXT NOT NULL,
            internal_status TEXT NOT NULL DEFAULT 'Not Started',
            accounts_filed_ch INTEGER NOT NULL DEFAULT 0,
            last_updated TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            company_number TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_filing_deadline ON companies(filing_deadline)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_company ON events(company_number)",
        [],
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, company_number, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.company_number,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

fn company_from_row(row: &Row<'_>) -> rusqlite::Result<Company> {
    let deadline_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let updated_str: String = row.get(5)?;

    Ok(Company {
        number: row.get(0)?,
        name: row.get(1)?,
        filing_deadline: parse_deadline(&deadline_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?,
        internal_status: status_str
            .parse()
            .map_err(|e: TrackerError| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?,
        filed_with_registry: row.get(4)?,
        last_updated: parse_timestamp(&updated_str, 5)?,
    })
}

/// Plain date, or the date part of a stored timestamp
fn parse_deadline(s: &str) -> chrono::ParseResult<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), DATE_FORMAT)
}

/// RFC 3339 as written by this store, or SQLite's `CURRENT_TIMESTAMP`
/// form (`YYYY-MM-DD HH:MM:SS`, UTC) found in databases created elsewhere.
fn parse_timestamp(s: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(s.trim(), SQLITE_TIMESTAMP_FORMAT).map(|dt| dt.and_utc()))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
