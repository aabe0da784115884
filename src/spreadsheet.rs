// 📥 Spreadsheet Import / Export
// Client roster in, current view out. Same four columns both ways, as CSV
// or as an Excel workbook.
//
// Import is insert-only: numbers already in the store are counted and left
// alone. A row with no usable deadline from either source is skipped,
// never stored with a placeholder.

use crate::company::{Company, DATE_FORMAT};
use crate::db::CompanyStore;
use crate::error::{Result, TrackerError};
use crate::reconciliation::{compose_deadline, ReconciliationEngine};
use crate::registry::RegistryClient;
use calamine::{open_workbook_auto, open_workbook_auto_from_rs, Data, DataType, Reader, Sheets};
use chrono::{Datelike, NaiveDate};
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{Read, Seek, Write};
use std::path::Path;

pub const COL_NAME: &str = "Company_Name";
pub const COL_NUMBER: &str = "Company_Number";
pub const COL_DEADLINE: &str = "Filing_Deadline";
pub const COL_STATUS: &str = "Internal_Status";

// ============================================================================
// IMPORT TYPES
// ============================================================================

/// One roster row after header mapping
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRow {
    pub number: String,
    pub name: String,
    /// Supplied deadline, if the cell held something date-like
    pub deadline: Option<NaiveDate>,
    pub line_number: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub already_present: usize,
    pub from_registry: usize,
    pub from_sheet: usize,
    /// Numbers skipped because no deadline was available
    pub skipped: Vec<String>,
    /// Rows dropped for a blank number or name (line numbers)
    pub invalid_rows: Vec<usize>,
}

impl ImportSummary {
    pub fn summary(&self) -> String {
        format!(
            "Imported {} companies ({} from registry, {} from sheet) | {} already present, {} skipped without deadline, {} invalid rows",
            self.imported,
            self.from_registry,
            self.from_sheet,
            self.already_present,
            self.skipped.len(),
            self.invalid_rows.len()
        )
    }
}

// ============================================================================
// FORMATS
// ============================================================================

/// Roster file format, picked from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv,
    Workbook,
}

impl SheetFormat {
    /// Any extension calamine opens is a workbook; everything else is CSV
    pub fn from_path(path: &Path) -> Self {
        match extension(path).as_deref() {
            Some("xlsx" | "xlsm" | "xlsb" | "xls" | "ods") => SheetFormat::Workbook,
            _ => SheetFormat::Csv,
        }
    }

    /// Format for a file about to be written. Workbooks are written as xlsx only.
    pub fn for_output(path: &Path) -> Result<Self> {
        match (Self::from_path(path), extension(path).as_deref()) {
            (SheetFormat::Workbook, Some("xlsx")) => Ok(SheetFormat::Workbook),
            (SheetFormat::Workbook, _) => Err(TrackerError::Validation(format!(
                "cannot write {}: workbooks are written as .xlsx",
                path.display()
            ))),
            (SheetFormat::Csv, _) => Ok(SheetFormat::Csv),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension().and_then(|e| e.to_str()).map(str::to_lowercase)
}

// ============================================================================
// READING
// ============================================================================

/// Header positions of the import columns
struct ColumnMap {
    name: usize,
    number: usize,
    deadline: Option<usize>,
}

impl ColumnMap {
    /// `Company_Name` and `Company_Number` are always required;
    /// `Filing_Deadline` too when `require_deadline` is set.
    fn from_headers(headers: &[String], require_deadline: bool) -> Result<Self> {
        let column = |name: &str| headers.iter().position(|h| h.trim() == name);

        let mut required = vec![COL_NAME, COL_NUMBER];
        if require_deadline {
            required.push(COL_DEADLINE);
        }
        let missing: Vec<&str> = required.into_iter().filter(|c| column(*c).is_none()).collect();
        if !missing.is_empty() {
            return Err(TrackerError::Validation(format!(
                "Missing required columns: {}",
                missing.join(", ")
            )));
        }

        Ok(ColumnMap {
            name: column(COL_NAME).unwrap_or_default(),
            number: column(COL_NUMBER).unwrap_or_default(),
            deadline: column(COL_DEADLINE),
        })
    }

    fn row(&self, cells: &[String], line_number: usize) -> ImportRow {
        let cell = |idx: usize| cells.get(idx).map(|c| c.trim()).unwrap_or("").to_string();

        ImportRow {
            number: cell(self.number),
            name: cell(self.name),
            deadline: self.deadline.and_then(|idx| parse_sheet_date(&cell(idx))),
            line_number,
        }
    }
}

/// Read CSV roster rows. Missing columns fail the whole read before any
/// row is returned.
pub fn read_rows<R: Read>(reader: R, require_deadline: bool) -> Result<Vec<ImportRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let columns = ColumnMap::from_headers(&headers, require_deadline)?;

    let mut rows = Vec::new();
    for (line_num, result) in reader.records().enumerate() {
        let record: StringRecord = result?;
        let cells: Vec<String> = record.iter().map(str::to_string).collect();
        rows.push(columns.row(&cells, line_num + 2)); // 1-indexed + header row
    }

    log::info!("Read {} roster rows", rows.len());
    Ok(rows)
}

/// Read roster rows from the first worksheet of an in-memory workbook
pub fn read_workbook_rows<RS: Read + Seek + Clone>(data: RS, require_deadline: bool) -> Result<Vec<ImportRow>> {
    let mut workbook = open_workbook_auto_from_rs(data)?;
    worksheet_rows(&mut workbook, require_deadline)
}

fn worksheet_rows<RS: Read + Seek>(workbook: &mut Sheets<RS>, require_deadline: bool) -> Result<Vec<ImportRow>> {
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| TrackerError::Validation("workbook has no worksheets".to_string()))??;

    // Ranges start at the first used cell, which is the header row
    let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);
    let mut sheet = range.rows();

    let headers: Vec<String> = sheet.next().map(|row| row.iter().map(cell_text).collect()).unwrap_or_default();
    let columns = ColumnMap::from_headers(&headers, require_deadline)?;

    let mut rows = Vec::new();
    for (idx, row) in sheet.enumerate() {
        if row.iter().all(|cell| matches!(cell, Data::Empty)) {
            continue;
        }
        let cells: Vec<String> = row.iter().map(cell_text).collect();
        rows.push(columns.row(&cells, first_row + idx + 2));
    }

    log::info!("Read {} roster rows from workbook", rows.len());
    Ok(rows)
}

/// Workbook cell as the text a CSV cell would hold
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_date()
            .map(|d| d.format(DATE_FORMAT).to_string())
            .unwrap_or_else(|| cell.to_string()),
        // Whole numbers typed into a text column come back as floats
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

/// Normalise a date-like cell. Accepts `YYYY-MM-DD`, a timestamp starting
/// with one (`2026-05-01 00:00:00`) or `DD/MM/YYYY`. Anything else is absent.
pub fn parse_sheet_date(raw: &str) -> Option<NaiveDate> {
    let first = raw.split_whitespace().next()?;
    let first = first.split('T').next().unwrap_or(first);

    NaiveDate::parse_from_str(first, DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(first, "%d/%m/%Y"))
        .ok()
}

// ============================================================================
// IMPORT
// ============================================================================

/// Import rows into the store. With a registry, new companies get the
/// registry deadline when it resolves and fall back to the sheet otherwise.
pub fn import_rows(
    store: &CompanyStore,
    rows: &[ImportRow],
    registry: Option<&dyn RegistryClient>,
    engine: &ReconciliationEngine,
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    let mut candidates = Vec::new();

    for row in rows {
        if row.number.is_empty() || row.name.is_empty() {
            log::warn!("Line {}: blank company number or name, row ignored", row.line_number);
            summary.invalid_rows.push(row.line_number);
            continue;
        }
        if store.find(&row.number)?.is_some() {
            summary.already_present += 1;
            continue;
        }
        candidates.push(row);
    }

    let resolved = registry.map(|registry| {
        let numbers: Vec<String> = candidates.iter().map(|r| r.number.clone()).collect();
        engine.resolve_deadlines(registry, &numbers)
    });

    for row in candidates {
        let registry_outcome = resolved.as_ref().and_then(|report| report.get(&row.number));
        let Some(deadline) = compose_deadline(row.deadline, registry_outcome) else {
            log::info!("Skipping {}: No deadline available", row.number);
            summary.skipped.push(row.number.clone());
            continue;
        };

        let from_registry = registry_outcome.and_then(|o| o.deadline()).is_some();
        if store.upsert_if_absent(&Company::new(row.number.as_str(), row.name.as_str(), deadline))? {
            summary.imported += 1;
            if from_registry {
                summary.from_registry += 1;
            } else {
                summary.from_sheet += 1;
            }
        } else {
            // Same number appeared earlier in this sheet
            summary.already_present += 1;
        }
    }

    log::info!("{}", summary.summary());
    Ok(summary)
}

/// Read and import a roster file (CSV or workbook, by extension). When the
/// registry is disabled the sheet must carry `Filing_Deadline`.
pub fn import_file(
    store: &CompanyStore,
    path: &Path,
    registry: Option<&dyn RegistryClient>,
    engine: &ReconciliationEngine,
) -> Result<ImportSummary> {
    let require_deadline = registry.is_none();
    let rows = match SheetFormat::from_path(path) {
        SheetFormat::Workbook => worksheet_rows(&mut open_workbook_auto(path)?, require_deadline)?,
        SheetFormat::Csv => read_rows(File::open(path)?, require_deadline)?,
    };
    import_rows(store, &rows, registry, engine)
}

// ============================================================================
// EXPORT
// ============================================================================

const EXPORT_COLUMNS: [&str; 4] = [COL_NAME, COL_NUMBER, COL_DEADLINE, COL_STATUS];

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    #[serde(rename = "Company_Name")]
    name: &'a str,
    #[serde(rename = "Company_Number")]
    number: &'a str,
    #[serde(rename = "Filing_Deadline")]
    filing_deadline: String,
    #[serde(rename = "Internal_Status")]
    internal_status: &'static str,
}

pub fn export_companies<W: Write>(companies: &[Company], writer: W) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(writer);

    if companies.is_empty() {
        writer.write_record(EXPORT_COLUMNS)?;
    }
    for company in companies {
        writer.serialize(ExportRow {
            name: &company.name,
            number: &company.number,
            filing_deadline: company.deadline_str(),
            internal_status: company.internal_status.as_str(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Same four columns as the CSV export, deadlines as real date cells
pub fn export_workbook(companies: &[Company]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let date_format = Format::new().set_num_format("yyyy-mm-dd");

    let worksheet = workbook.add_worksheet();
    for (col, title) in EXPORT_COLUMNS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *title, &bold)?;
    }
    for (idx, company) in companies.iter().enumerate() {
        let row = idx as u32 + 1;
        let deadline = company.filing_deadline;
        let cell_date = ExcelDateTime::from_ymd(deadline.year() as u16, deadline.month() as u8, deadline.day() as u8)?;

        worksheet.write_string(row, 0, company.name.as_str())?;
        worksheet.write_string(row, 1, company.number.as_str())?;
        worksheet.write_datetime_with_format(row, 2, &cell_date, &date_format)?;
        worksheet.write_string(row, 3, company.internal_status.as_str())?;
    }
    worksheet.set_column_width(0, 40)?;
    worksheet.set_column_width(2, 14)?;
    worksheet.set_column_width(3, 20)?;

    Ok(workbook.save_to_buffer()?)
}

/// Export to CSV, or to an xlsx workbook when the path ends in `.xlsx`
pub fn export_file(companies: &[Company], path: &Path) -> Result<()> {
    match SheetFormat::for_output(path)? {
        SheetFormat::Workbook => fs::write(path, export_workbook(companies)?)?,
        SheetFormat::Csv => export_companies(companies, File::create(path)?)?,
    }
    Ok(())
}

/// Empty roster with just the import headers
pub fn write_template_to<W: Write>(writer: W) -> Result<()> {
    let mut writer = WriterBuilder::new().from_writer(writer);
    writer.write_record([COL_NAME, COL_NUMBER, COL_DEADLINE])?;
    writer.flush()?;
    Ok(())
}

pub fn template_workbook() -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();

    let worksheet = workbook.add_worksheet();
    for (col, title) in [COL_NAME, COL_NUMBER, COL_DEADLINE].iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *title, &bold)?;
    }

    Ok(workbook.save_to_buffer()?)
}

pub fn write_template(path: &Path) -> Result<()> {
    match SheetFormat::for_output(path)? {
        SheetFormat::Workbook => fs::write(path, template_workbook()?)?,
        SheetFormat::Csv => write_template_to(File::create(path)?)?,
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
