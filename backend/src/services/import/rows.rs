//! Reads an uploaded board sheet into `ImportRow` records.
//!
//! CSV exports are read with the `csv` crate; Excel and OpenDocument
//! workbooks with `calamine` (first sheet only). The first row is the header.
//! Header cells are matched case-insensitively, so columns may appear in any
//! order and unknown columns are ignored.

use crate::error::ImportError;
use calamine::{open_workbook_auto, Data, DataType, Reader};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::path::Path;

const COLUMN_NAME: &str = "column name";
const COLUMN_POSITION: &str = "column position";
const CARD_TITLE: &str = "card title";
const CARD_POSITION: &str = "card position";
const DESCRIPTION: &str = "description";
const LABELS: &str = "labels";
const ASSIGNEE_EMAIL: &str = "assignee email";
const DUE_DATE: &str = "due date (utc iso8601)";
const CHECKLIST_ITEMS: &str = "checklist items";
const CHECKLIST_STATES: &str = "checklist states";
const PRIORITY: &str = "priority";
const PARENT_CARD_TITLE: &str = "parent card title";

/// One sheet line: its 1-based row number and its cells.
pub(crate) type SheetLine = (u32, Vec<String>);

/// One data row of the sheet.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImportRow {
    /// 1-based spreadsheet row number; the header is usually row 1.
    pub row_index: u32,
    pub column_name: String,
    pub column_position: Option<i64>,
    pub card_title: String,
    pub card_position: Option<i64>,
    pub description: String,
    pub labels: Vec<String>,
    pub assignee_email: String,
    /// `None` when the cell is empty or not a date.
    pub due_date: Option<NaiveDate>,
    pub checklist_items: Vec<String>,
    pub checklist_states: Vec<bool>,
    pub priority: String,
    /// Title of the card this one hangs under. Empty when unset.
    pub parent_card_title: String,
}

impl ImportRow {
    /// Whether the row carries anything beyond its column.
    pub fn has_card_payload(&self) -> bool {
        !self.card_title.is_empty()
            || !self.description.trim().is_empty()
            || !self.labels.is_empty()
            || !self.assignee_email.is_empty()
            || self.due_date.is_some()
            || !self.checklist_items.is_empty()
    }
}

/// Reads every data row of the file at `path`, picking the reader by
/// extension.
pub fn read_rows(path: &Path) -> Result<Vec<ImportRow>, ImportError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => read_csv(path),
        "xlsx" | "xlsm" | "xls" | "ods" => read_workbook(path),
        other => Err(ImportError::UnsupportedFile(other.to_string())),
    }
}

fn read_csv(path: &Path) -> Result<Vec<ImportRow>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    // Empty lines never show up as records, so each record carries the line
    // it started on.
    let mut lines = Vec::new();
    let mut last_line = 0;
    for record in reader.records() {
        let record = record?;
        let line = record
            .position()
            .map(|pos| pos.line() as u32)
            .unwrap_or(last_line + 1);
        last_line = line;
        lines.push((line, record.iter().map(|cell| cell.to_string()).collect()));
    }
    Ok(rows_from_lines(lines))
}

fn read_workbook(path: &Path) -> Result<Vec<ImportRow>, ImportError> {
    let mut workbook = open_workbook_auto(path)?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range?,
        None => return Ok(Vec::new()),
    };

    // The range starts at the first used cell, not at A1.
    let first_row = range.start().map(|(row, _)| row + 1).unwrap_or(1);
    let lines = range
        .rows()
        .zip(first_row..)
        .map(|(row, number)| (number, row.iter().map(cell_text).collect()))
        .collect();
    Ok(rows_from_lines(lines))
}

/// Date-formatted cells hold a day serial; render them as `YYYY-MM-DD`.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_date()
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| cell.to_string()),
        _ => cell.to_string(),
    }
}

/// Maps sheet lines to rows. The first line is the header.
pub(crate) fn rows_from_lines(lines: Vec<SheetLine>) -> Vec<ImportRow> {
    let mut lines = lines.into_iter();
    let headers: HashMap<String, usize> = match lines.next() {
        Some((_, header)) => header
            .iter()
            .enumerate()
            .map(|(idx, title)| (title.trim().to_lowercase(), idx))
            .collect(),
        None => return Vec::new(),
    };

    lines
        .filter(|(_, cells)| cells.iter().any(|cell| !cell.trim().is_empty()))
        .map(|(row_index, cells)| {
            let cell = |name: &str| -> String {
                headers
                    .get(name)
                    .and_then(|&idx| cells.get(idx))
                    .cloned()
                    .unwrap_or_default()
            };
            ImportRow {
                row_index,
                column_name: cell(COLUMN_NAME).trim().to_string(),
                column_position: parse_position(&cell(COLUMN_POSITION)),
                card_title: cell(CARD_TITLE).trim().to_string(),
                card_position: parse_position(&cell(CARD_POSITION)),
                description: cell(DESCRIPTION),
                labels: split_list(&cell(LABELS)),
                assignee_email: cell(ASSIGNEE_EMAIL).trim().to_string(),
                due_date: parse_due_date(&cell(DUE_DATE)),
                checklist_items: split_list(&cell(CHECKLIST_ITEMS)),
                checklist_states: split_states(&cell(CHECKLIST_STATES)),
                priority: cell(PRIORITY).trim().to_string(),
                parent_card_title: cell(PARENT_CARD_TITLE).trim().to_string(),
            }
        })
        .collect()
}

/// Positions that do not parse are treated as absent.
fn parse_position(value: &str) -> Option<i64> {
    let value = value.trim();
    value
        .parse::<i64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().filter(|f| f.fract() == 0.0).map(|f| f as i64))
}

/// Accepts an RFC 3339 instant (converted to its UTC date) or a plain
/// `YYYY-MM-DD` date. Anything else is treated as no due date.
fn parse_due_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .map(|instant| instant.with_timezone(&Utc).date_naive())
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .ok()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn split_states(value: &str) -> Vec<bool> {
    if value.trim().is_empty() {
        return Vec::new();
    }
    value
        .split(';')
        .map(|part| part.trim().eq_ignore_ascii_case("true"))
        .collect()
}
