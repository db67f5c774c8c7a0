//! Event-log import and alignment.
//!
//! Clinical event logs are exported from the acquisition software as a
//! table with `Begin`, `End` and `Text` columns. [`align_events`] turns those
//! rows into [`Annotation`]s relative to a recording start:
//!
//! 1. rows that begin before the recording are dropped;
//! 2. onset = `Begin - start`, duration = `End - Begin`;
//! 3. rows are stably sorted by onset;
//! 4. the label `"-1"` (and a blank label) repeats the previous real label;
//! 5. of several rows with the same onset only the first is kept.

use std::path::Path;

use calamine::{open_workbook_auto, Data, DataType, Reader};
use chrono::{DateTime, SubsecRound, Utc};

use crate::error::{SeegError, Result};
use crate::recording::Recording;
use crate::types::Annotation;
use crate::utils::{parse_day_first_timestamp, time_delta};
use crate::MISSING_LABEL_SENTINEL;

/// Label given to every row when the table has no `Text` column.
pub const DEFAULT_EVENT_LABEL: &str = "ANNOT";

/// Extensions read as spreadsheets; anything else is delimited text.
const SPREADSHEET_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

static EMPTY_CELL: Data = Data::Empty;

/// One row of the event log.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub text: String,
}

impl EventRow {
    pub fn new(begin: DateTime<Utc>, end: DateTime<Utc>, text: &str) -> Self {
        EventRow {
            begin,
            end,
            text: text.to_string(),
        }
    }

    fn has_label(&self) -> bool {
        let text = self.text.trim();
        !text.is_empty() && text != MISSING_LABEL_SENTINEL
    }
}

/// How the event table file is laid out.
#[derive(Debug, Clone)]
pub struct EventTableOptions {
    /// Field delimiter of delimited-text tables. Spreadsheets ignore it.
    pub delimiter: u8,
    pub begin_column: String,
    pub end_column: String,
    pub text_column: String,
}

impl Default for EventTableOptions {
    fn default() -> Self {
        EventTableOptions {
            delimiter: b',',
            begin_column: "Begin".to_string(),
            end_column: "End".to_string(),
            text_column: "Text".to_string(),
        }
    }
}

/// Reads an event table exported from the clinical spreadsheet.
///
/// `.xlsx`, `.xlsm`, `.xlsb`, `.xls` and `.ods` files are read from their
/// first worksheet; any other file is read as delimited text. Text
/// timestamps are day-first, and both they and spreadsheet date cells are
/// interpreted as UTC. A missing text column labels every row
/// [`DEFAULT_EVENT_LABEL`].
///
/// # Errors
///
/// [`SeegError::MissingColumn`] when the begin or end column is absent,
/// [`SeegError::InvalidTimestamp`] for unparseable cells, and
/// [`SeegError::Csv`] / [`SeegError::Spreadsheet`] for malformed files.
pub fn read_event_table<P: AsRef<Path>>(path: P, options: &EventTableOptions) -> Result<Vec<EventRow>> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(SeegError::FileNotFound(path.display().to_string()));
    }

    let rows = if is_spreadsheet(path) {
        read_spreadsheet_table(path, options)?
    } else {
        read_delimited_table(path, options)?
    };

    log::info!("Read {} events from {}", rows.len(), path.display());
    Ok(rows)
}

fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SPREADSHEET_EXTENSIONS.iter().any(|s| ext.eq_ignore_ascii_case(s)))
        .unwrap_or(false)
}

/// Positions of the event columns in the header row.
struct EventColumns {
    begin: usize,
    end: usize,
    text: Option<usize>,
}

impl EventColumns {
    fn locate<'a, I>(headers: I, options: &EventTableOptions, path: &Path) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let headers: Vec<&str> = headers
            .into_iter()
            .map(|h| h.trim().trim_start_matches('\u{feff}'))
            .collect();
        let column = |name: &str| headers.iter().position(|h| *h == name);

        let begin = column(&options.begin_column)
            .ok_or_else(|| SeegError::MissingColumn(options.begin_column.clone()))?;
        let end = column(&options.end_column)
            .ok_or_else(|| SeegError::MissingColumn(options.end_column.clone()))?;
        let text = column(&options.text_column);
        if text.is_none() {
            log::warn!(
                "Event table {} has no '{}' column, labelling every event '{}'",
                path.display(),
                options.text_column,
                DEFAULT_EVENT_LABEL
            );
        }

        Ok(EventColumns { begin, end, text })
    }

    fn label(&self, text: Option<String>) -> String {
        match self.text {
            Some(_) => text.unwrap_or_default(),
            None => DEFAULT_EVENT_LABEL.to_string(),
        }
    }
}

fn read_delimited_table(path: &Path, options: &EventTableOptions) -> Result<Vec<EventRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let columns = EventColumns::locate(headers.iter(), options, path)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }

        let cell = |idx: usize| record.get(idx).unwrap_or("");
        let begin = parse_day_first_timestamp(cell(columns.begin))?;
        let end = parse_day_first_timestamp(cell(columns.end))?;
        let text = columns.label(columns.text.map(|idx| cell(idx).to_string()));

        rows.push(EventRow { begin, end, text });
    }
    Ok(rows)
}

fn read_spreadsheet_table(path: &Path, options: &EventTableOptions) -> Result<Vec<EventRow>> {
    let mut workbook = open_workbook_auto(path)?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range?,
        None => return Err(SeegError::InvalidFormat(format!("{} has no worksheet", path.display()))),
    };

    let mut sheet_rows = range.rows();
    let headers: Vec<String> = sheet_rows
        .next()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .unwrap_or_default();
    let columns = EventColumns::locate(headers.iter().map(String::as_str), options, path)?;

    let mut rows = Vec::new();
    for row in sheet_rows {
        if row.iter().all(|cell| cell.to_string().trim().is_empty()) {
            continue;
        }

        let cell = |idx: usize| row.get(idx).unwrap_or(&EMPTY_CELL);
        let begin = spreadsheet_timestamp(cell(columns.begin))?;
        let end = spreadsheet_timestamp(cell(columns.end))?;
        let text = columns.label(columns.text.map(|idx| cell(idx).to_string().trim().to_string()));

        rows.push(EventRow { begin, end, text });
    }
    Ok(rows)
}

/// Timestamp of a spreadsheet cell: date cells and serial numbers go
/// through calamine's conversion, text cells are parsed day-first.
fn spreadsheet_timestamp(cell: &Data) -> Result<DateTime<Utc>> {
    match cell {
        Data::String(text) => parse_day_first_timestamp(text),
        Data::DateTime(_) | Data::DateTimeIso(_) | Data::Float(_) | Data::Int(_) => cell
            .as_datetime()
            // 序列号换算只精确到毫秒
            .map(|naive| naive.round_subsecs(3).and_utc())
            .ok_or_else(|| SeegError::InvalidTimestamp(cell.to_string())),
        other => Err(SeegError::InvalidTimestamp(other.to_string())),
    }
}

/// Aligns event rows to a recording that starts at `start`.
///
/// # Errors
///
/// [`SeegError::UnresolvedLabel`] if the earliest retained row has no label
/// of its own to start the forward fill.
///
/// # Examples
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use seegprep::annotations::{align_events, EventRow};
///
/// let start = Utc.with_ymd_and_hms(2017, 4, 23, 12, 53, 28).unwrap();
/// let at = |s: u32| Utc.with_ymd_and_hms(2017, 4, 23, 12, 54, s).unwrap();
///
/// let rows = vec![
///     EventRow::new(at(0), at(1), "TIP1-TIP2 3mA"),
///     EventRow::new(at(5), at(6), "-1"),
/// ];
/// let annotations = align_events(start, &rows)?;
///
/// assert_eq!(annotations[1].description, "TIP1-TIP2 3mA");
/// assert_eq!(annotations[1].onset_seconds(), 37.0);
/// # Ok::<(), seegprep::SeegError>(())
/// ```
pub fn align_events(start: DateTime<Utc>, rows: &[EventRow]) -> Result<Vec<Annotation>> {
    let mut kept: Vec<(i64, i64, &EventRow)> = rows
        .iter()
        .filter(|row| row.begin >= start)
        .map(|row| (time_delta(&start, &row.begin), time_delta(&row.begin, &row.end), row))
        .collect();

    let dropped = rows.len() - kept.len();
    if dropped > 0 {
        log::info!("Dropped {} events that begin before the recording start", dropped);
    }

    // 稳定排序：相同onset保持表格顺序
    kept.sort_by_key(|(onset, _, _)| *onset);

    let mut annotations: Vec<Annotation> = Vec::with_capacity(kept.len());
    let mut previous_label: Option<&str> = None;

    for (onset, duration, row) in kept {
        let label = if row.has_label() {
            row.text.trim()
        } else {
            previous_label.ok_or_else(|| SeegError::UnresolvedLabel(row.text.clone()))?
        };
        previous_label = Some(label);

        if duration < 0 {
            log::warn!("Event '{}' at {} ends before it begins", label, row.begin);
        }

        if annotations.last().is_some_and(|last| last.onset == onset) {
            log::debug!("Dropping duplicate onset {} s ('{}')", onset as f64 / 1e7, label);
            continue;
        }

        annotations.push(Annotation {
            onset,
            duration: Some(duration),
            description: label.to_string(),
        });
    }

    Ok(annotations)
}

/// Aligns `rows` to `recording` and replaces its annotation set.
///
/// Returns the number of annotations attached.
pub fn attach_events(recording: &mut Recording, rows: &[EventRow]) -> Result<usize> {
    let annotations = align_events(recording.meas_date(), rows)?;
    let count = annotations.len();
    recording.set_annotations(annotations);
    log::info!("Attached {} annotations ({} rows in table)", count, rows.len());
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 4, 23, 12, 53, 28).unwrap()
    }

    fn at(offset_ms: i64) -> DateTime<Utc> {
        start() + chrono::Duration::milliseconds(offset_ms)
    }

    #[test]
    fn test_blank_label_is_filled_like_sentinel() {
        let rows = vec![
            EventRow::new(at(0), at(100), "A"),
            EventRow::new(at(1000), at(1100), "  "),
        ];
        let annotations = align_events(start(), &rows).unwrap();
        assert_eq!(annotations[1].description, "A");
    }

    #[test]
    fn test_row_at_exact_start_is_kept() {
        let rows = vec![EventRow::new(start(), at(500), "A")];
        let annotations = align_events(start(), &rows).unwrap();
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].onset, 0);
        assert_eq!(annotations[0].duration, Some(5_000_000));
    }

    #[test]
    fn test_fill_follows_onset_order_not_table_order() {
        let rows = vec![
            EventRow::new(at(2000), at(2100), "-1"),
            EventRow::new(at(1000), at(1100), "B"),
        ];
        let annotations = align_events(start(), &rows).unwrap();
        let labels: Vec<&str> = annotations.iter().map(|a| a.description.as_str()).collect();
        assert_eq!(labels, vec!["B", "B"]);
    }

    #[test]
    fn test_sentinel_before_start_does_not_count_as_first() {
        let rows = vec![
            EventRow::new(at(-5000), at(-4000), "-1"),
            EventRow::new(at(1000), at(1100), "A"),
        ];
        let annotations = align_events(start(), &rows).unwrap();
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].description, "A");
    }

    #[test]
    fn test_empty_table() {
        assert!(align_events(start(), &[]).unwrap().is_empty());
    }
}
