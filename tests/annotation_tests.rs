use std::fs;

use chrono::{DateTime, Duration, TimeZone, Utc};
use seegprep::annotations::DEFAULT_EVENT_LABEL;
use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};
use seegprep::{align_events, attach_events, read_event_table, Channel, EventRow, EventTableOptions, Recording, SeegError};
use tempfile::tempdir;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2017, 4, 23, 12, 53, 28).unwrap()
}

fn at(seconds: i64) -> DateTime<Utc> {
    start() + Duration::seconds(seconds)
}

fn labels(rows: &[EventRow]) -> Vec<String> {
    align_events(start(), rows)
        .unwrap()
        .into_iter()
        .map(|a| a.description)
        .collect()
}

#[test]
fn test_forward_fill_of_sentinel_labels() {
    let rows = vec![
        EventRow::new(at(1), at(2), "A"),
        EventRow::new(at(3), at(4), "-1"),
        EventRow::new(at(5), at(6), "-1"),
        EventRow::new(at(7), at(8), "B"),
    ];
    assert_eq!(labels(&rows), vec!["A", "A", "A", "B"]);
}

#[test]
fn test_onsets_and_durations_are_relative_to_start() {
    let rows = vec![
        EventRow::new(at(-10), at(-9), "before"),
        EventRow::new(at(12), at(15), "A"),
        EventRow::new(start() + Duration::milliseconds(1500), at(2), "B"),
    ];
    let annotations = align_events(start(), &rows).unwrap();

    assert_eq!(annotations.len(), 2);
    assert_eq!(annotations[0].description, "B");
    assert_eq!(annotations[0].onset, 15_000_000);
    assert_eq!(annotations[0].duration, Some(5_000_000));
    assert_eq!(annotations[1].onset_seconds(), 12.0);
    assert_eq!(annotations[1].duration_seconds(), Some(3.0));
    assert!(annotations.iter().all(|a| a.onset >= 0));
}

#[test]
fn test_identical_onsets_keep_first_row() {
    let rows = vec![
        EventRow::new(at(1), at(2), "first"),
        EventRow::new(at(1), at(3), "second"),
        EventRow::new(at(4), at(5), "third"),
    ];
    let annotations = align_events(start(), &rows).unwrap();
    assert_eq!(annotations.len(), 2);
    assert_eq!(annotations[0].description, "first");
    assert_eq!(annotations[0].duration, Some(10_000_000));
    assert_eq!(annotations[1].description, "third");
}

#[test]
fn test_first_label_sentinel_is_fatal() {
    let rows = vec![
        EventRow::new(at(1), at(2), "-1"),
        EventRow::new(at(3), at(4), "A"),
    ];
    let err = align_events(start(), &rows).unwrap_err();
    assert!(matches!(err, SeegError::UnresolvedLabel(_)));
    assert!(err.is_data_error());
}

#[test]
fn test_negative_duration_is_kept() {
    let rows = vec![
        EventRow::new(at(5), at(4), "reversed"),
        EventRow::new(at(6), at(6) - Duration::nanoseconds(100), "tick"),
    ];
    let annotations = align_events(start(), &rows).unwrap();

    assert_eq!(annotations[0].duration, Some(-10_000_000));
    assert_eq!(annotations[0].duration_seconds(), Some(-1.0));
    assert_eq!(annotations[1].duration, Some(-1));
    assert_eq!(annotations[1].duration_seconds(), Some(-1e-7));
}

#[test]
fn test_all_rows_before_start() {
    let rows = vec![EventRow::new(at(-3), at(-2), "-1")];
    assert!(align_events(start(), &rows).unwrap().is_empty());
}

#[test]
fn test_attach_replaces_annotation_set() {
    let mut recording = Recording::new(vec![Channel::new("TIP1", "uV", vec![0.0; 16])], 8.0, start()).unwrap();
    recording.set_annotations(vec![seegprep::Annotation::from_seconds(0.5, None, "old")]);

    let rows = vec![EventRow::new(at(1), at(2), "new")];
    assert_eq!(attach_events(&mut recording, &rows).unwrap(), 1);
    assert_eq!(recording.annotations().len(), 1);
    assert_eq!(recording.annotations()[0].description, "new");
}

#[test]
fn test_read_event_table_csv() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.csv");
    fs::write(
        &path,
        "\u{feff}Begin,End,Text,Comment\n\
         23/04/2017 12:53:30,23/04/2017 12:53:31.250,TIP1-TIP2 1mA,ok\n\
         \n\
         24/04/2017 08:00,24/04/2017 08:01, -1 ,\n",
    )
    .unwrap();

    let rows = read_event_table(&path, &EventTableOptions::default()).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].begin, at(2));
    assert_eq!(rows[0].end, at(3) + Duration::milliseconds(250));
    assert_eq!(rows[0].text, "TIP1-TIP2 1mA");
    assert_eq!(rows[1].begin, Utc.with_ymd_and_hms(2017, 4, 24, 8, 0, 0).unwrap());
    assert_eq!(rows[1].text, "-1");

    let annotations = align_events(start(), &rows).unwrap();
    assert_eq!(annotations[1].description, "TIP1-TIP2 1mA");
}

#[test]
fn test_read_event_table_without_text_column() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.csv");
    fs::write(&path, "Begin;End\n23/04/2017 12:53:30;23/04/2017 12:53:31\n").unwrap();

    let options = EventTableOptions {
        delimiter: b';',
        ..EventTableOptions::default()
    };
    let rows = read_event_table(&path, &options).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].text, DEFAULT_EVENT_LABEL);
}

#[test]
fn test_read_event_table_errors() {
    let dir = tempdir().unwrap();

    let missing = dir.path().join("missing.csv");
    assert!(matches!(
        read_event_table(&missing, &EventTableOptions::default()),
        Err(SeegError::FileNotFound(_))
    ));

    let no_end = dir.path().join("no_end.csv");
    fs::write(&no_end, "Begin,Text\n23/04/2017 12:53:30,A\n").unwrap();
    match read_event_table(&no_end, &EventTableOptions::default()) {
        Err(SeegError::MissingColumn(column)) => assert_eq!(column, "End"),
        other => panic!("expected MissingColumn, got {:?}", other),
    }

    let bad_time = dir.path().join("bad_time.csv");
    fs::write(&bad_time, "Begin,End,Text\nyesterday,23/04/2017 12:53:30,A\n").unwrap();
    assert!(matches!(
        read_event_table(&bad_time, &EventTableOptions::default()),
        Err(SeegError::InvalidTimestamp(_))
    ));
}

fn excel_time(day: u8, hour: u16, min: u8, sec: f64) -> ExcelDateTime {
    ExcelDateTime::from_ymd(2017, 4, day).unwrap().and_hms(hour, min, sec).unwrap()
}

#[test]
fn test_read_event_table_xlsx() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.xlsx");

    let date_format = Format::new().set_num_format("dd/mm/yyyy hh:mm:ss");
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "Begin").unwrap();
    sheet.write_string(0, 1, "End").unwrap();
    sheet.write_string(0, 2, " Text ").unwrap();
    sheet.write_string(0, 3, "Comment").unwrap();

    // 日期单元格和文本单元格混用，第 2 行留空
    sheet.write_datetime_with_format(1, 0, &excel_time(23, 12, 53, 30.0), &date_format).unwrap();
    sheet.write_string(1, 1, "23/04/2017 12:53:31.250").unwrap();
    sheet.write_string(1, 2, "TIP1-TIP2 1mA").unwrap();
    sheet.write_string(1, 3, "ok").unwrap();
    sheet.write_datetime_with_format(3, 0, &excel_time(24, 8, 0, 0.0), &date_format).unwrap();
    sheet.write_datetime_with_format(3, 1, &excel_time(24, 8, 1, 0.5), &date_format).unwrap();
    sheet.write_number(3, 2, -1.0).unwrap();
    workbook.save(&path).unwrap();

    let rows = read_event_table(&path, &EventTableOptions::default()).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].begin, at(2));
    assert_eq!(rows[0].end, at(3) + Duration::milliseconds(250));
    assert_eq!(rows[0].text, "TIP1-TIP2 1mA");
    assert_eq!(rows[1].begin, Utc.with_ymd_and_hms(2017, 4, 24, 8, 0, 0).unwrap());
    assert_eq!(rows[1].end, Utc.with_ymd_and_hms(2017, 4, 24, 8, 1, 0).unwrap() + Duration::milliseconds(500));
    assert_eq!(rows[1].text, "-1");

    let annotations = align_events(start(), &rows).unwrap();
    assert_eq!(annotations[1].description, "TIP1-TIP2 1mA");
    assert_eq!(annotations[1].duration, Some(5_000_000));
}

#[test]
fn test_read_event_table_xlsx_errors() {
    let dir = tempdir().unwrap();

    let no_end = dir.path().join("no_end.xlsx");
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "Begin").unwrap();
    sheet.write_string(0, 1, "Text").unwrap();
    sheet.write_string(1, 0, "23/04/2017 12:53:30").unwrap();
    sheet.write_string(1, 1, "A").unwrap();
    workbook.save(&no_end).unwrap();
    match read_event_table(&no_end, &EventTableOptions::default()) {
        Err(SeegError::MissingColumn(column)) => assert_eq!(column, "End"),
        other => panic!("expected MissingColumn, got {:?}", other),
    }

    let bad_time = dir.path().join("bad_time.xlsx");
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "Begin").unwrap();
    sheet.write_string(0, 1, "End").unwrap();
    sheet.write_string(1, 0, "yesterday").unwrap();
    sheet.write_string(1, 1, "23/04/2017 12:53:30").unwrap();
    workbook.save(&bad_time).unwrap();
    assert!(matches!(
        read_event_table(&bad_time, &EventTableOptions::default()),
        Err(SeegError::InvalidTimestamp(_))
    ));

    // 扩展名为 .xlsx 但内容不是工作簿
    let not_a_workbook = dir.path().join("events.XLSX");
    fs::write(&not_a_workbook, "Begin,End\n").unwrap();
    assert!(matches!(
        read_event_table(&not_a_workbook, &EventTableOptions::default()),
        Err(SeegError::Spreadsheet(_))
    ));
}
