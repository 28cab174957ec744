//! Tabular upload parsing for CSV and Excel (.xlsx/.xlsm/.xls/.xlsb/.ods).

use crate::error::EngineError;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{Duration, NaiveDate, Timelike};
use std::io::Cursor;

/// One data row with its 1-based spreadsheet row number (header = row 1).
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    pub number: usize,
    pub cells: Vec<String>,
}

impl SheetRow {
    pub fn cell(&self, idx: usize) -> &str {
        self.cells.get(idx).map(|c| c.as_str()).unwrap_or("")
    }
}

/// The sheet chosen for import: trimmed headers plus non-blank data rows.
#[derive(Debug, Clone)]
pub struct ParsedSheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<SheetRow>,
}

/// Dispatch upload parsing by extension.
///
/// For workbooks, `preferred_sheet` is used when present, otherwise the first sheet.
pub fn parse_upload(
    filename: &str,
    data: &[u8],
    preferred_sheet: Option<&str>,
) -> Result<ParsedSheet, EngineError> {
    let ext = filename
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "csv" => parse_csv(filename, data),
        // A zero-byte upload is an empty sheet, not a broken workbook.
        "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" if data.is_empty() => Ok(ParsedSheet {
            name: preferred_sheet.unwrap_or_default().to_string(),
            headers: Vec::new(),
            rows: Vec::new(),
        }),
        "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => parse_workbook(data, preferred_sheet),
        _ => Err(EngineError::UnsupportedFormat(ext)),
    }
}

/// Parse a CSV file. The first record is the header row.
fn parse_csv(filename: &str, data: &[u8]) -> Result<ParsedSheet, EngineError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_reader(data);

    let mut headers = Vec::new();
    let mut rows = Vec::new();

    for (idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| EngineError::FileRead(format!("Invalid CSV: {}", e)))?;
        // The reader skips empty lines and quoted fields may span lines,
        // so the record's starting line is the spreadsheet row.
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(idx + 1);
        let cells: Vec<String> = record.iter().map(|f| f.trim().to_string()).collect();

        if idx == 0 {
            headers = cells
                .into_iter()
                .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
                .collect();
            continue;
        }

        push_if_not_blank(&mut rows, line, cells);
    }

    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim_end_matches(".csv")
        .to_string();

    Ok(ParsedSheet {
        name,
        headers,
        rows,
    })
}

/// Parse one worksheet of any workbook format calamine understands.
fn parse_workbook(data: &[u8], preferred_sheet: Option<&str>) -> Result<ParsedSheet, EngineError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(data))
        .map_err(|e| EngineError::FileRead(format!("Failed to open workbook: {}", e)))?;

    let sheet_names = workbook.sheet_names();
    let name = match preferred_sheet {
        Some(wanted) if sheet_names.iter().any(|n| n == wanted) => wanted.to_string(),
        _ => sheet_names
            .first()
            .cloned()
            .ok_or_else(|| EngineError::FileRead("Workbook has no sheets".to_string()))?,
    };

    if preferred_sheet.is_some_and(|wanted| wanted != name) {
        tracing::debug!(
            "Sheet {:?} not found, falling back to first sheet '{}'",
            preferred_sheet,
            name
        );
    }

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| EngineError::FileRead(format!("Failed to read sheet '{}': {}", name, e)))?;

    Ok(range_to_sheet(&name, &range))
}

/// Convert a calamine Range into a ParsedSheet. First row = headers.
fn range_to_sheet(name: &str, range: &calamine::Range<Data>) -> ParsedSheet {
    // Row numbers are absolute: a range may start below row 1.
    let first_row = range.start().map(|(row, _)| row as usize + 1).unwrap_or(1);
    let mut row_iter = range.rows();

    let headers: Vec<String> = match row_iter.next() {
        Some(header_row) => header_row
            .iter()
            .map(|c| cell_to_string(c).trim().to_string())
            .collect(),
        None => Vec::new(),
    };

    let mut rows = Vec::new();
    for (offset, row) in row_iter.enumerate() {
        let cells: Vec<String> = row.iter().map(|c| cell_to_string(c).trim().to_string()).collect();
        push_if_not_blank(&mut rows, first_row + offset + 1, cells);
    }

    ParsedSheet {
        name: name.to_string(),
        headers,
        rows,
    }
}

fn push_if_not_blank(rows: &mut Vec<SheetRow>, number: usize, cells: Vec<String>) {
    if cells.iter().all(|c| c.is_empty()) {
        return;
    }
    rows.push(SheetRow { number, cells });
}

/// Convert a calamine cell to a string representation.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            // Avoid trailing ".0" for whole numbers
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                format!("{}", *f as i64)
            } else {
                format!("{}", f)
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_string(dt.as_f64()),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#ERR:{:?}", e),
    }
}

/// Largest serial Excel can display (9999-12-31 23:59:59.999).
const MAX_EXCEL_SERIAL: f64 = 2_958_466.0;

/// Convert an Excel serial date number to `YYYY-MM-DD[ HH:MM:SS]`.
/// Epoch 1899-12-30 absorbs the 1900 leap-year bug for every date after February 1900.
/// Serials outside Excel's date range are returned as plain numbers.
fn excel_serial_to_string(serial: f64) -> String {
    if !(0.0..MAX_EXCEL_SERIAL).contains(&serial) {
        return serial.to_string();
    }
    let millis = (serial * 86_400_000.0).round() as i64;
    let dt = NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .zip(Duration::try_milliseconds(millis))
        .and_then(|(base, offset)| base.checked_add_signed(offset));

    match dt {
        Some(dt) if dt.time().num_seconds_from_midnight() == 0 => dt.format("%Y-%m-%d").to_string(),
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => serial.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::xlsx_bytes;

    #[test]
    fn test_parse_csv_basic() {
        let csv_data = b"Name*, Price \nAlice,30\nBob,25\n";
        let sheet = parse_upload("uploads/services.csv", csv_data, None).unwrap();
        assert_eq!(sheet.name, "services");
        assert_eq!(sheet.headers, vec!["Name*", "Price"]);
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.rows[0].number, 2);
        assert_eq!(sheet.rows[1].cells, vec!["Bob", "25"]);
    }

    #[test]
    fn test_blank_rows_dropped_but_numbers_kept() {
        let csv_data = b"Name,Price\n,\nAlice,30\n , \nBob\n";
        let sheet = parse_upload("x.csv", csv_data, None).unwrap();
        let numbers: Vec<usize> = sheet.rows.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![3, 5]);
        assert_eq!(sheet.rows[1].cell(1), "");
    }

    #[test]
    fn test_csv_rows_numbered_by_source_line() {
        let csv_data = b"Name\n\nAlice\n\"multi\nline\"\nBob\n";
        let sheet = parse_upload("x.csv", csv_data, None).unwrap();
        let numbers: Vec<usize> = sheet.rows.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![3, 4, 6]);
        assert_eq!(sheet.rows[1].cells, vec!["multi\nline"]);
    }

    #[test]
    fn test_header_only_and_empty_csv() {
        let sheet = parse_upload("x.csv", b"Name,Price\n", None).unwrap();
        assert_eq!(sheet.headers.len(), 2);
        assert!(sheet.rows.is_empty());

        let sheet = parse_upload("x.csv", b"", None).unwrap();
        assert!(sheet.headers.is_empty());
        assert!(sheet.rows.is_empty());
    }

    #[test]
    fn test_workbook_prefers_named_sheet() {
        let bytes = xlsx_bytes(&[
            ("Instructions", vec![vec!["Read me"]]),
            ("Data", vec![vec!["Name*"], vec!["Alice"]]),
        ]);
        let sheet = parse_upload("t.xlsx", &bytes, Some("Data")).unwrap();
        assert_eq!(sheet.name, "Data");
        assert_eq!(sheet.headers, vec!["Name*"]);
        assert_eq!(sheet.rows[0].cells, vec!["Alice"]);

        let first = parse_upload("t.xlsx", &bytes, Some("Missing")).unwrap();
        assert_eq!(first.name, "Instructions");

        let first = parse_upload("t.xlsx", &bytes, None).unwrap();
        assert_eq!(first.name, "Instructions");
    }

    #[test]
    fn test_workbook_numbers_and_dates() {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Qty").unwrap();
        sheet.write_string(0, 1, "Price").unwrap();
        sheet.write_number(1, 0, 3.0).unwrap();
        sheet.write_number(1, 1, 2.5).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let parsed = parse_upload("n.xlsx", &bytes, None).unwrap();
        assert_eq!(parsed.rows[0].cells, vec!["3", "2.5"]);

        assert_eq!(excel_serial_to_string(45306.0), "2024-01-15");
        assert_eq!(excel_serial_to_string(45306.5), "2024-01-15 12:00:00");
    }

    #[test]
    fn test_serials_outside_excel_range_stay_numeric() {
        assert_eq!(excel_serial_to_string(-1e300), (-1e300f64).to_string());
        assert_eq!(excel_serial_to_string(1e300), (1e300f64).to_string());
        assert_eq!(excel_serial_to_string(-1.0), "-1");
        assert_eq!(excel_serial_to_string(f64::NAN), "NaN");
        assert_eq!(excel_serial_to_string(2_958_465.0), "9999-12-31");
    }

    #[test]
    fn test_zero_byte_workbook_is_empty_sheet() {
        let sheet = parse_upload("empty.xlsx", b"", Some("Data")).unwrap();
        assert_eq!(sheet.name, "Data");
        assert!(sheet.headers.is_empty());
        assert!(sheet.rows.is_empty());
    }

    #[test]
    fn test_unsupported_and_corrupt_files() {
        assert!(matches!(
            parse_upload("notes.txt", b"data", None),
            Err(EngineError::UnsupportedFormat(ext)) if ext == "txt"
        ));
        assert!(matches!(
            parse_upload("broken.xlsx", b"definitely not a zip", None),
            Err(EngineError::FileRead(_))
        ));
    }
}
