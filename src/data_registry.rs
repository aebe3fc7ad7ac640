//! Per-session table store.
//!
//! Each uploaded CSV or spreadsheet becomes a [`TableRecord`] holding a
//! polars `DataFrame`, keyed by file name. Queries read one or more of them
//! back as a single [`CombinedTable`] whose column names carry the source
//! file as a prefix.
//!
//! The csv crate checks the shape of delimited text (delimiter, ragged
//! rows); polars decides column types by strict casts, so a column is
//! numeric only when every non-empty cell parses.

use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use csv::{ReaderBuilder, Trim};
use polars::prelude::*;
use tracing::{debug, info};

use crate::types::{AppError, AppResult};

const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

#[derive(Debug, Clone)]
pub struct TableRecord {
    pub name: String,
    pub frame: DataFrame,
}

impl TableRecord {
    pub fn row_count(&self) -> usize {
        self.frame.height()
    }

    pub fn columns(&self) -> Vec<String> {
        column_names(&self.frame)
    }
}

/// Tables joined side by side, columns named `<file>_<column>`
#[derive(Debug, Clone)]
pub struct CombinedTable {
    frame: DataFrame,
}

impl CombinedTable {
    pub fn new(frame: DataFrame) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn row_count(&self) -> usize {
        self.frame.height()
    }

    pub fn columns(&self) -> Vec<String> {
        column_names(&self.frame)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.frame.get_column_index(name).is_some()
    }

    /// Up to `limit` rows from `offset`, each cell rendered as text; nulls are empty
    pub fn text_rows(&self, offset: usize, limit: usize) -> Vec<Vec<String>> {
        let page = self.frame.slice(offset as i64, limit);
        (0..page.height())
            .map(|i| {
                page.get_columns()
                    .iter()
                    .map(|s| s.get(i).map(|v| cell_text(&v)).unwrap_or_default())
                    .collect()
            })
            .collect()
    }
}

fn column_names(frame: &DataFrame) -> Vec<String> {
    frame.get_column_names().into_iter().map(str::to_string).collect()
}

/// A cell as plain text: strings unquoted, nulls empty
pub fn cell_text(value: &AnyValue) -> String {
    match value {
        AnyValue::Null => String::new(),
        other => match other.get_str() {
            Some(s) => s.to_string(),
            None => other.to_string(),
        },
    }
}

#[derive(Debug, Clone, Default)]
pub struct TableStore {
    tables: BTreeMap<String, TableRecord>,
}

impl TableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an upload and keep it under `file_name`, replacing any table of
    /// the same name. Nothing is stored when parsing fails.
    pub fn ingest(&mut self, bytes: &[u8], file_name: &str) -> AppResult<&TableRecord> {
        let record = parse_table(bytes, file_name)?;
        Ok(self.insert(record))
    }

    /// Keep an already parsed table, replacing any table of the same name
    pub fn insert(&mut self, record: TableRecord) -> &TableRecord {
        info!(
            file = %record.name,
            columns = record.frame.width(),
            rows = record.row_count(),
            "Table loaded"
        );
        let name = record.name.clone();
        self.tables.insert(name.clone(), record);
        &self.tables[&name]
    }

    /// Concatenate the named tables column-wise, in the order given.
    /// Shorter tables are padded with nulls up to the tallest one.
    pub fn get(&self, names: &[String]) -> AppResult<CombinedTable> {
        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            let table = self
                .tables
                .get(name)
                .ok_or_else(|| AppError::NotFound(format!("Table {}", name)))?;
            selected.push(table);
        }

        let height = selected.iter().map(|t| t.row_count()).max().unwrap_or(0);
        let mut columns: Vec<Series> = Vec::new();
        for table in &selected {
            for series in table.frame.get_columns() {
                let mut series = if series.len() < height {
                    series
                        .extend_constant(AnyValue::Null, height - series.len())
                        .map_err(|e| AppError::Internal(format!("padding {}: {}", table.name, e)))?
                } else {
                    series.clone()
                };
                let prefixed = format!("{}_{}", table.name, series.name());
                series.rename(&prefixed);
                columns.push(series);
            }
        }

        let frame = DataFrame::new(columns).map_err(|e| AppError::Internal(format!("combining tables: {}", e)))?;
        Ok(CombinedTable::new(frame))
    }

    /// Remove a table; returns whether it existed. Repeated calls are harmless.
    pub fn delete(&mut self, name: &str) -> bool {
        let existed = self.tables.remove(name).is_some();
        if existed {
            debug!(file = %name, "Table removed");
        }
        existed
    }

    pub fn names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Parse delimited text or a spreadsheet, picked by extension
pub fn parse_table(bytes: &[u8], file_name: &str) -> AppResult<TableRecord> {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    let (header, rows) = match extension.as_str() {
        "xls" | "xlsx" | "xlsm" | "ods" => read_spreadsheet(bytes, file_name)?,
        _ => read_delimited(bytes, file_name)?,
    };
    let frame = build_frame(&header, &rows).map_err(|e| AppError::parse(file_name, e))?;
    Ok(TableRecord {
        name: file_name.to_string(),
        frame,
    })
}

type TextRows = (Vec<String>, Vec<Vec<String>>);

fn read_delimited(bytes: &[u8], file_name: &str) -> AppResult<TextRows> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| AppError::parse(file_name, format!("not valid UTF-8 text ({})", e)))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    if text.trim().is_empty() {
        return Err(AppError::parse(file_name, "the file is empty"));
    }

    let delimiter = sniff_delimiter(text);
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(false)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let header = normalize_header(
        reader
            .headers()
            .map_err(|e| AppError::parse(file_name, e))?
            .iter()
            .map(str::to_string)
            .collect(),
    );
    if header.is_empty() {
        return Err(AppError::parse(file_name, "no columns found"));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| AppError::parse(file_name, e))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    debug!(file = %file_name, delimiter = %(delimiter as char), "Parsed delimited text");
    Ok((header, rows))
}

fn read_spreadsheet(bytes: &[u8], file_name: &str) -> AppResult<TextRows> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| AppError::parse(file_name, e))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::parse(file_name, "the workbook has no sheets"))?
        .map_err(|e| AppError::parse(file_name, e))?;

    let mut sheet_rows = range.rows();
    let header = match sheet_rows.next() {
        Some(cells) => normalize_header(cells.iter().map(cell_to_string).collect()),
        None => return Err(AppError::parse(file_name, "the first sheet is empty")),
    };
    // Ranges are rectangular, so every row already matches the header width
    let rows = sheet_rows
        .map(|cells| cells.iter().map(cell_to_string).collect())
        .collect();
    Ok((header, rows))
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

/// One series per column. Empty cells become nulls; a column is cast to
/// Int64 or Float64 when polars can parse every remaining cell.
fn build_frame(header: &[String], rows: &[Vec<String>]) -> PolarsResult<DataFrame> {
    let columns = header
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let cells: Vec<Option<&str>> = rows
                .iter()
                .map(|row| row.get(idx).map(String::as_str).filter(|v| !v.is_empty()))
                .collect();
            infer_column(Series::new(name, cells))
        })
        .collect();
    DataFrame::new(columns)
}

fn infer_column(series: Series) -> Series {
    if series.null_count() == series.len() {
        return series;
    }
    for dtype in [DataType::Int64, DataType::Float64] {
        if let Ok(typed) = series.strict_cast(&dtype) {
            return typed;
        }
    }
    series
}

/// Trimmed names; blanks become `column_<n>` and repeats get a `_<n>` suffix
fn normalize_header(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .enumerate()
        .map(|(idx, name)| {
            let name = name.trim();
            let base = if name.is_empty() {
                format!("column_{}", idx + 1)
            } else {
                name.to_string()
            };
            let mut candidate = base.clone();
            let mut n = 2;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{}_{}", base, n);
                n += 1;
            }
            candidate
        })
        .collect()
}

/// Most frequent candidate delimiter on the header line; comma wins ties
fn sniff_delimiter(text: &str) -> u8 {
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut best = (b',', 0usize);
    for delimiter in CANDIDATE_DELIMITERS {
        let count = first_line.bytes().filter(|b| *b == delimiter).count();
        if count > best.1 {
            best = (delimiter, count);
        }
    }
    best.0
}


#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ingest_then_get_preserves_rows() {
        let mut store = TableStore::new();
        store
            .ingest(b"city,rent\nLisbon,1200\nPorto,900\nBraga,700\n", "rent.csv")
            .unwrap();

        let table = store.get(&names(&["rent.csv"])).unwrap();
        assert_eq!(table.columns(), vec!["rent.csv_city", "rent.csv_rent"]);
        assert_eq!(
            table.text_rows(0, 10),
            vec![
                vec!["Lisbon", "1200"],
                vec!["Porto", "900"],
                vec!["Braga", "700"],
            ]
        );
    }

    #[test]
    fn test_column_types_come_from_the_whole_column() {
        let record = parse_table(b"id,price,label\n1,2.5,x\n2,3,7\n3,,y\n", "t.csv").unwrap();
        let dtypes = record.frame.dtypes();
        assert_eq!(dtypes[0], DataType::Int64);
        assert_eq!(dtypes[1], DataType::Float64);
        assert_eq!(dtypes[2], DataType::String);
        assert_eq!(record.frame.column("price").unwrap().null_count(), 1);
    }

    #[test]
    fn test_semicolon_delimiter_is_detected() {
        let record = parse_table("id;name\n1;Ana\n2;Bruno\n".as_bytes(), "a.csv").unwrap();
        assert_eq!(record.columns(), vec!["id", "name"]);
        assert_eq!(record.row_count(), 2);
        let table = CombinedTable::new(record.frame);
        assert_eq!(table.text_rows(1, 1), vec![vec!["2", "Bruno"]]);
    }

    #[test]
    fn test_mismatched_row_is_rejected_without_storing() {
        let mut store = TableStore::new();
        let result = store.ingest(b"a,b,c\n1,2,3\n4,5\n", "bad.csv");
        assert!(matches!(result, Err(AppError::Parse { .. })));
        assert!(!store.contains("bad.csv"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let result = parse_table(&[0x66, 0x6f, 0xff, 0xfe, 0x0a], "latin.csv");
        assert!(matches!(result, Err(AppError::Parse { .. })));
    }

    #[test]
    fn test_empty_file_is_rejected() {
        assert!(matches!(parse_table(b"  \n", "empty.csv"), Err(AppError::Parse { .. })));
    }

    #[test]
    fn test_bom_is_stripped() {
        let record = parse_table("\u{feff}x,y\n1,2\n".as_bytes(), "bom.csv").unwrap();
        assert_eq!(record.columns(), vec!["x", "y"]);
    }

    #[test]
    fn test_get_unknown_table_is_not_found() {
        let store = TableStore::new();
        assert!(matches!(
            store.get(&names(&["missing.csv"])),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_get_pads_shorter_tables() {
        let mut store = TableStore::new();
        store.ingest(b"k\n1\n2\n3\n", "long.csv").unwrap();
        store.ingest(b"v,w\nx,y\n", "short.csv").unwrap();

        let table = store.get(&names(&["long.csv", "short.csv"])).unwrap();
        assert_eq!(table.columns(), vec!["long.csv_k", "short.csv_v", "short.csv_w"]);
        assert_eq!(table.row_count(), 3);
        let rows = table.text_rows(0, 3);
        assert_eq!(rows[0], vec!["1", "x", "y"]);
        assert_eq!(rows[2], vec!["3", "", ""]);
        assert_eq!(table.frame().column("short.csv_v").unwrap().null_count(), 2);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut store = TableStore::new();
        store.ingest(b"a\n1\n", "a.csv").unwrap();
        store.ingest(b"b\n2\n", "b.csv").unwrap();

        assert!(store.delete("a.csv"));
        assert!(!store.delete("a.csv"));
        assert_eq!(store.names(), vec!["b.csv"]);
    }

    #[test]
    fn test_blank_and_repeated_header_cells_get_names() {
        let record = parse_table(b"id,,score,score\n1,x,3,4\n", "h.csv").unwrap();
        assert_eq!(record.columns(), vec!["id", "column_2", "score", "score_2"]);
    }

    #[test]
    fn test_insert_replaces_same_name() {
        let mut store = TableStore::new();
        store.ingest(b"a\n1\n", "a.csv").unwrap();
        let record = parse_table(b"a\n1\n2\n", "a.csv").unwrap();
        assert_eq!(store.insert(record).row_count(), 2);
        assert_eq!(store.names(), vec!["a.csv"]);
    }

    #[test]
    fn test_xlsx_first_sheet_is_read_with_typed_columns() {
        let bytes = include_bytes!("../tests/fixtures/prices.xlsx");
        let record = parse_table(bytes, "prices.xlsx").unwrap();

        assert_eq!(record.columns(), vec!["item", "price", "qty"]);
        assert_eq!(record.row_count(), 2);
        let dtypes = record.frame.dtypes();
        assert_eq!(dtypes[1], DataType::Float64);
        assert_eq!(dtypes[2], DataType::Int64);

        let table = CombinedTable::new(record.frame.clone());
        let rows = table.text_rows(0, 2);
        assert_eq!(rows[0][0], "apple");
        assert_eq!(rows[1][2], "10");
        let price = record.frame.column("price").unwrap().get(1).unwrap();
        assert_eq!(price.extract::<f64>(), Some(2.25));
    }

    #[test]
    fn test_garbage_spreadsheet_is_a_parse_error() {
        assert!(matches!(
            parse_table(b"definitely not a workbook", "book.xlsx"),
            Err(AppError::Parse { .. })
        ));
    }
}
