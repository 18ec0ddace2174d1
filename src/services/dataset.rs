use std::collections::HashSet;

use calamine::Data;
use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;
use serde::Serialize;

use crate::error::AppError;

/// Rows sampled per column when voting on a spreadsheet column type.
const TYPE_DETECTION_ROWS: usize = 100;
const TYPE_DETECTION_THRESHOLD: f64 = 0.8;

const MICROS_PER_DAY: f64 = 86_400.0 * 1_000_000.0;

/// A single cell, tagged with its type at ingestion time. All downstream
/// profiling dispatches on the tag instead of re-coercing values.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Numeric(f64),
    Text(String),
    Boolean(bool),
    /// Epoch-relative value in the parser's native unit (microseconds for
    /// datetimes, days for dates, Excel serial time scaled to microseconds).
    Temporal(i64),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Appends a canonical byte encoding of the cell to `buf`. Two cells
    /// produce the same bytes iff they compare equal, which makes the keys
    /// usable for distinct counts and duplicate-row detection.
    pub fn write_key(&self, buf: &mut Vec<u8>) {
        match self {
            Cell::Null => buf.push(0),
            Cell::Numeric(v) => {
                // Canonicalize the zero sign so 0.0 and -0.0 key identically,
                // matching how equality-based distinct/duplicate counts treat
                // them.
                let bits = if *v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() };
                buf.push(1);
                buf.extend_from_slice(&bits.to_le_bytes());
            }
            Cell::Text(s) => {
                buf.push(2);
                buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            Cell::Boolean(b) => {
                buf.push(3);
                buf.push(*b as u8);
            }
            Cell::Temporal(t) => {
                buf.push(4);
                buf.extend_from_slice(&t.to_le_bytes());
            }
        }
    }

    fn heap_bytes(&self) -> usize {
        match self {
            Cell::Text(s) => s.len(),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Text,
    Boolean,
    Temporal,
    /// Every value in the column is missing.
    Null,
}

#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    dtype: ColumnType,
    cells: Vec<Cell>,
}

impl Column {
    pub fn new(name: impl Into<String>, dtype: ColumnType, cells: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            dtype,
            cells,
        }
    }

    /// Builds a column whose type is the dominant tag among its non-null
    /// cells. Used by the spreadsheet path and by tests.
    pub fn infer(name: impl Into<String>, cells: Vec<Cell>) -> Self {
        let dtype = dominant_type(&cells);
        Self::new(name, dtype, cells)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> ColumnType {
        self.dtype
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn null_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_null()).count()
    }

    /// Distinct non-null values. Missing entries never count toward
    /// distinctness, so an all-null column reports zero.
    pub fn distinct_non_null(&self) -> usize {
        let mut seen = HashSet::new();
        let mut key = Vec::new();
        for cell in &self.cells {
            if cell.is_null() {
                continue;
            }
            key.clear();
            cell.write_key(&mut key);
            if !seen.contains(&key) {
                seen.insert(key.clone());
            }
        }
        seen.len()
    }

    /// Finite numeric values in row order; null and non-numeric cells are
    /// skipped.
    pub fn numeric_values(&self) -> Vec<f64> {
        self.cells
            .iter()
            .filter_map(|c| match c {
                Cell::Numeric(v) if !v.is_nan() => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// Content-aware footprint: fixed cell storage plus string heap bytes.
    pub fn memory_bytes(&self) -> usize {
        self.cells.len() * std::mem::size_of::<Cell>()
            + self.cells.iter().map(Cell::heap_bytes).sum::<usize>()
    }
}

/// A rectangular, immutable table. Row and column counts are fixed at
/// construction; profiling never mutates it.
#[derive(Debug, Clone)]
pub struct TabularDataset {
    columns: Vec<Column>,
    rows: usize,
}

impl TabularDataset {
    pub fn new(columns: Vec<Column>) -> Self {
        let rows = columns.first().map_or(0, Column::len);
        debug_assert!(columns.iter().all(|c| c.len() == rows));
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: 0,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// First column with the given name. Duplicate names are legal; lookups
    /// resolve to the leftmost match, the rest stay reachable by position.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn numeric_column_count(&self) -> usize {
        self.columns
            .iter()
            .filter(|c| c.dtype() == ColumnType::Numeric)
            .count()
    }

    /// Converts a parsed polars frame into the tagged model. Type inference
    /// already happened in the parser; this only maps dtypes onto tags.
    pub fn from_polars(df: &DataFrame) -> Result<Self, AppError> {
        let mut columns = Vec::with_capacity(df.width());
        for series in df.get_columns() {
            columns.push(column_from_series(series)?);
        }
        Ok(Self::new(columns))
    }

    /// Builds a dataset from spreadsheet rows: first row is the header,
    /// ragged data rows are padded with empty cells.
    pub fn from_sheet_rows(rows: &[Vec<Data>]) -> Self {
        let Some(header) = rows.first() else {
            return Self::empty();
        };
        let names: Vec<String> = header.iter().map(|cell| cell.to_string()).collect();
        let columns = names
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let cells: Vec<Cell> = rows[1..]
                    .iter()
                    .map(|row| cell_from_sheet_value(row.get(idx).unwrap_or(&Data::Empty)))
                    .collect();
                // Voting on the converted tags keeps the column type and its
                // cell tags consistent by construction.
                let dtype = detect_sheet_column_type(&cells, rows.len() > 1);
                Column::new(name.clone(), dtype, cells)
            })
            .collect();
        Self::new(columns)
    }
}

fn column_from_series(series: &Series) -> Result<Column, AppError> {
    let name = series.name().to_string();
    let dtype = series.dtype();
    if dtype.is_numeric() {
        let cast = series
            .cast(&DataType::Float64)
            .map_err(|e| AppError::Internal(format!("numeric column cast failed: {e}")))?;
        let cells = cast
            .f64()
            .map_err(|e| AppError::Internal(e.to_string()))?
            .into_iter()
            .map(|v| v.map(Cell::Numeric).unwrap_or(Cell::Null))
            .collect();
        return Ok(Column::new(name, ColumnType::Numeric, cells));
    }
    match dtype {
        DataType::Boolean => {
            let cells = series
                .bool()
                .map_err(|e| AppError::Internal(e.to_string()))?
                .into_iter()
                .map(|v| v.map(Cell::Boolean).unwrap_or(Cell::Null))
                .collect();
            Ok(Column::new(name, ColumnType::Boolean, cells))
        }
        DataType::Date | DataType::Datetime(_, _) | DataType::Time | DataType::Duration(_) => {
            let cast = series
                .cast(&DataType::Int64)
                .map_err(|e| AppError::Internal(format!("temporal column cast failed: {e}")))?;
            let cells = cast
                .i64()
                .map_err(|e| AppError::Internal(e.to_string()))?
                .into_iter()
                .map(|v| v.map(Cell::Temporal).unwrap_or(Cell::Null))
                .collect();
            Ok(Column::new(name, ColumnType::Temporal, cells))
        }
        DataType::String => {
            let cells = series
                .str()
                .map_err(|e| AppError::Internal(e.to_string()))?
                .into_iter()
                .map(|v| v.map(|s| Cell::Text(s.to_string())).unwrap_or(Cell::Null))
                .collect();
            Ok(Column::new(name, ColumnType::Text, cells))
        }
        DataType::Null => Ok(Column::new(
            name,
            ColumnType::Null,
            vec![Cell::Null; series.len()],
        )),
        _ => {
            // Lists, structs, categoricals: render as text rather than reject.
            let cast = series
                .cast(&DataType::String)
                .map_err(|e| AppError::Internal(format!("column cast failed: {e}")))?;
            let cells = cast
                .str()
                .map_err(|e| AppError::Internal(e.to_string()))?
                .into_iter()
                .map(|v| v.map(|s| Cell::Text(s.to_string())).unwrap_or(Cell::Null))
                .collect();
            Ok(Column::new(name, ColumnType::Text, cells))
        }
    }
}

fn cell_from_sheet_value(value: &Data) -> Cell {
    match value {
        Data::Empty => Cell::Null,
        Data::Int(i) => Cell::Numeric(*i as f64),
        Data::Float(f) => Cell::Numeric(*f),
        Data::Bool(b) => Cell::Boolean(*b),
        Data::DateTime(d) => Cell::Temporal((d.as_f64() * MICROS_PER_DAY) as i64),
        Data::DateTimeIso(s) => parse_temporal_text(s)
            .map(Cell::Temporal)
            .unwrap_or_else(|| Cell::Text(s.clone())),
        Data::String(s) if is_date_string(s) => parse_temporal_text(s)
            .map(Cell::Temporal)
            .unwrap_or_else(|| Cell::Text(s.clone())),
        Data::String(s) => Cell::Text(s.clone()),
        Data::Error(_) => Cell::Null,
        other => Cell::Text(other.to_string()),
    }
}

/// Epoch microseconds for ISO datetimes and the date layouts the detector
/// recognizes. Strings that merely look date-shaped but do not parse (e.g.
/// month 31) stay text.
fn parse_temporal_text(s: &str) -> Option<i64> {
    const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];
    const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc().timestamp_micros());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().timestamp_micros());
        }
    }
    None
}

/// Majority vote over the leading rows of a spreadsheet column, mirroring
/// how mixed-type sheets are classified when there is no declared schema.
/// Runs over the already converted cells, so the winning type always agrees
/// with the tags it was counted from.
fn detect_sheet_column_type(cells: &[Cell], has_data_rows: bool) -> ColumnType {
    let mut numeric = 0usize;
    let mut temporal = 0usize;
    let mut boolean = 0usize;
    let mut total = 0usize;
    for cell in cells.iter().take(TYPE_DETECTION_ROWS) {
        match cell {
            Cell::Null => continue,
            Cell::Numeric(_) => numeric += 1,
            Cell::Temporal(_) => temporal += 1,
            Cell::Boolean(_) => boolean += 1,
            Cell::Text(_) => {}
        }
        total += 1;
    }
    if total == 0 {
        return if has_data_rows {
            ColumnType::Null
        } else {
            ColumnType::Text
        };
    }
    let threshold = total as f64 * TYPE_DETECTION_THRESHOLD;
    if numeric as f64 >= threshold {
        ColumnType::Numeric
    } else if temporal as f64 >= threshold {
        ColumnType::Temporal
    } else if boolean as f64 >= threshold {
        ColumnType::Boolean
    } else {
        ColumnType::Text
    }
}

fn dominant_type(cells: &[Cell]) -> ColumnType {
    let mut numeric = 0usize;
    let mut text = 0usize;
    let mut boolean = 0usize;
    let mut temporal = 0usize;
    for cell in cells {
        match cell {
            Cell::Numeric(_) => numeric += 1,
            Cell::Text(_) => text += 1,
            Cell::Boolean(_) => boolean += 1,
            Cell::Temporal(_) => temporal += 1,
            Cell::Null => {}
        }
    }
    let counts = [
        (numeric, ColumnType::Numeric),
        (text, ColumnType::Text),
        (boolean, ColumnType::Boolean),
        (temporal, ColumnType::Temporal),
    ];
    counts
        .into_iter()
        .filter(|(count, _)| *count > 0)
        .max_by_key(|(count, _)| *count)
        .map(|(_, dtype)| dtype)
        .unwrap_or(ColumnType::Null)
}

static DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^\d{4}-\d{2}-\d{2}$",
        r"^\d{2}/\d{2}/\d{4}$",
        r"^\d{4}/\d{2}/\d{2}$",
        r"^\d{2}-\d{2}-\d{4}$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static date pattern"))
    .collect()
});

pub fn is_date_string(s: &str) -> bool {
    DATE_PATTERNS.iter().any(|re| re.is_match(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_column(name: &str, values: &[Option<f64>]) -> Column {
        let cells = values
            .iter()
            .map(|v| v.map(Cell::Numeric).unwrap_or(Cell::Null))
            .collect();
        Column::new(name, ColumnType::Numeric, cells)
    }

    #[test]
    fn distinct_count_ignores_nulls() {
        let col = numeric_column("a", &[Some(1.0), Some(1.0), None, Some(2.0)]);
        assert_eq!(col.distinct_non_null(), 2);
        assert_eq!(col.null_count(), 1);
    }

    #[test]
    fn all_null_column_has_zero_distinct_values() {
        let col = Column::infer("empty", vec![Cell::Null, Cell::Null]);
        assert_eq!(col.dtype(), ColumnType::Null);
        assert_eq!(col.distinct_non_null(), 0);
    }

    #[test]
    fn duplicate_column_names_resolve_to_first_match() {
        let ds = TabularDataset::new(vec![
            numeric_column("x", &[Some(1.0)]),
            numeric_column("x", &[Some(9.0)]),
        ]);
        assert_eq!(ds.column_count(), 2);
        let col = ds.column("x").unwrap();
        assert_eq!(col.cells(), &[Cell::Numeric(1.0)]);
    }

    #[test]
    fn sheet_rows_pad_ragged_data_with_nulls() {
        let rows = vec![
            vec![Data::String("a".into()), Data::String("b".into())],
            vec![Data::Int(1), Data::Int(2)],
            vec![Data::Int(3)],
        ];
        let ds = TabularDataset::from_sheet_rows(&rows);
        assert_eq!(ds.row_count(), 2);
        assert_eq!(ds.columns()[1].null_count(), 1);
        assert_eq!(ds.columns()[0].dtype(), ColumnType::Numeric);
    }

    #[test]
    fn sheet_type_vote_prefers_dominant_tag() {
        let cells = vec![
            Cell::Numeric(1.0),
            Cell::Numeric(2.0),
            Cell::Numeric(3.0),
            Cell::Numeric(4.0),
            Cell::Text("n/a".into()),
        ];
        assert_eq!(detect_sheet_column_type(&cells, true), ColumnType::Numeric);
    }

    #[test]
    fn sheet_date_columns_get_temporal_cells_and_tag() {
        let rows = vec![
            vec![Data::String("when".into()), Data::String("iso".into())],
            vec![
                Data::String("2024-01-31".into()),
                Data::DateTimeIso("2024-01-31T10:30:00".into()),
            ],
            vec![
                Data::String("01/02/2024".into()),
                Data::DateTimeIso("2024-02-01T00:00:00".into()),
            ],
        ];
        let ds = TabularDataset::from_sheet_rows(&rows);
        for col in ds.columns() {
            assert_eq!(col.dtype(), ColumnType::Temporal);
            assert!(col.cells().iter().all(|c| matches!(c, Cell::Temporal(_))));
        }
        let expected = NaiveDate::from_ymd_opt(2024, 1, 31)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_micros();
        assert_eq!(ds.columns()[0].cells()[0], Cell::Temporal(expected));
    }

    #[test]
    fn unparseable_date_shaped_strings_stay_text() {
        assert_eq!(parse_temporal_text("99/99/9999"), None);
        assert_eq!(
            cell_from_sheet_value(&Data::String("99/99/9999".into())),
            Cell::Text("99/99/9999".into())
        );
    }

    #[test]
    fn signed_zero_counts_as_one_distinct_value() {
        let col = numeric_column("z", &[Some(0.0), Some(-0.0), Some(1.0)]);
        assert_eq!(col.distinct_non_null(), 2);

        let mut plus = Vec::new();
        let mut minus = Vec::new();
        Cell::Numeric(0.0).write_key(&mut plus);
        Cell::Numeric(-0.0).write_key(&mut minus);
        assert_eq!(plus, minus);
    }

    #[test]
    fn date_strings_are_recognized() {
        assert!(is_date_string("2024-01-31"));
        assert!(is_date_string("31/01/2024"));
        assert!(!is_date_string("not a date"));
    }
}
