use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_from_rs, Reader, Xls, Xlsx};
use encoding_rs::{Encoding, UTF_8_INIT, WINDOWS_1252_INIT};
use polars::prelude::*;

use crate::error::AppError;
use crate::services::dataset::TabularDataset;

/// Text encodings tried in order for delimited uploads, resolved to
/// concrete codecs up front so a label typo can never silently drop a
/// priority entry. The WHATWG tables fold latin-1 and iso-8859-1 into
/// windows-1252, which matches how the single-byte fallbacks behave here.
pub static ENCODING_PRIORITY: [(&str, &Encoding); 4] = [
    ("utf-8", &UTF_8_INIT),
    ("latin-1", &WINDOWS_1252_INIT),
    ("windows-1252", &WINDOWS_1252_INIT),
    ("iso-8859-1", &WINDOWS_1252_INIT),
];

/// Bytes inspected when sniffing an unlabeled `.txt` delimiter.
const SNIFF_WINDOW: usize = 1024;
const SNIFF_CANDIDATES: [u8; 3] = [b'\t', b';', b'|'];

/// Resolves raw upload bytes into a dataset, dispatching on the declared
/// filename's extension. The parser owns type inference; this layer only
/// selects it and normalizes failures into the error taxonomy.
pub fn resolve(bytes: &[u8], filename: &str) -> Result<TabularDataset, AppError> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match extension.as_str() {
        "csv" => delimited(bytes, b','),
        "tsv" => delimited(bytes, b'\t'),
        "txt" => delimited(bytes, sniff_delimiter(bytes)),
        "xlsx" => spreadsheet::<Xlsx<_>>(bytes),
        "xls" => spreadsheet::<Xls<_>>(bytes),
        "json" => structured_json(bytes),
        "parquet" => columnar_parquet(bytes),
        // Pickle payloads execute arbitrary deserialization logic and are
        // only safe from a fully trusted producer; this service does not
        // accept them. Convert trusted pickles to parquet or CSV upstream.
        "pkl" => Err(AppError::UnsupportedFormat("pkl".to_string())),
        other => Err(AppError::UnsupportedFormat(other.to_string())),
    }
}

/// Decodes delimited-text bytes against the encoding priority list and
/// reports which label succeeded. Partial decodes are never returned.
pub fn decode_text(bytes: &[u8]) -> Result<(String, &'static str), AppError> {
    for (label, encoding) in ENCODING_PRIORITY {
        let (text, _, had_errors) = encoding.decode(bytes);
        if !had_errors {
            return Ok((text.into_owned(), label));
        }
    }
    Err(AppError::DecodeFailure)
}

/// Picks the most frequent candidate delimiter in the leading window,
/// falling back to comma. Ties resolve in tab, semicolon, pipe order.
pub fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let window = &bytes[..bytes.len().min(SNIFF_WINDOW)];
    SNIFF_CANDIDATES
        .iter()
        .map(|&delim| (window.iter().filter(|&&b| b == delim).count(), delim))
        .filter(|(count, _)| *count > 0)
        .max_by_key(|(count, _)| *count)
        .map(|(_, delim)| delim)
        .unwrap_or(b',')
}

fn delimited(bytes: &[u8], delimiter: u8) -> Result<TabularDataset, AppError> {
    let (text, encoding) = decode_text(bytes)?;
    tracing::debug!(encoding, delimiter = %char::from(delimiter), "decoded delimited upload");
    // An empty upload is a valid zero-column dataset, not a parse error.
    if text.trim().is_empty() {
        return Ok(TabularDataset::empty());
    }
    let cursor = Cursor::new(text.into_bytes());
    let df = CsvReader::new(cursor)
        .has_header(true)
        .with_separator(delimiter)
        .finish()
        .map_err(|e| AppError::parse("delimited text", e))?;
    TabularDataset::from_polars(&df)
}

fn structured_json(bytes: &[u8]) -> Result<TabularDataset, AppError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(TabularDataset::empty());
    }
    let df = JsonReader::new(Cursor::new(bytes.to_vec()))
        .finish()
        .map_err(|e| AppError::parse("json", e))?;
    TabularDataset::from_polars(&df)
}

fn columnar_parquet(bytes: &[u8]) -> Result<TabularDataset, AppError> {
    if bytes.is_empty() {
        return Ok(TabularDataset::empty());
    }
    let df = ParquetReader::new(Cursor::new(bytes.to_vec()))
        .finish()
        .map_err(|e| AppError::parse("parquet", e))?;
    TabularDataset::from_polars(&df)
}

fn spreadsheet<W>(bytes: &[u8]) -> Result<TabularDataset, AppError>
where
    W: Reader<Cursor<Vec<u8>>>,
    W::Error: std::fmt::Display,
{
    if bytes.is_empty() {
        return Ok(TabularDataset::empty());
    }
    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook: W =
        open_workbook_from_rs(cursor).map_err(|e| AppError::parse("spreadsheet", e))?;
    let sheet_names = workbook.sheet_names().to_vec();
    let Some(first_sheet) = sheet_names.first() else {
        return Ok(TabularDataset::empty());
    };
    let range = workbook
        .worksheet_range(first_sheet)
        .map_err(|e| AppError::parse("spreadsheet", e))?;
    let rows: Vec<Vec<calamine::Data>> = range.rows().map(|row| row.to_vec()).collect();
    Ok(TabularDataset::from_sheet_rows(&rows))
}
