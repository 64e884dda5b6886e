//! Delimited text table readers.
//!
//! The statistical-learning datasets ship as plain text in a handful of
//! dialects:
//! - tab-separated with a header row whose first cell is empty (row index)
//! - space-separated numeric rows without a header, sometimes with a
//!   trailing separator
//! - comma-separated with quoted headers and `NA` for missing values
//! - one label per line
//!
//! All of them go through the `csv` crate; numeric cells are parsed to
//! `f64` with `NA` mapped to NaN.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::Array2;

use crate::error::DatasetError;

// ============================================================================
// Types
// ============================================================================

/// A table of raw text cells with its header row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TextTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Parse the given columns of every row as `f64`, in the order given.
    pub fn numeric_columns(
        &self,
        columns: &[usize],
        path: &Path,
    ) -> Result<Array2<f64>, DatasetError> {
        let mut values = Vec::with_capacity(self.rows.len() * columns.len());
        for (row_idx, row) in self.rows.iter().enumerate() {
            for &col in columns {
                let cell = row.get(col).map(String::as_str).unwrap_or("");
                values.push(parse_cell(cell, path, row_idx + 2)?);
            }
        }
        to_matrix(values, self.rows.len(), columns.len(), path)
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Reads a delimited table with a header row.
///
/// Every row must have as many cells as the header.
pub fn read_delimited(path: &Path, delimiter: u8) -> Result<TextTable, DatasetError> {
    let file = File::open(path).map_err(DatasetError::Io)?;
    delimited_from_reader(BufReader::new(file), delimiter, path)
}

/// Reads a header-less numeric matrix separated by runs of whitespace.
pub fn read_whitespace_matrix(path: &Path) -> Result<Array2<f64>, DatasetError> {
    let file = File::open(path).map_err(DatasetError::Io)?;
    whitespace_matrix_from_reader(BufReader::new(file), path)
}

/// Like [`read_whitespace_matrix`] for a gzip-compressed file.
pub fn read_whitespace_matrix_gz(path: &Path) -> Result<Array2<f64>, DatasetError> {
    let file = File::open(path).map_err(DatasetError::Io)?;
    whitespace_matrix_from_reader(GzDecoder::new(BufReader::new(file)), path)
}

/// Reads one trimmed string per non-blank line.
pub fn read_labels(path: &Path) -> Result<Vec<String>, DatasetError> {
    let text = read_text(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Reads a documentation file verbatim. Invalid UTF-8 is replaced rather
/// than rejected; some of the text files are Latin-1.
pub fn read_text(path: &Path) -> Result<String, DatasetError> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn delimited_from_reader<R: Read>(
    reader: R,
    delimiter: u8,
    path: &Path,
) -> Result<TextTable, DatasetError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|source| DatasetError::TableParse {
            path: path.to_path_buf(),
            source,
        })?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for result in csv_reader.records() {
        let record = result.map_err(|source| DatasetError::TableParse {
            path: path.to_path_buf(),
            source,
        })?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(TextTable { headers, rows })
}

pub fn whitespace_matrix_from_reader<R: Read>(
    reader: R,
    path: &Path,
) -> Result<Array2<f64>, DatasetError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut width = None;
    let mut rows = 0;
    let mut values = Vec::new();

    for result in csv_reader.records() {
        let record = result.map_err(|source| DatasetError::TableParse {
            path: path.to_path_buf(),
            source,
        })?;
        let line = record.position().map_or(0, |pos| pos.line() as usize);

        let before = values.len();
        for cell in record.iter().filter(|cell| !cell.is_empty()) {
            values.push(parse_cell(cell, path, line)?);
        }
        let found = values.len() - before;
        if found == 0 {
            continue;
        }

        match width {
            None => width = Some(found),
            Some(expected) if expected != found => {
                return Err(DatasetError::InconsistentRows {
                    path: path.to_path_buf(),
                    expected,
                    found,
                });
            }
            Some(_) => {}
        }
        rows += 1;
    }

    to_matrix(values, rows, width.unwrap_or(0), path)
}

// ============================================================================
// Helpers
// ============================================================================

/// Parse one numeric cell. `NA` (R's missing marker) becomes NaN.
pub fn parse_cell(cell: &str, path: &Path, line: usize) -> Result<f64, DatasetError> {
    let cell = cell.trim();
    if cell == "NA" {
        return Ok(f64::NAN);
    }
    cell.parse::<f64>().map_err(|_| DatasetError::InvalidValue {
        path: path.to_path_buf(),
        line,
        value: cell.to_string(),
    })
}

fn to_matrix(
    values: Vec<f64>,
    rows: usize,
    cols: usize,
    path: &Path,
) -> Result<Array2<f64>, DatasetError> {
    Array2::from_shape_vec((rows, cols), values).map_err(|e| DatasetError::MalformedRecord {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Parse in-memory text the way the ESL whitespace files are parsed.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_whitespace_matrix(text: &str) -> Result<Array2<f64>, DatasetError> {
    whitespace_matrix_from_reader(text.as_bytes(), Path::new("<fuzz>"))
}
