//! Datasets from *The Elements of Statistical Learning*.
//!
//! Every dataset here is a small set of plain files on the book's site,
//! cached under the `ESL` sub-folder of the temp directory by default. Each
//! has its own layout:
//!
//! | Dataset   | Files                                            | Output       |
//! |-----------|--------------------------------------------------|--------------|
//! | Mixture   | `ESL.mixture.rda`                                | `Mixture`    |
//! | Prostate  | `prostate.data`, `prostate.info.txt`             | `Table`      |
//! | Spam      | `spam.data`, `spam.info.txt`, `spam.traintest`   | `SplitTable` |
//! | Zip       | `zip.info.txt`, `zip.train.gz`, `zip.test.gz`    | `Arrays`     |
//! | NCI       | `nci.data.csv`, `nci.label.txt`, `nci.info.txt`  | `Labeled`    |

use std::path::{Path, PathBuf};

use ndarray::{s, Array1, Array2, Axis};

use super::Decoder;
use crate::error::DatasetError;
use crate::fetch::{DatasetSource, LoadOptions};
use crate::formats::rdata::read_rdata;
use crate::formats::table::{
    read_delimited, read_labels, read_text, read_whitespace_matrix, read_whitespace_matrix_gz,
};
use crate::output::{
    ArrayDataset, LabeledTable, Metadata, MixtureDataset, ParsedDataset, SplitTableDataset, Table,
    TableDataset,
};

pub const ESL_URL: &str = "https://web.stanford.edu/~hastie/ElemStatLearn/datasets/";
pub const ESL_DIR: &str = "ESL";

/// Column names of `spam.data`; the last one is the 0/1 label.
pub const SPAM_COLUMNS: [&str; 58] = [
    "make",
    "address",
    "all",
    "3d",
    "our",
    "over",
    "remove",
    "internet",
    "order",
    "mail",
    "receive",
    "will",
    "people",
    "report",
    "addresses",
    "free",
    "business",
    "email",
    "you",
    "credit",
    "your",
    "font",
    "000",
    "money",
    "hp",
    "hpl",
    "george",
    "650",
    "lab",
    "labs",
    "telnet",
    "857",
    "data",
    "415",
    "85",
    "technology",
    "1999",
    "parts",
    "pm",
    "direct",
    "cs",
    "meeting",
    "original",
    "project",
    "re",
    "edu",
    "table:",
    "conference",
    ";",
    "(",
    "[",
    "!",
    "$",
    "#",
    "capital_run_length_average",
    "capital_run_length_longest",
    "capital_run_length_total",
    "spam",
];

fn esl_source<const N: usize>(files: [&str; N], opts: &LoadOptions) -> DatasetSource {
    DatasetSource::new(ESL_URL, files, Some(ESL_DIR), opts)
}

/// Paths in `filenames` order, checked against the expected count.
fn expect_paths<'a, const N: usize>(
    source: &DatasetSource,
    paths: &'a [PathBuf],
) -> Result<&'a [PathBuf; N], DatasetError> {
    paths.try_into().map_err(|_| DatasetError::MalformedRecord {
        path: source.target_dir.clone(),
        message: format!("expected {} file(s), got {}", N, paths.len()),
    })
}

fn malformed(path: &Path, message: impl Into<String>) -> DatasetError {
    DatasetError::MalformedRecord {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

// ============================================================================
// Mixture
// ============================================================================

/// Simulated two-class mixture stored as an R object.
#[derive(Clone, Debug)]
pub struct Mixture {
    with_means: bool,
    source: DatasetSource,
}

impl Mixture {
    pub const OBJECT: &'static str = "ESL.mixture";

    pub fn new(with_means: bool, opts: &LoadOptions) -> Self {
        Self {
            with_means,
            source: esl_source(["ESL.mixture.rda"], opts),
        }
    }
}

impl Decoder for Mixture {
    fn title(&self) -> String {
        "ESL-Mixture".to_string()
    }

    fn source(&self) -> &DatasetSource {
        &self.source
    }

    fn decode(&self, paths: &[PathBuf]) -> Result<ParsedDataset, DatasetError> {
        let [rda] = expect_paths::<1>(&self.source, paths)?;
        let data = read_rdata(rda)?;
        let object = data
            .get(Self::OBJECT)
            .ok_or_else(|| malformed(rda, format!("no object named '{}'", Self::OBJECT)))?;

        let element = |name: &'static str| {
            object.get(name).ok_or_else(|| {
                malformed(rda, format!("'{}' has no element '{}'", Self::OBJECT, name))
            })
        };

        let x = element("x")?
            .to_matrix()
            .ok_or_else(|| malformed(rda, "'x' is not a numeric matrix"))?;
        let y = element("y")?
            .to_i64_vec()
            .ok_or_else(|| malformed(rda, "'y' is not an integer-valued vector"))?;
        if y.len() != x.nrows() {
            return Err(DatasetError::InconsistentRows {
                path: rda.clone(),
                expected: x.nrows(),
                found: y.len(),
            });
        }

        let means = if self.with_means {
            Some(
                element("means")?
                    .to_matrix()
                    .ok_or_else(|| malformed(rda, "'means' is not a numeric matrix"))?,
            )
        } else {
            None
        };

        Ok(ParsedDataset::Mixture(MixtureDataset {
            x,
            y: Array1::from(y),
            means,
            metadata: Metadata {
                columns: object.names().unwrap_or_default(),
                ..Default::default()
            },
        }))
    }
}

// ============================================================================
// Prostate cancer
// ============================================================================

/// Prostate cancer table with a train/test indicator column.
#[derive(Clone, Debug)]
pub struct Prostate {
    source: DatasetSource,
}

impl Prostate {
    pub fn new(opts: &LoadOptions) -> Self {
        Self {
            source: esl_source(["prostate.data", "prostate.info.txt"], opts),
        }
    }
}

impl Decoder for Prostate {
    fn title(&self) -> String {
        "ESL-Prostate_Cancer".to_string()
    }

    fn source(&self) -> &DatasetSource {
        &self.source
    }

    fn decode(&self, paths: &[PathBuf]) -> Result<ParsedDataset, DatasetError> {
        let [data_path, info_path] = expect_paths::<2>(&self.source, paths)?;
        let raw = read_delimited(data_path, b'\t')?;

        let train_col = raw
            .column_index("train")
            .ok_or_else(|| malformed(data_path, "no 'train' column"))?;

        let mut train_mask = Vec::with_capacity(raw.rows.len());
        for (row_idx, row) in raw.rows.iter().enumerate() {
            let cell = row.get(train_col).map(|c| c.trim()).unwrap_or("");
            let flag = match cell {
                "T" | "TRUE" | "True" => true,
                "F" | "FALSE" | "False" => false,
                other => {
                    return Err(DatasetError::InvalidValue {
                        path: data_path.clone(),
                        line: row_idx + 2,
                        value: other.to_string(),
                    })
                }
            };
            train_mask.push(flag);
        }

        // The leading unnamed column is a row number.
        let feature_cols: Vec<usize> = (0..raw.headers.len())
            .filter(|&i| i != train_col && !(i == 0 && raw.headers[0].trim().is_empty()))
            .collect();
        let columns: Vec<String> = feature_cols.iter().map(|&i| raw.headers[i].clone()).collect();
        let values = raw.numeric_columns(&feature_cols, data_path)?;

        Ok(ParsedDataset::Table(TableDataset {
            table: Table {
                columns: columns.clone(),
                index: Vec::new(),
                values,
            },
            metadata: Metadata {
                columns,
                documentation: Some(read_text(info_path)?),
                train_mask: Some(train_mask),
                ..Default::default()
            },
        }))
    }
}

// ============================================================================
// E-mail spam
// ============================================================================

/// Spam word-frequency table with an external train/test assignment.
#[derive(Clone, Debug)]
pub struct Spam {
    source: DatasetSource,
}

impl Spam {
    pub fn new(opts: &LoadOptions) -> Self {
        Self {
            source: esl_source(["spam.data", "spam.info.txt", "spam.traintest"], opts),
        }
    }
}

impl Decoder for Spam {
    fn title(&self) -> String {
        "ESL-Email_Spam".to_string()
    }

    fn source(&self) -> &DatasetSource {
        &self.source
    }

    fn decode(&self, paths: &[PathBuf]) -> Result<ParsedDataset, DatasetError> {
        let [data_path, info_path, split_path] = expect_paths::<3>(&self.source, paths)?;

        let values = read_whitespace_matrix(data_path)?;
        if values.ncols() != SPAM_COLUMNS.len() {
            return Err(DatasetError::InconsistentRows {
                path: data_path.clone(),
                expected: SPAM_COLUMNS.len(),
                found: values.ncols(),
            });
        }

        let assignment = read_whitespace_matrix(split_path)?;
        let train_mask = split_mask(assignment.iter().copied(), split_path)?;
        let table = Table {
            columns: SPAM_COLUMNS.iter().map(|c| c.to_string()).collect(),
            index: Vec::new(),
            values,
        };
        let parts = partition(&table.values, &train_mask, split_path)?;

        Ok(ParsedDataset::SplitTable(SplitTableDataset {
            x_train: parts.x_train,
            y_train: parts.y_train,
            x_test: parts.x_test,
            y_test: parts.y_test,
            metadata: Metadata {
                columns: table.columns.clone(),
                documentation: Some(read_text(info_path)?),
                train_mask: Some(train_mask),
                ..Default::default()
            },
            table,
        }))
    }
}

/// `0` marks a training row, `1` a test row.
pub fn split_mask(
    values: impl IntoIterator<Item = f64>,
    path: &Path,
) -> Result<Vec<bool>, DatasetError> {
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| match v {
            v if v == 0.0 => Ok(true),
            v if v == 1.0 => Ok(false),
            other => Err(DatasetError::InvalidValue {
                path: path.to_path_buf(),
                line: i + 1,
                value: other.to_string(),
            }),
        })
        .collect()
}

/// Features and label (last column) split by a train mask.
#[derive(Clone, Debug, PartialEq)]
pub struct Partition {
    pub x_train: Array2<f64>,
    pub y_train: Array1<f64>,
    pub x_test: Array2<f64>,
    pub y_test: Array1<f64>,
}

/// Partition rows of `values` by `train_mask`, keeping row order within
/// each side. The mask must have one entry per row.
pub fn partition(
    values: &Array2<f64>,
    train_mask: &[bool],
    split_path: &Path,
) -> Result<Partition, DatasetError> {
    if train_mask.len() != values.nrows() {
        return Err(DatasetError::SplitMismatch {
            path: split_path.to_path_buf(),
            data_rows: values.nrows(),
            split_rows: train_mask.len(),
        });
    }
    if values.ncols() == 0 {
        return Err(malformed(split_path, "table has no columns"));
    }

    let (train_idx, test_idx): (Vec<usize>, Vec<usize>) =
        (0..values.nrows()).partition(|&i| train_mask[i]);
    let label_col = values.ncols() - 1;
    let features = values.slice(s![.., ..label_col]);
    let labels = values.column(label_col);

    Ok(Partition {
        x_train: features.select(Axis(0), &train_idx),
        y_train: labels.select(Axis(0), &train_idx),
        x_test: features.select(Axis(0), &test_idx),
        y_test: labels.select(Axis(0), &test_idx),
    })
}

// ============================================================================
// Zip code digits
// ============================================================================

/// Normalized 16x16 handwritten digits, one image per text line.
#[derive(Clone, Debug)]
pub struct ZipDigits {
    source: DatasetSource,
}

impl ZipDigits {
    pub fn new(opts: &LoadOptions) -> Self {
        Self {
            source: esl_source(["zip.info.txt", "zip.train.gz", "zip.test.gz"], opts),
        }
    }
}

impl Decoder for ZipDigits {
    fn title(&self) -> String {
        "ESL-Handwritten_Digit".to_string()
    }

    fn source(&self) -> &DatasetSource {
        &self.source
    }

    fn decode(&self, paths: &[PathBuf]) -> Result<ParsedDataset, DatasetError> {
        let [info_path, train_path, test_path] = expect_paths::<3>(&self.source, paths)?;
        let train = read_whitespace_matrix_gz(train_path)?;
        let test = read_whitespace_matrix_gz(test_path)?;
        let (x_train, y_train) = split_label_column(train, train_path)?;
        let (x_test, y_test) = split_label_column(test, test_path)?;

        Ok(ParsedDataset::Arrays(ArrayDataset {
            x_train,
            y_train,
            x_test,
            y_test,
            metadata: Metadata {
                label_names: (0..10).map(|d| d.to_string()).collect(),
                documentation: Some(read_text(info_path)?),
                ..Default::default()
            },
        }))
    }
}

/// First column is the digit, the rest are pixel intensities.
pub fn split_label_column(
    rows: Array2<f64>,
    path: &Path,
) -> Result<(Array2<f64>, Array1<i64>), DatasetError> {
    if rows.ncols() < 2 {
        return Err(malformed(path, "expected a label column followed by pixels"));
    }
    let labels = rows
        .column(0)
        .iter()
        .map(|v| {
            if v.fract() == 0.0 {
                Ok(*v as i64)
            } else {
                Err(malformed(path, format!("non-integer label {}", v)))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((rows.slice(s![.., 1..]).to_owned(), Array1::from(labels)))
}

// ============================================================================
// NCI microarray
// ============================================================================

/// Gene expression matrix (probes x samples on disk) with cancer-type labels.
#[derive(Clone, Debug)]
pub struct Nci {
    source: DatasetSource,
}

impl Nci {
    pub fn new(opts: &LoadOptions) -> Self {
        Self {
            source: esl_source(["nci.data.csv", "nci.label.txt", "nci.info.txt"], opts),
        }
    }
}

impl Decoder for Nci {
    fn title(&self) -> String {
        "ESL-NCI".to_string()
    }

    fn source(&self) -> &DatasetSource {
        &self.source
    }

    fn decode(&self, paths: &[PathBuf]) -> Result<ParsedDataset, DatasetError> {
        let [data_path, label_path, info_path] = expect_paths::<3>(&self.source, paths)?;

        let raw = read_delimited(data_path, b',')?;
        if raw.headers.is_empty() {
            return Err(malformed(data_path, "empty header"));
        }

        let probes: Vec<String> = raw
            .rows
            .iter()
            .map(|row| row.first().cloned().unwrap_or_default())
            .collect();
        let samples: Vec<String> = raw.headers[1..].to_vec();
        let sample_cols: Vec<usize> = (1..raw.headers.len()).collect();

        // (probes, samples) on disk; samples become rows
        let values = raw
            .numeric_columns(&sample_cols, data_path)?
            .reversed_axes()
            .as_standard_layout()
            .to_owned();

        let labels = read_labels(label_path)?;
        if labels.len() != samples.len() {
            return Err(DatasetError::SplitMismatch {
                path: label_path.clone(),
                data_rows: samples.len(),
                split_rows: labels.len(),
            });
        }

        Ok(ParsedDataset::Labeled(LabeledTable {
            table: Table {
                columns: probes.clone(),
                index: samples,
                values,
            },
            labels,
            metadata: Metadata {
                columns: probes,
                documentation: Some(read_text(info_path)?),
                ..Default::default()
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn split_mask_maps_zero_to_train() {
        let mask = split_mask([0.0, 1.0, 0.0], Path::new("s")).unwrap();
        assert_eq!(mask, vec![true, false, true]);

        let err = split_mask([0.0, 2.0], Path::new("s")).expect_err("bad flag");
        assert!(matches!(err, DatasetError::InvalidValue { line: 2, .. }));
    }

    #[test]
    fn partition_keeps_row_order_and_label_column() {
        let values = array![[1.0, 10.0, 0.0], [2.0, 20.0, 1.0], [3.0, 30.0, 1.0]];
        let parts = partition(&values, &[true, false, true], Path::new("s")).unwrap();
        assert_eq!(parts.x_train, array![[1.0, 10.0], [3.0, 30.0]]);
        assert_eq!(parts.y_train, array![0.0, 1.0]);
        assert_eq!(parts.x_test, array![[2.0, 20.0]]);
        assert_eq!(parts.y_test, array![1.0]);
    }

    #[test]
    fn partition_rejects_mask_length_mismatch() {
        let values = array![[1.0, 0.0], [2.0, 1.0]];
        let err = partition(&values, &[true], Path::new("s")).expect_err("mismatch");
        assert!(matches!(
            err,
            DatasetError::SplitMismatch {
                data_rows: 2,
                split_rows: 1,
                ..
            }
        ));
    }

    #[test]
    fn label_column_is_split_off() {
        let rows = array![[3.0, -1.0, 0.5], [7.0, 0.25, 1.0]];
        let (x, y) = split_label_column(rows, Path::new("z")).unwrap();
        assert_eq!(x, array![[-1.0, 0.5], [0.25, 1.0]]);
        assert_eq!(y, array![3, 7]);
    }

    #[test]
    fn spam_schema_has_label_last() {
        assert_eq!(SPAM_COLUMNS.len(), 58);
        assert_eq!(SPAM_COLUMNS[57], "spam");
    }

    #[test]
    fn wrong_path_count_is_reported() {
        let prostate = Prostate::new(&LoadOptions::default());
        let err = prostate.decode(&[PathBuf::from("only-one")]).expect_err("count");
        assert!(matches!(err, DatasetError::MalformedRecord { .. }));
    }
}
