//! CIFAR-10 and CIFAR-100 batch archives.
//!
//! Both distributions are a single `tar.gz` holding pickled batch mappings
//! plus one metadata mapping. A batch maps `data` to a `(n, 3072)` byte
//! matrix (three 32x32 colour planes per row) and a label key to `n`
//! integers. Batches are extracted next to the archive on first use and
//! decoded from there on later loads.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ShapeBuilder};
use tracing::debug;

use super::{Decoder, LabelGranularity};
use crate::archive::{extract_member, list_members, select_members};
use crate::error::DatasetError;
use crate::fetch::{DatasetSource, LoadOptions};
use crate::formats::pickle::read_pickle;
use crate::output::{chw_to_hwc, row_stack, ImageDataset, Metadata, ParsedDataset};
use crate::value::Value;

pub const CIFAR_URL: &str = "https://www.cs.toronto.edu/~kriz/";
pub const CIFAR10_ARCHIVE: &str = "cifar-10-python.tar.gz";
pub const CIFAR100_ARCHIVE: &str = "cifar-100-python.tar.gz";

const CHANNELS: usize = 3;
const SIDE: usize = 32;
const ROW_LEN: usize = CHANNELS * SIDE * SIDE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CifarVariant {
    Cifar10,
    Cifar100,
}

/// Decoder for either CIFAR distribution.
#[derive(Clone, Debug)]
pub struct Cifar {
    variant: CifarVariant,
    labels: LabelGranularity,
    source: DatasetSource,
}

/// One decoded batch: flat image rows and their labels.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    pub images: Array2<u8>,
    pub labels: Array1<i64>,
}

impl Cifar {
    pub fn cifar10(opts: &LoadOptions) -> Self {
        Self {
            variant: CifarVariant::Cifar10,
            labels: LabelGranularity::Fine,
            source: DatasetSource::new(CIFAR_URL, [CIFAR10_ARCHIVE], None, opts),
        }
    }

    pub fn cifar100(labels: LabelGranularity, opts: &LoadOptions) -> Self {
        Self {
            variant: CifarVariant::Cifar100,
            labels,
            source: DatasetSource::new(CIFAR_URL, [CIFAR100_ARCHIVE], None, opts),
        }
    }

    pub fn variant(&self) -> CifarVariant {
        self.variant
    }

    fn is_batch(&self, member: &str) -> bool {
        let name = file_name(member);
        match self.variant {
            CifarVariant::Cifar10 => name.contains("_batch"),
            CifarVariant::Cifar100 => name == "train" || name == "test",
        }
    }

    fn batch_pattern(&self) -> &'static str {
        match self.variant {
            CifarVariant::Cifar10 => "*_batch*",
            CifarVariant::Cifar100 => "train|test",
        }
    }

    /// Mapping key holding the per-image labels.
    pub fn label_key(&self) -> &'static str {
        match (self.variant, self.labels) {
            (CifarVariant::Cifar10, _) => "labels",
            (CifarVariant::Cifar100, LabelGranularity::Fine) => "fine_labels",
            (CifarVariant::Cifar100, LabelGranularity::Coarse) => "coarse_labels",
        }
    }

    /// Metadata key holding the class names for [`Self::label_key`].
    pub fn label_names_key(&self) -> &'static str {
        match (self.variant, self.labels) {
            (CifarVariant::Cifar10, _) => "label_names",
            (CifarVariant::Cifar100, LabelGranularity::Fine) => "fine_label_names",
            (CifarVariant::Cifar100, LabelGranularity::Coarse) => "coarse_label_names",
        }
    }
}

impl Decoder for Cifar {
    fn title(&self) -> String {
        match self.variant {
            CifarVariant::Cifar10 => "CIFAR-10".to_string(),
            CifarVariant::Cifar100 => format!("CIFAR-100 ({} labels)", self.labels.as_str()),
        }
    }

    fn source(&self) -> &DatasetSource {
        &self.source
    }

    fn decode(&self, paths: &[PathBuf]) -> Result<ParsedDataset, DatasetError> {
        let archive = paths
            .first()
            .ok_or_else(|| DatasetError::MissingMember {
                archive: self.source.target_dir.clone(),
                pattern: self.source.filenames.join(", "),
            })?;
        let dest_dir = archive.parent().unwrap_or(Path::new("."));

        let members = list_members(archive)?;
        let batches = select_members(archive, &members, self.batch_pattern(), |m| {
            self.is_batch(m)
        })?;

        let mut train = Vec::new();
        let mut test: Option<Batch> = None;

        for member in &batches {
            let local = extract_member(archive, member, dest_dir)?;
            debug!(member = %member, "decoding batch");
            let value = read_pickle(&local)?.normalize_text();
            let batch = decode_batch(&value, self.label_key(), &local)?;

            if file_name(member).contains("test") {
                if test.is_some() {
                    return Err(DatasetError::MalformedRecord {
                        path: archive.clone(),
                        message: "more than one test batch".to_string(),
                    });
                }
                test = Some(batch);
            } else {
                train.push(batch);
            }
        }

        let test = test.ok_or_else(|| DatasetError::MissingMember {
            archive: archive.clone(),
            pattern: "test batch".to_string(),
        })?;
        if train.is_empty() {
            return Err(DatasetError::MissingMember {
                archive: archive.clone(),
                pattern: "train batch".to_string(),
            });
        }

        let (x_train, y_train) = stack_batches(train, archive)?;
        let metadata = self.read_metadata(archive, &members, dest_dir)?;

        Ok(ParsedDataset::Images(ImageDataset {
            x_train: to_images(x_train, archive)?,
            y_train,
            x_test: to_images(test.images, archive)?,
            y_test: test.labels,
            metadata,
        }))
    }
}

impl Cifar {
    fn read_metadata(
        &self,
        archive: &Path,
        members: &[String],
        dest_dir: &Path,
    ) -> Result<Metadata, DatasetError> {
        let meta_member = members
            .iter()
            .find(|m| file_name(m).contains("meta"))
            .ok_or_else(|| DatasetError::MissingMember {
                archive: archive.to_path_buf(),
                pattern: "*meta*".to_string(),
            })?;

        let local = extract_member(archive, meta_member, dest_dir)?;
        let meta = read_pickle(&local)?.normalize_text();
        let label_names = meta
            .get(self.label_names_key())
            .and_then(Value::to_string_list)
            .ok_or_else(|| DatasetError::MalformedRecord {
                path: local.clone(),
                message: format!("missing '{}'", self.label_names_key()),
            })?;

        Ok(Metadata {
            label_names,
            attributes: Some(meta),
            ..Default::default()
        })
    }
}

/// Decode one normalized batch mapping.
pub fn decode_batch(value: &Value, label_key: &str, path: &Path) -> Result<Batch, DatasetError> {
    let missing = |key: &str| DatasetError::MalformedRecord {
        path: path.to_path_buf(),
        message: format!("batch has no '{}' entry", key),
    };

    let data = value.get("data").ok_or_else(|| missing("data"))?;
    let images = batch_images(data, path)?;

    let labels = value
        .get(label_key)
        .and_then(Value::to_int_vec)
        .ok_or_else(|| missing(label_key))?;

    if labels.len() != images.nrows() {
        return Err(DatasetError::InconsistentRows {
            path: path.to_path_buf(),
            expected: images.nrows(),
            found: labels.len(),
        });
    }

    Ok(Batch {
        images,
        labels: Array1::from(labels),
    })
}

/// `data` is normally a `uint8` array but older pickles store nested lists.
fn batch_images(data: &Value, path: &Path) -> Result<Array2<u8>, DatasetError> {
    let malformed = |message: String| DatasetError::MalformedRecord {
        path: path.to_path_buf(),
        message,
    };

    match data {
        Value::Array(array) => {
            if array.item_size() != Some(1) {
                return Err(malformed(format!("unexpected image dtype '{}'", array.dtype)));
            }
            let (rows, cols) = match array.shape.as_slice() {
                [rows, cols] => (*rows, *cols),
                [rows] if *rows == 0 => (0, ROW_LEN),
                other => return Err(malformed(format!("unexpected image shape {:?}", other))),
            };
            if cols != ROW_LEN {
                return Err(DatasetError::InconsistentRows {
                    path: path.to_path_buf(),
                    expected: ROW_LEN,
                    found: cols,
                });
            }
            let len = rows.checked_mul(cols).ok_or_else(|| DatasetError::Pickle {
                path: path.to_path_buf(),
                message: format!("image shape {:?} overflows", array.shape),
            })?;
            let bytes = array
                .data
                .get(..len)
                .ok_or_else(|| malformed("image payload shorter than its shape".to_string()))?
                .to_vec();
            let images = if array.fortran_order {
                Array2::from_shape_vec((rows, cols).f(), bytes)
                    .map(|a| a.as_standard_layout().to_owned())
            } else {
                Array2::from_shape_vec((rows, cols), bytes)
            };
            images.map_err(|e| malformed(e.to_string()))
        }
        Value::List(rows) | Value::Tuple(rows) => {
            let mut bytes = Vec::with_capacity(rows.len() * ROW_LEN);
            for row in rows {
                let values: Vec<i64> = match row {
                    Value::Bytes(raw) => raw.iter().map(|b| i64::from(*b)).collect(),
                    other => other
                        .to_int_vec()
                        .ok_or_else(|| malformed("image row is not a byte sequence".to_string()))?,
                };
                if values.len() != ROW_LEN {
                    return Err(DatasetError::InconsistentRows {
                        path: path.to_path_buf(),
                        expected: ROW_LEN,
                        found: values.len(),
                    });
                }
                for v in values {
                    let byte = u8::try_from(v)
                        .map_err(|_| malformed(format!("pixel value {} out of range", v)))?;
                    bytes.push(byte);
                }
            }
            Array2::from_shape_vec((rows.len(), ROW_LEN), bytes)
                .map_err(|e| malformed(e.to_string()))
        }
        _ => Err(malformed("'data' is neither an array nor a list".to_string())),
    }
}

/// Row-stack train batches in listing order.
fn stack_batches(
    batches: Vec<Batch>,
    archive: &Path,
) -> Result<(Array2<u8>, Array1<i64>), DatasetError> {
    let (images, labels): (Vec<_>, Vec<_>) = batches
        .into_iter()
        .map(|batch| (batch.images, batch.labels))
        .unzip();

    let stacked = row_stack(&images).and_then(|x| Ok((x, row_stack(&labels)?)));
    stacked.map_err(|e| DatasetError::MalformedRecord {
        path: archive.to_path_buf(),
        message: e.to_string(),
    })
}

fn to_images(rows: Array2<u8>, archive: &Path) -> Result<ndarray::Array4<u8>, DatasetError> {
    let count = rows.nrows();
    let flat = rows.as_standard_layout().into_owned().into_raw_vec();
    chw_to_hwc(flat, count, CHANNELS, SIDE, SIDE).map_err(|e| DatasetError::MalformedRecord {
        path: archive.to_path_buf(),
        message: e.to_string(),
    })
}

fn file_name(member: &str) -> &str {
    member.rsplit('/').next().unwrap_or(member)
}
