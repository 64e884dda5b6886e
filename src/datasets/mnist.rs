//! Compressed IDX image sets: Fashion-MNIST and EMNIST.
//!
//! Fashion-MNIST ships four gzip files directly. EMNIST ships one zip
//! (`gzip.zip`) holding gzip files for every split; only the members of the
//! requested split are extracted.
//!
//! EMNIST images are stored transposed, so orientation correction is on by
//! default there and off for Fashion-MNIST. Either default can be
//! overridden.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array4, ArrayD, Axis, Ix1, Ix3, Ix4};
use tracing::debug;

use super::{Decoder, EmnistSplit};
use crate::archive::{extract_member, list_members, select_members};
use crate::error::DatasetError;
use crate::fetch::{DatasetSource, LoadOptions};
use crate::formats::idx::{read_idx_gz, IdxArray};
use crate::output::{correct_orientation, ImageDataset, Metadata, ParsedDataset};

pub const FASHION_MNIST_URL: &str = "http://fashion-mnist.s3-website.eu-central-1.amazonaws.com/";
pub const FASHION_MNIST_FILES: [&str; 4] = [
    "train-images-idx3-ubyte.gz",
    "train-labels-idx1-ubyte.gz",
    "t10k-images-idx3-ubyte.gz",
    "t10k-labels-idx1-ubyte.gz",
];
pub const FASHION_MNIST_CLASSES: [&str; 10] = [
    "T-shirt/top",
    "Trouser",
    "Pullover",
    "Dress",
    "Coat",
    "Sandal",
    "Shirt",
    "Sneaker",
    "Bag",
    "Ankle boot",
];

pub const EMNIST_URL: &str = "http://www.itl.nist.gov/iaui/vip/cs_links/EMNIST/";
pub const EMNIST_ARCHIVE: &str = "gzip.zip";

/// Train or test partition of a tensor file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

/// Whether a tensor file holds images or labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorKind {
    Images,
    Labels,
}

impl TensorKind {
    fn as_str(self) -> &'static str {
        match self {
            TensorKind::Images => "images",
            TensorKind::Labels => "labels",
        }
    }
}

/// Classify a tensor file by name. Anything not named `train` is test data
/// (Fashion-MNIST calls its test files `t10k`).
pub fn classify(name: &str) -> Option<(Split, TensorKind)> {
    let split = if name.contains("train") {
        Split::Train
    } else {
        Split::Test
    };
    let kind = if name.contains("images") {
        TensorKind::Images
    } else if name.contains("labels") {
        TensorKind::Labels
    } else {
        return None;
    };
    Some((split, kind))
}

/// The four canonical tensors, filled in as files are decoded.
#[derive(Debug, Default)]
struct Tensors {
    train_images: Option<Array4<u8>>,
    train_labels: Option<Array1<i64>>,
    test_images: Option<Array4<u8>>,
    test_labels: Option<Array1<i64>>,
}

impl Tensors {
    fn insert(&mut self, name: &str, path: &Path, rotate: bool) -> Result<(), DatasetError> {
        let Some((split, kind)) = classify(name) else {
            debug!(file = name, "not an image or label tensor, skipping");
            return Ok(());
        };

        let array = read_idx_gz(path)?;
        match kind {
            TensorKind::Images => {
                let images = canonical_images(array, path, rotate)?;
                match split {
                    Split::Train => self.train_images = Some(images),
                    Split::Test => self.test_images = Some(images),
                }
            }
            TensorKind::Labels => {
                let labels = canonical_labels(array, path)?;
                match split {
                    Split::Train => self.train_labels = Some(labels),
                    Split::Test => self.test_labels = Some(labels),
                }
            }
        }
        Ok(())
    }

    fn finish(self, origin: &Path, metadata: Metadata) -> Result<ParsedDataset, DatasetError> {
        let missing = |pattern: &str| DatasetError::MissingMember {
            archive: origin.to_path_buf(),
            pattern: pattern.to_string(),
        };

        let x_train = self.train_images.ok_or_else(|| missing("train images"))?;
        let y_train = self.train_labels.ok_or_else(|| missing("train labels"))?;
        let x_test = self.test_images.ok_or_else(|| missing("test images"))?;
        let y_test = self.test_labels.ok_or_else(|| missing("test labels"))?;

        // one label per image in each split
        let counts = [
            (x_train.len_of(Axis(0)), y_train.len()),
            (x_test.len_of(Axis(0)), y_test.len()),
        ];
        for (images, labels) in counts {
            if images != labels {
                return Err(DatasetError::InconsistentRows {
                    path: origin.to_path_buf(),
                    expected: images,
                    found: labels,
                });
            }
        }

        Ok(ParsedDataset::Images(ImageDataset {
            x_train,
            y_train,
            x_test,
            y_test,
            metadata,
        }))
    }
}

/// Convert an IDX image tensor to `(N, H, W, C)`.
///
/// Three-dimensional tensors gain a trailing channel axis. Orientation
/// correction, when enabled, acts on the `H`/`W` axes only.
pub fn canonical_images(
    array: IdxArray,
    path: &Path,
    rotate: bool,
) -> Result<Array4<u8>, DatasetError> {
    let ndim = array.ndim();
    if !(3..=4).contains(&ndim) {
        return Err(dimension_mismatch(TensorKind::Images, "3 or 4", ndim, path));
    }
    let dtype = array.dtype();
    let images: ArrayD<u8> = array.into_u8().ok_or_else(|| DatasetError::MalformedRecord {
        path: path.to_path_buf(),
        message: format!("expected unsigned byte images, found {:?}", dtype),
    })?;

    let reshape_err = |e: ndarray::ShapeError| DatasetError::MalformedRecord {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    if ndim == 3 {
        let mut images = images.into_dimensionality::<Ix3>().map_err(reshape_err)?;
        if rotate {
            images = correct_orientation(&images);
        }
        Ok(images.insert_axis(Axis(3)))
    } else {
        let images = images.into_dimensionality::<Ix4>().map_err(reshape_err)?;
        if !rotate {
            return Ok(images);
        }
        // (N, H, W, C) -> (N, C, H, W) so the image axes are last
        let channels_first = images.permuted_axes([0, 3, 1, 2]);
        let corrected = correct_orientation(&channels_first);
        Ok(corrected
            .permuted_axes([0, 2, 3, 1])
            .as_standard_layout()
            .to_owned())
    }
}

/// Convert an IDX label tensor to `(N,)` `i64`.
pub fn canonical_labels(array: IdxArray, path: &Path) -> Result<Array1<i64>, DatasetError> {
    let ndim = array.ndim();
    if ndim != 1 {
        return Err(dimension_mismatch(TensorKind::Labels, "1", ndim, path));
    }
    let labels = array.to_i64().ok_or_else(|| DatasetError::MalformedRecord {
        path: path.to_path_buf(),
        message: format!("expected integer labels, found {:?}", array.dtype()),
    })?;
    labels
        .into_dimensionality::<Ix1>()
        .map_err(|e| DatasetError::MalformedRecord {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

fn dimension_mismatch(
    kind: TensorKind,
    expected: &str,
    found: usize,
    path: &Path,
) -> DatasetError {
    DatasetError::DimensionMismatch {
        path: path.to_path_buf(),
        kind: kind.as_str().to_string(),
        expected: expected.to_string(),
        found,
    }
}

// ============================================================================
// Fashion-MNIST
// ============================================================================

#[derive(Clone, Debug)]
pub struct FashionMnist {
    rotate: bool,
    source: DatasetSource,
}

impl FashionMnist {
    /// `rotate: None` keeps the family default (off).
    pub fn new(rotate: Option<bool>, opts: &LoadOptions) -> Self {
        Self {
            rotate: rotate.unwrap_or(false),
            source: DatasetSource::new(
                FASHION_MNIST_URL,
                FASHION_MNIST_FILES,
                Some("fmnist"),
                opts,
            ),
        }
    }

    pub fn rotate(&self) -> bool {
        self.rotate
    }
}

impl Decoder for FashionMnist {
    fn title(&self) -> String {
        "Fashion-MNIST".to_string()
    }

    fn source(&self) -> &DatasetSource {
        &self.source
    }

    fn decode(&self, paths: &[PathBuf]) -> Result<ParsedDataset, DatasetError> {
        let mut tensors = Tensors::default();
        for (name, path) in self.source.filenames.iter().zip(paths) {
            tensors.insert(name, path, self.rotate)?;
        }

        let metadata = Metadata {
            label_names: FASHION_MNIST_CLASSES.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        tensors.finish(&self.source.target_dir, metadata)
    }
}

// ============================================================================
// EMNIST
// ============================================================================

#[derive(Clone, Debug)]
pub struct Emnist {
    split: EmnistSplit,
    rotate: bool,
    source: DatasetSource,
}

impl Emnist {
    /// `rotate: None` keeps the family default (on).
    pub fn new(split: EmnistSplit, rotate: Option<bool>, opts: &LoadOptions) -> Self {
        Self {
            split,
            rotate: rotate.unwrap_or(true),
            source: DatasetSource::new(EMNIST_URL, [EMNIST_ARCHIVE], None, opts),
        }
    }

    pub fn rotate(&self) -> bool {
        self.rotate
    }

    /// Whether an archive member belongs to the selected split.
    pub fn is_split_member(&self, member: &str) -> bool {
        member.contains(&format!("-{}-", self.split.as_str())) && member.ends_with(".gz")
    }
}

impl Decoder for Emnist {
    fn title(&self) -> String {
        format!("EMNIST-{}", self.split.as_str())
    }

    fn source(&self) -> &DatasetSource {
        &self.source
    }

    fn decode(&self, paths: &[PathBuf]) -> Result<ParsedDataset, DatasetError> {
        let archive = paths
            .first()
            .ok_or_else(|| DatasetError::MissingMember {
                archive: self.source.target_dir.clone(),
                pattern: EMNIST_ARCHIVE.to_string(),
            })?;
        let dest_dir = archive.parent().unwrap_or(Path::new("."));

        let members = list_members(archive)?;
        let pattern = format!("*-{}-*.gz", self.split.as_str());
        let selected = select_members(archive, &members, &pattern, |m| self.is_split_member(m))?;

        let mut tensors = Tensors::default();
        for member in &selected {
            let local = extract_member(archive, member, dest_dir)?;
            let name = member.rsplit('/').next().unwrap_or(member);
            tensors.insert(name, &local, self.rotate)?;
        }

        tensors.finish(archive, Metadata::default())
    }
}
