//! Canonical in-memory dataset shapes.
//!
//! Every loader returns one [`ParsedDataset`] variant. Image tensors are
//! always channels-last `(N, H, W, C)` `u8`, labels are `i64`, and numeric
//! tables are row-major `f64` matrices.
//!
//! The array helpers in this module ([`chw_to_hwc`], [`row_stack`],
//! [`correct_orientation`]) are pure transforms over `ndarray` values.

pub mod report;

use ndarray::{concatenate, Array, Array1, Array2, Array4, Axis, Dimension, RemoveAxis};
use serde::Serialize;

use crate::value::Value;

pub use report::LoadReport;

/// Side information carried next to the arrays.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Metadata {
    /// Class names indexed by label value.
    pub label_names: Vec<String>,
    /// Feature column names of a tabular dataset.
    pub columns: Vec<String>,
    /// Contents of the distributor's description file, verbatim.
    pub documentation: Option<String>,
    /// Per-row train (`true`) / test (`false`) assignment.
    pub train_mask: Option<Vec<bool>>,
    /// Remaining decoded metadata, with byte strings normalized to text.
    pub attributes: Option<Value>,
}

/// Train/test image tensors with integer labels.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageDataset {
    pub x_train: Array4<u8>,
    pub y_train: Array1<i64>,
    pub x_test: Array4<u8>,
    pub y_test: Array1<i64>,
    pub metadata: Metadata,
}

/// A numeric table with optional row names.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    /// Row names; empty when the source has none.
    pub index: Vec<String>,
    pub values: Array2<f64>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<Array1<f64>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.values.column(idx).to_owned())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableDataset {
    pub table: Table,
    pub metadata: Metadata,
}

/// A table together with its train/test partition.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitTableDataset {
    pub table: Table,
    pub x_train: Array2<f64>,
    pub y_train: Array1<f64>,
    pub x_test: Array2<f64>,
    pub y_test: Array1<f64>,
    pub metadata: Metadata,
}

/// Flat feature matrices with integer labels.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayDataset {
    pub x_train: Array2<f64>,
    pub y_train: Array1<i64>,
    pub x_test: Array2<f64>,
    pub y_test: Array1<i64>,
    pub metadata: Metadata,
}

/// Two-dimensional simulated classification data.
#[derive(Clone, Debug, PartialEq)]
pub struct MixtureDataset {
    pub x: Array2<f64>,
    pub y: Array1<i64>,
    /// Component means, only when requested.
    pub means: Option<Array2<f64>>,
    pub metadata: Metadata,
}

/// A table whose rows carry a string label each.
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledTable {
    pub table: Table,
    pub labels: Vec<String>,
    pub metadata: Metadata,
}

/// The terminal output of a load.
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedDataset {
    Images(ImageDataset),
    Table(TableDataset),
    SplitTable(SplitTableDataset),
    Arrays(ArrayDataset),
    Mixture(MixtureDataset),
    Labeled(LabeledTable),
}

impl ParsedDataset {
    pub fn metadata(&self) -> &Metadata {
        match self {
            ParsedDataset::Images(d) => &d.metadata,
            ParsedDataset::Table(d) => &d.metadata,
            ParsedDataset::SplitTable(d) => &d.metadata,
            ParsedDataset::Arrays(d) => &d.metadata,
            ParsedDataset::Mixture(d) => &d.metadata,
            ParsedDataset::Labeled(d) => &d.metadata,
        }
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            ParsedDataset::Images(_) => "images",
            ParsedDataset::Table(_) => "table",
            ParsedDataset::SplitTable(_) => "split-table",
            ParsedDataset::Arrays(_) => "arrays",
            ParsedDataset::Mixture(_) => "mixture",
            ParsedDataset::Labeled(_) => "labeled-table",
        }
    }

    /// Named array shapes, in a stable order.
    pub fn shapes(&self) -> Vec<(&'static str, Vec<usize>)> {
        match self {
            ParsedDataset::Images(d) => vec![
                ("x_train", d.x_train.shape().to_vec()),
                ("y_train", d.y_train.shape().to_vec()),
                ("x_test", d.x_test.shape().to_vec()),
                ("y_test", d.y_test.shape().to_vec()),
            ],
            ParsedDataset::Table(d) => vec![("table", d.table.values.shape().to_vec())],
            ParsedDataset::SplitTable(d) => vec![
                ("table", d.table.values.shape().to_vec()),
                ("x_train", d.x_train.shape().to_vec()),
                ("y_train", d.y_train.shape().to_vec()),
                ("x_test", d.x_test.shape().to_vec()),
                ("y_test", d.y_test.shape().to_vec()),
            ],
            ParsedDataset::Arrays(d) => vec![
                ("x_train", d.x_train.shape().to_vec()),
                ("y_train", d.y_train.shape().to_vec()),
                ("x_test", d.x_test.shape().to_vec()),
                ("y_test", d.y_test.shape().to_vec()),
            ],
            ParsedDataset::Mixture(d) => {
                let mut shapes = vec![("x", d.x.shape().to_vec()), ("y", d.y.shape().to_vec())];
                if let Some(means) = &d.means {
                    shapes.push(("means", means.shape().to_vec()));
                }
                shapes
            }
            ParsedDataset::Labeled(d) => vec![
                ("table", d.table.values.shape().to_vec()),
                ("labels", vec![d.labels.len()]),
            ],
        }
    }
}

// ============================================================================
// Array transforms
// ============================================================================

/// Reshape flat `(N, C*H*W)` channel-major rows into a channels-last
/// `(N, H, W, C)` tensor.
pub fn chw_to_hwc(
    data: Vec<u8>,
    count: usize,
    channels: usize,
    height: usize,
    width: usize,
) -> Result<Array4<u8>, ndarray::ShapeError> {
    let chw = Array4::from_shape_vec((count, channels, height, width), data)?;
    Ok(chw
        .permuted_axes([0, 2, 3, 1])
        .as_standard_layout()
        .to_owned())
}

/// Concatenate fragments along the first axis, in the order given.
pub fn row_stack<A, D>(parts: &[Array<A, D>]) -> Result<Array<A, D>, ndarray::ShapeError>
where
    A: Clone,
    D: RemoveAxis,
{
    let views: Vec<_> = parts.iter().map(|part| part.view()).collect();
    concatenate(Axis(0), &views)
}

/// Rotate every image 90 degrees clockwise over the last two axes, then
/// mirror the last axis.
///
/// Applied to images stored column-first so that they display upright.
/// The composition is a transpose of the two image axes.
pub fn correct_orientation<A, D>(images: &Array<A, D>) -> Array<A, D>
where
    A: Clone,
    D: Dimension,
{
    let ndim = images.ndim();
    if ndim < 2 {
        return images.clone();
    }
    let (rows, cols) = (Axis(ndim - 2), Axis(ndim - 1));

    let mut view = images.view();
    // clockwise: transpose, then reverse each row
    view.swap_axes(rows.index(), cols.index());
    view.invert_axis(cols);
    // mirror
    view.invert_axis(cols);

    view.as_standard_layout().to_owned()
}
