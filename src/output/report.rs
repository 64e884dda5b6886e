//! Load report types and terminal formatting.
//!
//! A [`LoadReport`] summarizes a [`ParsedDataset`] without its array payload
//! so it can be rendered as text (Display) or serialized as JSON.

use std::fmt;

use serde::Serialize;

use super::ParsedDataset;

/// Summary of a decoded dataset.
#[derive(Clone, Debug, Serialize)]
pub struct LoadReport {
    /// Dataset name as given on the command line.
    pub dataset: String,
    /// Output variant name.
    pub kind: &'static str,
    /// Named array shapes.
    pub arrays: Vec<ArrayShape>,
    pub label_names: Vec<String>,
    pub columns: Vec<String>,
    /// Number of training rows in the train mask, when present.
    pub train_rows: Option<usize>,
    pub documentation: Option<String>,
}

/// Shape of one named array.
#[derive(Clone, Debug, Serialize)]
pub struct ArrayShape {
    pub name: &'static str,
    pub shape: Vec<usize>,
}

impl LoadReport {
    pub fn new(dataset: impl Into<String>, parsed: &ParsedDataset) -> Self {
        let metadata = parsed.metadata();
        Self {
            dataset: dataset.into(),
            kind: parsed.variant_name(),
            arrays: parsed
                .shapes()
                .into_iter()
                .map(|(name, shape)| ArrayShape { name, shape })
                .collect(),
            label_names: metadata.label_names.clone(),
            columns: metadata.columns.clone(),
            train_rows: metadata
                .train_mask
                .as_ref()
                .map(|mask| mask.iter().filter(|t| **t).count()),
            documentation: metadata.documentation.clone(),
        }
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dataset: {} ({})", self.dataset, self.kind)?;
        writeln!(f)?;

        writeln!(f, "Arrays:")?;
        let width = self.arrays.iter().map(|a| a.name.len()).max().unwrap_or(0);
        for array in &self.arrays {
            writeln!(
                f,
                "  {:<width$}  {}",
                array.name,
                format_shape(&array.shape),
                width = width
            )?;
        }

        if !self.label_names.is_empty() {
            writeln!(f)?;
            writeln!(f, "Labels ({}):", self.label_names.len())?;
            for (idx, name) in self.label_names.iter().enumerate() {
                writeln!(f, "  {:>3}  {}", idx, name)?;
            }
        }

        if !self.columns.is_empty() {
            writeln!(f)?;
            writeln!(f, "Columns ({}): {}", self.columns.len(), self.columns.join(", "))?;
        }

        if let Some(train_rows) = self.train_rows {
            writeln!(f, "Train rows: {}", train_rows)?;
        }

        if let Some(doc) = &self.documentation {
            let first = doc.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
            writeln!(f)?;
            writeln!(f, "Documentation: {} line(s)", doc.lines().count())?;
            if !first.is_empty() {
                writeln!(f, "  {}", first.trim())?;
            }
        }

        Ok(())
    }
}

fn format_shape(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("({})", dims.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Metadata, MixtureDataset};
    use ndarray::{Array1, Array2};

    fn mixture() -> ParsedDataset {
        ParsedDataset::Mixture(MixtureDataset {
            x: Array2::zeros((4, 2)),
            y: Array1::zeros(4),
            means: None,
            metadata: Metadata {
                documentation: Some("\nMixture simulation\nsecond line\n".to_string()),
                ..Default::default()
            },
        })
    }

    #[test]
    fn text_report_lists_shapes_and_doc_headline() {
        let text = LoadReport::new("esl-mixture", &mixture()).to_string();
        assert!(text.contains("Dataset: esl-mixture (mixture)"));
        assert!(text.contains("x  (4, 2)"));
        assert!(text.contains("y  (4)"));
        assert!(text.contains("  Mixture simulation"));
    }

    #[test]
    fn json_report_skips_payload() {
        let json = serde_json::to_value(LoadReport::new("esl-mixture", &mixture())).unwrap();
        assert_eq!(json["kind"], "mixture");
        assert_eq!(json["arrays"][0]["name"], "x");
        assert_eq!(json["arrays"][0]["shape"], serde_json::json!([4, 2]));
    }
}
