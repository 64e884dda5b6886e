//! Dataset families and the closed set of known datasets.
//!
//! Each family implements [`Decoder`]: it owns a [`DatasetSource`]
//! describing its remote files, fetches them through the cache layer and
//! decodes the local copies into a [`ParsedDataset`].
//!
//! ```no_run
//! use ml_datasets::datasets::DatasetKind;
//! use ml_datasets::fetch::LoadOptions;
//!
//! let parsed = DatasetKind::FashionMnist.load(&LoadOptions::default())?;
//! # Ok::<(), ml_datasets::DatasetError>(())
//! ```

pub mod cifar;
pub mod esl;
pub mod mnist;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, info};

use crate::error::DatasetError;
use crate::fetch::{
    self, DatasetSource, LoadOptions, NoProgress, Progress, Transport, UreqTransport,
};
use crate::output::ParsedDataset;

/// Which label set a CIFAR-100 load returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LabelGranularity {
    /// 100 classes.
    #[default]
    Fine,
    /// 20 superclasses.
    Coarse,
}

impl LabelGranularity {
    pub fn as_str(self) -> &'static str {
        match self {
            LabelGranularity::Fine => "fine",
            LabelGranularity::Coarse => "coarse",
        }
    }
}

/// EMNIST split.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum EmnistSplit {
    Byclass,
    Bymerge,
    Balanced,
    Letters,
    Digits,
    #[default]
    Mnist,
}

impl EmnistSplit {
    pub fn as_str(self) -> &'static str {
        match self {
            EmnistSplit::Byclass => "byclass",
            EmnistSplit::Bymerge => "bymerge",
            EmnistSplit::Balanced => "balanced",
            EmnistSplit::Letters => "letters",
            EmnistSplit::Digits => "digits",
            EmnistSplit::Mnist => "mnist",
        }
    }
}

/// Options that only some families look at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FamilyOptions {
    /// CIFAR-100 label set.
    pub labels: LabelGranularity,
    /// EMNIST split.
    pub split: EmnistSplit,
    /// Override the family's orientation-correction default.
    pub rotate: Option<bool>,
    /// Include the mixture component means.
    pub with_means: bool,
}

/// A dataset family decoder.
pub trait Decoder {
    /// Human-readable dataset title used in progress messages.
    fn title(&self) -> String;

    /// Remote files and local cache location.
    fn source(&self) -> &DatasetSource;

    /// Materialize every remote file locally.
    fn fetch(
        &self,
        transport: &dyn Transport,
        progress: &dyn Progress,
    ) -> Result<Vec<PathBuf>, DatasetError> {
        fetch::materialize(self.source(), transport, progress)
    }

    /// Decode already-materialized files, given in `source().filenames` order.
    fn decode(&self, paths: &[PathBuf]) -> Result<ParsedDataset, DatasetError>;

    fn load(
        &self,
        transport: &dyn Transport,
        progress: &dyn Progress,
    ) -> Result<ParsedDataset, DatasetError> {
        if self.source().verbose {
            info!("Retrieving {} dataset...", self.title());
        } else {
            debug!("Retrieving {} dataset...", self.title());
        }
        let paths = self.fetch(transport, progress)?;
        self.decode(&paths)
    }
}

/// Every dataset this crate knows how to load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DatasetKind {
    Cifar10,
    Cifar100,
    FashionMnist,
    Emnist,
    EslMixture,
    EslProstate,
    EslSpam,
    EslZipDigits,
    EslNci,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 9] = [
        DatasetKind::Cifar10,
        DatasetKind::Cifar100,
        DatasetKind::FashionMnist,
        DatasetKind::Emnist,
        DatasetKind::EslMixture,
        DatasetKind::EslProstate,
        DatasetKind::EslSpam,
        DatasetKind::EslZipDigits,
        DatasetKind::EslNci,
    ];

    /// Canonical command-line name.
    pub fn name(self) -> &'static str {
        match self {
            DatasetKind::Cifar10 => "cifar10",
            DatasetKind::Cifar100 => "cifar100",
            DatasetKind::FashionMnist => "fashion-mnist",
            DatasetKind::Emnist => "emnist",
            DatasetKind::EslMixture => "esl-mixture",
            DatasetKind::EslProstate => "esl-prostate",
            DatasetKind::EslSpam => "esl-spam",
            DatasetKind::EslZipDigits => "esl-zip",
            DatasetKind::EslNci => "esl-nci",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            DatasetKind::Cifar10 => "CIFAR-10 32x32 colour images, 10 classes",
            DatasetKind::Cifar100 => "CIFAR-100 32x32 colour images, 100 fine / 20 coarse classes",
            DatasetKind::FashionMnist => "Fashion-MNIST 28x28 grayscale article images, 10 classes",
            DatasetKind::Emnist => "EMNIST handwritten characters and digits, six splits",
            DatasetKind::EslMixture => "ESL simulated two-class mixture",
            DatasetKind::EslProstate => "ESL prostate cancer regression table",
            DatasetKind::EslSpam => "ESL e-mail spam table with train/test split",
            DatasetKind::EslZipDigits => "ESL normalized handwritten zip code digits",
            DatasetKind::EslNci => "ESL NCI microarray expression with cancer labels",
        }
    }

    /// Build the family decoder for this dataset.
    pub fn decoder(self, opts: &LoadOptions, family: &FamilyOptions) -> Box<dyn Decoder> {
        match self {
            DatasetKind::Cifar10 => Box::new(cifar::Cifar::cifar10(opts)),
            DatasetKind::Cifar100 => Box::new(cifar::Cifar::cifar100(family.labels, opts)),
            DatasetKind::FashionMnist => Box::new(mnist::FashionMnist::new(family.rotate, opts)),
            DatasetKind::Emnist => Box::new(mnist::Emnist::new(family.split, family.rotate, opts)),
            DatasetKind::EslMixture => Box::new(esl::Mixture::new(family.with_means, opts)),
            DatasetKind::EslProstate => Box::new(esl::Prostate::new(opts)),
            DatasetKind::EslSpam => Box::new(esl::Spam::new(opts)),
            DatasetKind::EslZipDigits => Box::new(esl::ZipDigits::new(opts)),
            DatasetKind::EslNci => Box::new(esl::Nci::new(opts)),
        }
    }

    /// Fetch and decode with family defaults over HTTP.
    pub fn load(self, opts: &LoadOptions) -> Result<ParsedDataset, DatasetError> {
        self.load_with(
            opts,
            &FamilyOptions::default(),
            &UreqTransport::new(),
            &NoProgress,
        )
    }

    /// Fetch and decode with explicit family options, transport and
    /// progress reporting.
    pub fn load_with(
        self,
        opts: &LoadOptions,
        family: &FamilyOptions,
        transport: &dyn Transport,
        progress: &dyn Progress,
    ) -> Result<ParsedDataset, DatasetError> {
        self.decoder(opts, family).load(transport, progress)
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DatasetKind {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        let kind = match normalized.as_str() {
            "cifar10" | "cifar-10" => DatasetKind::Cifar10,
            "cifar100" | "cifar-100" => DatasetKind::Cifar100,
            "fashion-mnist" | "fmnist" => DatasetKind::FashionMnist,
            "emnist" => DatasetKind::Emnist,
            "esl-mixture" | "mixture" => DatasetKind::EslMixture,
            "esl-prostate" | "prostate" => DatasetKind::EslProstate,
            "esl-spam" | "spam" => DatasetKind::EslSpam,
            "esl-zip" | "zip" | "esl-zip-digits" => DatasetKind::EslZipDigits,
            "esl-nci" | "nci" => DatasetKind::EslNci,
            _ => return Err(DatasetError::UnknownDataset(s.to_string())),
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for kind in DatasetKind::ALL {
            assert_eq!(kind.name().parse::<DatasetKind>().unwrap(), kind);
        }
    }

    #[test]
    fn aliases_are_accepted() {
        assert_eq!("CIFAR-10".parse::<DatasetKind>().unwrap(), DatasetKind::Cifar10);
        assert_eq!("fmnist".parse::<DatasetKind>().unwrap(), DatasetKind::FashionMnist);
        assert_eq!("esl_nci".parse::<DatasetKind>().unwrap(), DatasetKind::EslNci);
    }

    #[test]
    fn unknown_name_is_an_error() {
        let err = "imagenet".parse::<DatasetKind>().unwrap_err();
        assert!(matches!(err, DatasetError::UnknownDataset(name) if name == "imagenet"));
    }

    #[test]
    fn family_defaults_match_distributor_conventions() {
        let family = FamilyOptions::default();
        assert_eq!(family.labels, LabelGranularity::Fine);
        assert_eq!(family.split, EmnistSplit::Mnist);
        assert_eq!(family.rotate, None);
        assert!(!family.with_means);
    }

    #[test]
    fn decoders_use_family_cache_dirs() {
        let opts = LoadOptions::default();
        let family = FamilyOptions::default();
        let tmp = std::env::temp_dir();

        assert_eq!(DatasetKind::Cifar10.decoder(&opts, &family).source().target_dir, tmp);
        assert_eq!(DatasetKind::Emnist.decoder(&opts, &family).source().target_dir, tmp);
        assert_eq!(
            DatasetKind::FashionMnist.decoder(&opts, &family).source().target_dir,
            tmp.join("fmnist")
        );
        assert_eq!(
            DatasetKind::EslSpam.decoder(&opts, &family).source().target_dir,
            tmp.join("ESL")
        );
    }
}
