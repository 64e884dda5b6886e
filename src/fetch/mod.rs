//! Fetch/cache layer.
//!
//! A [`DatasetSource`] names the remote files of one dataset and where they
//! live locally. [`materialize`] makes sure every file exists under the
//! target directory, downloading only what is missing (or everything when
//! `force` is set).
//!
//! # Cache validity
//!
//! A file is considered cached purely because its path exists. A corrupt
//! local copy is indistinguishable from a good one until it is re-fetched
//! with `force`. Downloads stream into a temporary file in the target
//! directory and are renamed into place only once the body is complete, so
//! an interrupted transfer never leaves a truncated file at the final path.
//!
//! Concurrent invocations targeting the same path are not coordinated; the
//! last rename wins.

pub mod progress;
pub mod transport;

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::DatasetError;

pub use progress::{BarProgress, NoProgress, Progress};
pub use transport::{FetchResponse, Transport, UreqTransport};

/// Default transfer chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Caller-controlled options shared by every dataset family.
#[derive(Clone, Debug)]
pub struct LoadOptions {
    /// Cache directory. `None` selects the family default under the system
    /// temp directory.
    pub target_dir: Option<PathBuf>,
    /// Re-download even when the file is already cached.
    pub force: bool,
    /// Transfer chunk size in bytes.
    pub chunk_size: usize,
    /// Log progress messages at `info` instead of `debug`.
    pub verbose: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            target_dir: None,
            force: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            verbose: true,
        }
    }
}

/// Immutable description of a dataset's remote files and local cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetSource {
    pub base_url: String,
    pub filenames: Vec<String>,
    pub target_dir: PathBuf,
    pub force: bool,
    pub chunk_size: usize,
    pub verbose: bool,
}

impl DatasetSource {
    /// Build a source from a base URL, remote filenames and load options.
    ///
    /// `family_dir` is the sub-folder of the system temp directory used when
    /// the options do not name a target directory.
    pub fn new<I, S>(
        base_url: &str,
        filenames: I,
        family_dir: Option<&str>,
        opts: &LoadOptions,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let target_dir = opts
            .target_dir
            .clone()
            .unwrap_or_else(|| default_target_dir(family_dir));

        Self {
            base_url: base_url.to_string(),
            filenames: filenames.into_iter().map(Into::into).collect(),
            target_dir,
            force: opts.force,
            chunk_size: opts.chunk_size.max(1),
            verbose: opts.verbose,
        }
    }

    /// Local paths for every remote file, positionally aligned with
    /// `filenames`.
    pub fn resolve_paths(&self) -> Vec<PathBuf> {
        self.filenames
            .iter()
            .map(|name| self.target_dir.join(name))
            .collect()
    }

    /// Cached artifacts for every remote file, in `filenames` order.
    pub fn artifacts(&self) -> Vec<CachedArtifact> {
        self.resolve_paths()
            .into_iter()
            .map(CachedArtifact::new)
            .collect()
    }

    /// Remote URL of one file, joined the way a browser resolves a relative
    /// link against `base_url`.
    pub fn url_for(&self, filename: &str) -> Result<String, DatasetError> {
        let base = url::Url::parse(&self.base_url).map_err(|source| DatasetError::InvalidUrl {
            url: self.base_url.clone(),
            reason: source.to_string(),
        })?;
        let joined = base.join(filename).map_err(|source| DatasetError::InvalidUrl {
            url: format!("{}{}", self.base_url, filename),
            reason: source.to_string(),
        })?;
        Ok(joined.to_string())
    }
}

/// A local file that may or may not have been downloaded yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedArtifact {
    pub path: PathBuf,
}

impl CachedArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Presence is path existence only; content is never checked.
    pub fn is_present(&self) -> bool {
        self.path.is_file()
    }
}

/// Default cache directory: the system temp dir, optionally with a family
/// sub-folder.
pub fn default_target_dir(family_dir: Option<&str>) -> PathBuf {
    let tmp = std::env::temp_dir();
    match family_dir {
        Some(name) => tmp.join(name),
        None => tmp,
    }
}

/// Ensure every file of `source` exists locally and return the local paths
/// in `filenames` order.
pub fn materialize(
    source: &DatasetSource,
    transport: &dyn Transport,
    progress: &dyn Progress,
) -> Result<Vec<PathBuf>, DatasetError> {
    ensure_target_dir(&source.target_dir)?;

    let artifacts = source.artifacts();
    for (filename, artifact) in source.filenames.iter().zip(&artifacts) {
        fetch_file(source, filename, artifact, transport, progress)?;
    }

    Ok(artifacts.into_iter().map(|artifact| artifact.path).collect())
}

/// Probe a URL with a GET, discarding the body.
pub fn check_url(url: &str, transport: &dyn Transport) -> Result<(), DatasetError> {
    transport.get(url).map(|_| ())
}

fn ensure_target_dir(dir: &Path) -> Result<(), DatasetError> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|source| DatasetError::CacheDirectory {
        path: dir.to_path_buf(),
        source,
    })
}

fn fetch_file(
    source: &DatasetSource,
    filename: &str,
    artifact: &CachedArtifact,
    transport: &dyn Transport,
    progress: &dyn Progress,
) -> Result<(), DatasetError> {
    if !source.force && artifact.is_present() {
        if source.verbose {
            info!(path = %artifact.path.display(), "available locally, skip downloading");
        } else {
            debug!(path = %artifact.path.display(), "available locally, skip downloading");
        }
        return Ok(());
    }

    let url = source.url_for(filename)?;
    if source.verbose {
        info!("from {} to {}", url, artifact.path.display());
    } else {
        debug!("from {} to {}", url, artifact.path.display());
    }

    let response = transport.get(&url)?;
    stream_to_path(source, &url, response, &artifact.path, progress)
}

/// Stream a response body into `dest` via a temporary sibling file.
fn stream_to_path(
    source: &DatasetSource,
    url: &str,
    response: FetchResponse,
    dest: &Path,
    progress: &dyn Progress,
) -> Result<(), DatasetError> {
    let FetchResponse {
        content_length,
        mut body,
    } = response;

    let mut temp =
        NamedTempFile::new_in(&source.target_dir).map_err(|e| DatasetError::CacheDirectory {
            path: source.target_dir.clone(),
            source: e,
        })?;

    let mut buffer = vec![0u8; source.chunk_size];
    let mut downloaded = 0u64;
    progress.begin(url, content_length);

    loop {
        let bytes_read = body
            .read(&mut buffer)
            .map_err(|e| DatasetError::NetworkUnavailable {
                url: url.to_string(),
                reason: format!("read error: {}", e),
            })?;
        if bytes_read == 0 {
            break;
        }

        temp.write_all(&buffer[..bytes_read])?;
        downloaded += bytes_read as u64;
        progress.advance(downloaded, content_length);
    }

    temp.flush()?;
    temp.persist(dest).map_err(|e| DatasetError::Io(e.error))?;
    progress.finish(dest);

    debug!(bytes = downloaded, path = %dest.display(), "download complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts_in(dir: &Path) -> LoadOptions {
        LoadOptions {
            target_dir: Some(dir.to_path_buf()),
            verbose: false,
            ..Default::default()
        }
    }

    #[test]
    fn resolve_paths_preserves_order_and_length() {
        let source = DatasetSource::new(
            "https://example.org/data/",
            ["b.gz", "a.gz", "c.txt"],
            None,
            &opts_in(Path::new("/cache")),
        );

        let paths = source.resolve_paths();
        assert_eq!(paths.len(), source.filenames.len());
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/cache/b.gz"),
                PathBuf::from("/cache/a.gz"),
                PathBuf::from("/cache/c.txt"),
            ]
        );
    }

    #[test]
    fn default_target_dir_uses_family_subfolder() {
        let source = DatasetSource::new(
            "https://example.org/",
            ["x"],
            Some("ESL"),
            &LoadOptions::default(),
        );
        assert_eq!(source.target_dir, std::env::temp_dir().join("ESL"));
        assert_eq!(default_target_dir(None), std::env::temp_dir());
    }

    #[test]
    fn url_for_joins_relative_to_base() {
        let source = DatasetSource::new(
            "https://www.cs.toronto.edu/~kriz/",
            ["cifar-10-python.tar.gz"],
            None,
            &LoadOptions::default(),
        );
        assert_eq!(
            source.url_for("cifar-10-python.tar.gz").expect("join"),
            "https://www.cs.toronto.edu/~kriz/cifar-10-python.tar.gz"
        );
    }

    #[test]
    fn invalid_base_url_is_reported() {
        let source = DatasetSource::new("not a url", ["x"], None, &LoadOptions::default());
        assert!(matches!(
            source.url_for("x"),
            Err(DatasetError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        let opts = LoadOptions {
            chunk_size: 0,
            ..Default::default()
        };
        let source = DatasetSource::new("https://example.org/", ["x"], None, &opts);
        assert_eq!(source.chunk_size, 1);
    }

    #[test]
    fn unwritable_target_dir_is_cache_directory_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let blocker = tmp.path().join("file");
        fs::write(&blocker, b"x").expect("write");

        let err = ensure_target_dir(&blocker.join("sub")).expect_err("should fail");
        assert!(matches!(err, DatasetError::CacheDirectory { .. }));
    }
}
