//! Lazy member extraction from tar and zip containers.
//!
//! Dataset archives are never unpacked wholesale. Decoders list the members,
//! pick the ones they need by name, and extract each on first access into
//! the directory holding the archive. A member whose local copy already
//! exists is not extracted again.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tempfile::NamedTempFile;
use tracing::{debug, trace};

use crate::error::DatasetError;

/// Supported container formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar,
    TarGz,
    Zip,
}

impl ArchiveKind {
    /// Detect the container format from the archive's file name.
    pub fn detect(path: &Path) -> Result<Self, DatasetError> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.to_ascii_lowercase())
            .unwrap_or_default();

        if name.ends_with(".zip") {
            Ok(ArchiveKind::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(ArchiveKind::TarGz)
        } else if name.ends_with(".tar") {
            Ok(ArchiveKind::Tar)
        } else {
            Err(DatasetError::UnsupportedArchive {
                path: path.to_path_buf(),
            })
        }
    }
}

/// A named entry inside a container archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveMember {
    pub archive: PathBuf,
    pub name: String,
}

impl ArchiveMember {
    pub fn new(archive: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            archive: archive.into(),
            name: name.into(),
        }
    }

    /// Where this member lives once extracted into `dest_dir`.
    pub fn local_path(&self, dest_dir: &Path) -> PathBuf {
        dest_dir.join(&self.name)
    }

    /// Extract into `dest_dir` unless already present.
    pub fn extract(&self, dest_dir: &Path) -> Result<PathBuf, DatasetError> {
        extract_member(&self.archive, &self.name, dest_dir)
    }
}

/// List file members in archive directory order. Directory entries are
/// skipped.
pub fn list_members(archive: &Path) -> Result<Vec<String>, DatasetError> {
    match ArchiveKind::detect(archive)? {
        ArchiveKind::Zip => list_zip(archive),
        ArchiveKind::Tar => list_tar(archive, open_file(archive)?),
        ArchiveKind::TarGz => list_tar(archive, GzDecoder::new(open_file(archive)?)),
    }
}

/// Filter `members` with `predicate`, keeping listing order.
///
/// An empty result is an error: either the distributor changed the archive
/// layout or the caller asked for a dataset variant that does not exist.
pub fn select_members<F>(
    archive: &Path,
    members: &[String],
    pattern: &str,
    predicate: F,
) -> Result<Vec<String>, DatasetError>
where
    F: Fn(&str) -> bool,
{
    let selected: Vec<String> = members
        .iter()
        .filter(|name| predicate(name))
        .cloned()
        .collect();

    if selected.is_empty() {
        return Err(DatasetError::MissingMember {
            archive: archive.to_path_buf(),
            pattern: pattern.to_string(),
        });
    }
    Ok(selected)
}

/// Extract one member into `dest_dir` and return its local path.
///
/// Idempotent: when the local path already exists it is returned without
/// touching the archive.
pub fn extract_member(
    archive: &Path,
    member: &str,
    dest_dir: &Path,
) -> Result<PathBuf, DatasetError> {
    let relative = safe_relative_path(archive, member)?;
    let dest = dest_dir.join(relative);

    if dest.is_file() {
        trace!(path = %dest.display(), "member already extracted");
        return Ok(dest);
    }

    let parent = dest.parent().unwrap_or(dest_dir);
    fs::create_dir_all(parent).map_err(|source| DatasetError::CacheDirectory {
        path: parent.to_path_buf(),
        source,
    })?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|source| DatasetError::CacheDirectory {
        path: parent.to_path_buf(),
        source,
    })?;

    let found = match ArchiveKind::detect(archive)? {
        ArchiveKind::Zip => copy_zip_member(archive, member, temp.as_file_mut())?,
        ArchiveKind::Tar => {
            copy_tar_member(archive, open_file(archive)?, member, temp.as_file_mut())?
        }
        ArchiveKind::TarGz => copy_tar_member(
            archive,
            GzDecoder::new(open_file(archive)?),
            member,
            temp.as_file_mut(),
        )?,
    };

    if !found {
        return Err(DatasetError::MissingMember {
            archive: archive.to_path_buf(),
            pattern: member.to_string(),
        });
    }

    temp.flush()?;
    temp.persist(&dest).map_err(|e| DatasetError::Io(e.error))?;
    debug!(member, path = %dest.display(), "extracted archive member");
    Ok(dest)
}

fn open_file(path: &Path) -> Result<BufReader<File>, DatasetError> {
    Ok(BufReader::new(File::open(path)?))
}

fn corrupt(archive: &Path, err: impl std::fmt::Display) -> DatasetError {
    DatasetError::CorruptArchive {
        path: archive.to_path_buf(),
        message: err.to_string(),
    }
}

/// Reject member names that would land outside the destination directory.
fn safe_relative_path(archive: &Path, member: &str) -> Result<PathBuf, DatasetError> {
    let path = Path::new(member);
    let escapes = path.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || member.is_empty() {
        return Err(corrupt(
            archive,
            format!("member '{}' escapes the extraction directory", member),
        ));
    }
    Ok(path.to_path_buf())
}

fn list_tar<R: Read>(archive: &Path, reader: R) -> Result<Vec<String>, DatasetError> {
    let mut tar = tar::Archive::new(reader);
    let mut names = Vec::new();

    for entry in tar.entries().map_err(|e| corrupt(archive, e))? {
        let entry = entry.map_err(|e| corrupt(archive, e))?;
        if entry.header().entry_type().is_dir() {
            continue;
        }
        let path = entry.path().map_err(|e| corrupt(archive, e))?;
        names.push(path.to_string_lossy().into_owned());
    }

    Ok(names)
}

fn copy_tar_member<R: Read>(
    archive: &Path,
    reader: R,
    member: &str,
    out: &mut File,
) -> Result<bool, DatasetError> {
    let mut tar = tar::Archive::new(reader);

    for entry in tar.entries().map_err(|e| corrupt(archive, e))? {
        let mut entry = entry.map_err(|e| corrupt(archive, e))?;
        let matches = entry
            .path()
            .map(|path| path.to_string_lossy() == member)
            .map_err(|e| corrupt(archive, e))?;
        if matches {
            io::copy(&mut entry, out).map_err(|e| corrupt(archive, e))?;
            return Ok(true);
        }
    }

    Ok(false)
}

fn open_zip(archive: &Path) -> Result<zip::ZipArchive<BufReader<File>>, DatasetError> {
    zip::ZipArchive::new(open_file(archive)?).map_err(|e| corrupt(archive, e))
}

fn list_zip(archive: &Path) -> Result<Vec<String>, DatasetError> {
    let mut zip = open_zip(archive)?;
    let mut names = Vec::with_capacity(zip.len());

    for index in 0..zip.len() {
        let file = zip.by_index(index).map_err(|e| corrupt(archive, e))?;
        if file.is_dir() {
            continue;
        }
        names.push(file.name().to_string());
    }

    Ok(names)
}

fn copy_zip_member(archive: &Path, member: &str, out: &mut File) -> Result<bool, DatasetError> {
    let mut zip = open_zip(archive)?;
    let mut file = match zip.by_name(member) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(false),
        Err(e) => return Err(corrupt(archive, e)),
    };
    io::copy(&mut file, out).map_err(|e| corrupt(archive, e))?;
    Ok(true)
}
