#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use ml_datasets::error::DatasetError;
use ml_datasets::fetch::{FetchResponse, LoadOptions, Transport};
use ml_datasets::formats::idx::{to_idx_bytes, IdxArray};

// ============================================================================
// Transport fake
// ============================================================================

/// Serves canned bodies keyed by the last URL segment and records every
/// request it sees.
#[derive(Default)]
pub struct MockTransport {
    files: HashMap<String, Vec<u8>>,
    broken: HashMap<String, usize>,
    requests: RefCell<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: &str, body: impl Into<Vec<u8>>) -> Self {
        self.files.insert(name.to_string(), body.into());
        self
    }

    /// Serve `name` but fail the body read after `after` bytes.
    pub fn with_broken_body(mut self, name: &str, body: impl Into<Vec<u8>>, after: usize) -> Self {
        self.files.insert(name.to_string(), body.into());
        self.broken.insert(name.to_string(), after);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

impl Transport for MockTransport {
    fn get(&self, url: &str) -> Result<FetchResponse, DatasetError> {
        self.requests.borrow_mut().push(url.to_string());
        let name = url.rsplit('/').next().unwrap_or(url);

        let body = self
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| DatasetError::NetworkUnavailable {
                url: url.to_string(),
                reason: "GET request failed with status 404 Not Found".to_string(),
            })?;
        let content_length = Some(body.len() as u64);

        let body: Box<dyn Read> = match self.broken.get(name) {
            Some(after) => Box::new(BrokenReader {
                inner: Cursor::new(body),
                remaining: *after,
            }),
            None => Box::new(Cursor::new(body)),
        };

        Ok(FetchResponse {
            content_length,
            body,
        })
    }
}

/// Yields `remaining` bytes, then fails like a dropped connection.
struct BrokenReader {
    inner: Cursor<Vec<u8>>,
    remaining: usize,
}

impl Read for BrokenReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ));
        }
        let len = buf.len().min(self.remaining);
        let n = self.inner.read(&mut buf[..len])?;
        self.remaining -= n;
        Ok(n)
    }
}

pub fn quiet_opts(dir: &Path) -> LoadOptions {
    LoadOptions {
        target_dir: Some(dir.to_path_buf()),
        verbose: false,
        chunk_size: 7,
        ..Default::default()
    }
}

/// Regular files directly inside `dir`, sorted.
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| entry.expect("dir entry").path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files
}

// ============================================================================
// Containers
// ============================================================================

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

pub fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, *data)
            .expect("append tar entry");
    }
    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip")
}

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in entries {
        writer.start_file(*name, options).expect("start zip entry");
        writer.write_all(data).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

// ============================================================================
// Pickle
// ============================================================================

/// Minimal protocol-3 pickle writer for string-keyed mappings.
pub struct PickleWriter(Vec<u8>);

impl PickleWriter {
    pub fn new() -> Self {
        PickleWriter(vec![0x80, 0x03])
    }

    pub fn text(&mut self, s: &str) -> &mut Self {
        self.0.push(b'X');
        self.0.extend_from_slice(&(s.len() as u32).to_le_bytes());
        self.0.extend_from_slice(s.as_bytes());
        self
    }

    pub fn bytes(&mut self, b: &[u8]) -> &mut Self {
        self.0.push(b'B');
        self.0.extend_from_slice(&(b.len() as u32).to_le_bytes());
        self.0.extend_from_slice(b);
        self
    }

    pub fn small_int(&mut self, v: u8) -> &mut Self {
        self.0.extend_from_slice(&[b'K', v]);
        self
    }

    pub fn begin_dict(&mut self) -> &mut Self {
        self.0.extend_from_slice(b"}(");
        self
    }

    pub fn end_dict(&mut self) -> &mut Self {
        self.0.push(b'u');
        self
    }

    pub fn begin_list(&mut self) -> &mut Self {
        self.0.extend_from_slice(b"](");
        self
    }

    pub fn end_list(&mut self) -> &mut Self {
        self.0.push(b'e');
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        self.0.push(b'.');
        std::mem::take(&mut self.0)
    }
}

pub const CIFAR_ROW: usize = 3 * 32 * 32;

/// One image row whose every pixel is `fill`.
pub fn cifar_row(fill: u8) -> Vec<u8> {
    vec![fill; CIFAR_ROW]
}

/// A batch mapping with `data` stored as a list of byte rows.
pub fn cifar_batch(rows: &[Vec<u8>], label_key: &str, labels: &[u8]) -> Vec<u8> {
    let mut w = PickleWriter::new();
    w.begin_dict();
    w.text("batch_label").text("fixture batch");
    w.text("data").begin_list();
    for row in rows {
        w.bytes(row);
    }
    w.end_list();
    w.text(label_key).begin_list();
    for label in labels {
        w.small_int(*label);
    }
    w.end_list();
    w.end_dict();
    w.finish()
}

/// A metadata mapping with one list of class names per key.
pub fn cifar_meta(entries: &[(&str, &[&str])]) -> Vec<u8> {
    let mut w = PickleWriter::new();
    w.begin_dict();
    for (key, names) in entries {
        w.text(key).begin_list();
        for name in *names {
            w.bytes(name.as_bytes());
        }
        w.end_list();
    }
    w.text("num_cases_per_batch").small_int(2);
    w.end_dict();
    w.finish()
}

// ============================================================================
// IDX
// ============================================================================

pub fn idx_gz(array: IdxArray) -> Vec<u8> {
    gzip(&to_idx_bytes(&array))
}

// ============================================================================
// R serialization
// ============================================================================

const HAS_ATTR: u32 = 1 << 9;
const HAS_TAG: u32 = 1 << 10;
pub const SYMSXP: u32 = 1;
pub const LISTSXP: u32 = 2;
pub const CHARSXP: u32 = 9;
pub const INTSXP: u32 = 13;
pub const REALSXP: u32 = 14;
pub const STRSXP: u32 = 16;
pub const VECSXP: u32 = 19;
const NILVALUE_SXP: u32 = 254;

/// XDR (version 2) R data writer.
pub struct RdaWriter(Vec<u8>);

impl RdaWriter {
    pub fn new() -> Self {
        let mut w = RdaWriter(b"RDX2\nX\n".to_vec());
        w.int(2);
        w.int(0x030602);
        w.int(0x020300);
        w
    }

    pub fn int(&mut self, v: i32) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    pub fn flags(&mut self, kind: u32, attr: bool, tag: bool) {
        let mut flags = kind;
        if attr {
            flags |= HAS_ATTR;
        }
        if tag {
            flags |= HAS_TAG;
        }
        self.int(flags as i32);
    }

    pub fn chars(&mut self, s: &str) {
        self.flags(CHARSXP, false, false);
        self.int(s.len() as i32);
        self.0.extend_from_slice(s.as_bytes());
    }

    pub fn symbol(&mut self, s: &str) {
        self.flags(SYMSXP, false, false);
        self.chars(s);
    }

    pub fn nil(&mut self) {
        self.int(NILVALUE_SXP as i32);
    }

    /// A real matrix given in row-major order, written column-major with a
    /// `dim` attribute.
    pub fn real_matrix(&mut self, rows: usize, cols: usize, row_major: &[f64]) {
        self.flags(REALSXP, true, false);
        self.int((rows * cols) as i32);
        for c in 0..cols {
            for r in 0..rows {
                self.0.extend_from_slice(&row_major[r * cols + c].to_be_bytes());
            }
        }
        self.flags(LISTSXP, false, true);
        self.symbol("dim");
        self.flags(INTSXP, false, false);
        self.int(2);
        self.int(rows as i32);
        self.int(cols as i32);
        self.nil();
    }

    pub fn real_vector(&mut self, values: &[f64]) {
        self.flags(REALSXP, false, false);
        self.int(values.len() as i32);
        for v in values {
            self.0.extend_from_slice(&v.to_be_bytes());
        }
    }

    pub fn into_gzip(self) -> Vec<u8> {
        gzip(&self.0)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// `ESL.mixture` with `x` (3x2), `y` (3) and `means` (2x2).
pub fn mixture_rda(y: &[f64]) -> Vec<u8> {
    let mut w = RdaWriter::new();
    w.flags(LISTSXP, false, true);
    w.symbol("ESL.mixture");
    w.flags(VECSXP, true, false);
    w.int(3);
    w.real_matrix(3, 2, &[0.5, 1.5, -0.25, 2.0, 3.0, -1.0]);
    w.real_vector(y);
    w.real_matrix(2, 2, &[0.1, 0.2, 0.3, 0.4]);
    w.flags(LISTSXP, false, true);
    w.symbol("names");
    w.flags(STRSXP, false, false);
    w.int(3);
    w.chars("x");
    w.chars("y");
    w.chars("means");
    w.nil();
    w.nil();
    w.into_gzip()
}
