//! IDX binary tensor format reader and writer.
//!
//! # IDX Format Reference
//!
//! ```text
//! offset 0: 0x00 0x00            magic prefix
//! offset 2: <type>               element type code
//! offset 3: <ndim>               number of dimensions
//! offset 4: ndim x u32 (BE)      size of each dimension
//! then:     elements, row-major, big-endian
//! ```
//!
//! Element types: `0x08` u8, `0x09` i8, `0x0B` i16, `0x0C` i32, `0x0D` f32,
//! `0x0E` f64. Bytes after the declared payload are ignored.

use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::{ArrayD, IxDyn};

use crate::error::DatasetError;

/// Element type declared in an IDX header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdxDtype {
    U8,
    I8,
    I16,
    I32,
    F32,
    F64,
}

impl IdxDtype {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x08 => Some(IdxDtype::U8),
            0x09 => Some(IdxDtype::I8),
            0x0B => Some(IdxDtype::I16),
            0x0C => Some(IdxDtype::I32),
            0x0D => Some(IdxDtype::F32),
            0x0E => Some(IdxDtype::F64),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            IdxDtype::U8 => 0x08,
            IdxDtype::I8 => 0x09,
            IdxDtype::I16 => 0x0B,
            IdxDtype::I32 => 0x0C,
            IdxDtype::F32 => 0x0D,
            IdxDtype::F64 => 0x0E,
        }
    }

    pub fn size(self) -> usize {
        match self {
            IdxDtype::U8 | IdxDtype::I8 => 1,
            IdxDtype::I16 => 2,
            IdxDtype::I32 | IdxDtype::F32 => 4,
            IdxDtype::F64 => 8,
        }
    }
}

/// Parsed IDX header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdxHeader {
    pub dtype: IdxDtype,
    pub shape: Vec<usize>,
}

impl IdxHeader {
    /// Header length in bytes.
    pub fn header_len(&self) -> usize {
        4 + 4 * self.shape.len()
    }

    /// Payload length in bytes implied by the shape.
    pub fn payload_len(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(self.dtype.size(), |acc, dim| acc.checked_mul(*dim))
    }
}

/// A decoded IDX tensor.
#[derive(Clone, Debug, PartialEq)]
pub enum IdxArray {
    U8(ArrayD<u8>),
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

impl IdxArray {
    pub fn dtype(&self) -> IdxDtype {
        match self {
            IdxArray::U8(_) => IdxDtype::U8,
            IdxArray::I8(_) => IdxDtype::I8,
            IdxArray::I16(_) => IdxDtype::I16,
            IdxArray::I32(_) => IdxDtype::I32,
            IdxArray::F32(_) => IdxDtype::F32,
            IdxArray::F64(_) => IdxDtype::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            IdxArray::U8(a) => a.shape(),
            IdxArray::I8(a) => a.shape(),
            IdxArray::I16(a) => a.shape(),
            IdxArray::I32(a) => a.shape(),
            IdxArray::F32(a) => a.shape(),
            IdxArray::F64(a) => a.shape(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn into_u8(self) -> Option<ArrayD<u8>> {
        match self {
            IdxArray::U8(a) => Some(a),
            _ => None,
        }
    }

    /// Widen integer tensors to `i64`.
    pub fn to_i64(&self) -> Option<ArrayD<i64>> {
        match self {
            IdxArray::U8(a) => Some(a.mapv(i64::from)),
            IdxArray::I8(a) => Some(a.mapv(i64::from)),
            IdxArray::I16(a) => Some(a.mapv(i64::from)),
            IdxArray::I32(a) => Some(a.mapv(i64::from)),
            IdxArray::F32(_) | IdxArray::F64(_) => None,
        }
    }
}

/// Reads an IDX tensor from a gzip-compressed file.
pub fn read_idx_gz(path: &Path) -> Result<IdxArray, DatasetError> {
    let file = std::fs::File::open(path)?;
    let mut bytes = Vec::new();
    GzDecoder::new(std::io::BufReader::new(file))
        .read_to_end(&mut bytes)
        .map_err(|e| DatasetError::CorruptArchive {
            path: path.to_path_buf(),
            message: format!("gzip: {}", e),
        })?;
    parse_idx(&bytes, path)
}

/// Reads an IDX tensor from an uncompressed file.
pub fn read_idx(path: &Path) -> Result<IdxArray, DatasetError> {
    let bytes = std::fs::read(path)?;
    parse_idx(&bytes, path)
}

/// Reads an IDX tensor from bytes.
///
/// Useful for fuzzing and tests without file I/O.
pub fn from_idx_slice(bytes: &[u8]) -> Result<IdxArray, DatasetError> {
    parse_idx(bytes, Path::new("<bytes>"))
}

/// Parse only the header.
pub fn parse_header(bytes: &[u8], path: &Path) -> Result<IdxHeader, DatasetError> {
    if bytes.len() < 4 {
        return Err(DatasetError::PayloadTruncated {
            path: path.to_path_buf(),
            expected: 4,
            available: bytes.len(),
        });
    }

    let magic = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let dtype = IdxDtype::from_code(bytes[2]);
    let dtype = match (bytes[0], bytes[1], dtype) {
        (0, 0, Some(dtype)) => dtype,
        _ => {
            return Err(DatasetError::InvalidMagic {
                path: path.to_path_buf(),
                found: magic,
            })
        }
    };

    let ndim = usize::from(bytes[3]);
    let header_len = 4 + 4 * ndim;
    if bytes.len() < header_len {
        return Err(DatasetError::PayloadTruncated {
            path: path.to_path_buf(),
            expected: header_len,
            available: bytes.len(),
        });
    }

    let shape = bytes[4..header_len]
        .chunks_exact(4)
        .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize)
        .collect();

    Ok(IdxHeader { dtype, shape })
}

fn parse_idx(bytes: &[u8], path: &Path) -> Result<IdxArray, DatasetError> {
    let header = parse_header(bytes, path)?;
    let payload = &bytes[header.header_len()..];
    let expected = header
        .payload_len()
        .ok_or_else(|| DatasetError::PayloadTruncated {
            path: path.to_path_buf(),
            expected: usize::MAX,
            available: payload.len(),
        })?;

    if payload.len() < expected {
        return Err(DatasetError::PayloadTruncated {
            path: path.to_path_buf(),
            expected,
            available: payload.len(),
        });
    }
    let payload = &payload[..expected];
    let shape = IxDyn(&header.shape);

    let array = match header.dtype {
        IdxDtype::U8 => IdxArray::U8(shaped(shape, payload.to_vec(), path)?),
        IdxDtype::I8 => IdxArray::I8(shaped(
            shape,
            payload.iter().map(|b| *b as i8).collect(),
            path,
        )?),
        IdxDtype::I16 => IdxArray::I16(shaped(
            shape,
            payload
                .chunks_exact(2)
                .map(|c| i16::from_be_bytes([c[0], c[1]]))
                .collect(),
            path,
        )?),
        IdxDtype::I32 => IdxArray::I32(shaped(
            shape,
            payload
                .chunks_exact(4)
                .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            path,
        )?),
        IdxDtype::F32 => IdxArray::F32(shaped(
            shape,
            payload
                .chunks_exact(4)
                .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            path,
        )?),
        IdxDtype::F64 => IdxArray::F64(shaped(
            shape,
            payload
                .chunks_exact(8)
                .map(|c| f64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
            path,
        )?),
    };

    Ok(array)
}

fn shaped<T>(shape: IxDyn, data: Vec<T>, path: &Path) -> Result<ArrayD<T>, DatasetError> {
    ArrayD::from_shape_vec(shape, data).map_err(|e| DatasetError::MalformedRecord {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Encode a tensor into IDX bytes.
pub fn to_idx_bytes(array: &IdxArray) -> Vec<u8> {
    let shape = array.shape();
    let mut out = Vec::with_capacity(4 + 4 * shape.len());
    out.extend_from_slice(&[0, 0, array.dtype().code(), shape.len() as u8]);
    for dim in shape {
        out.extend_from_slice(&(*dim as u32).to_be_bytes());
    }

    match array {
        IdxArray::U8(a) => out.extend(a.iter().copied()),
        IdxArray::I8(a) => out.extend(a.iter().map(|v| *v as u8)),
        IdxArray::I16(a) => a.iter().for_each(|v| out.extend_from_slice(&v.to_be_bytes())),
        IdxArray::I32(a) => a.iter().for_each(|v| out.extend_from_slice(&v.to_be_bytes())),
        IdxArray::F32(a) => a.iter().for_each(|v| out.extend_from_slice(&v.to_be_bytes())),
        IdxArray::F64(a) => a.iter().for_each(|v| out.extend_from_slice(&v.to_be_bytes())),
    }

    out
}
