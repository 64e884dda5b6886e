//! R serialization (`.rda` / `.RData`) reader.
//!
//! Supports the XDR binary encoding written by `save()`, version 2 and 3,
//! either raw or gzip-compressed. The object graph is decoded into a small
//! [`RObject`] tree: atomic vectors, generic vectors, pairlists and
//! attributes. Environments, closures and calls are kept as opaque markers
//! since no dataset needs their contents.
//!
//! # Stream layout
//!
//! ```text
//! "RDX2\n" | "RDX3\n"     file magic
//! "X\n"                   XDR format marker
//! i32 version, i32 writer version, i32 minimal reader version
//! (v3 only) i32 n, n bytes native encoding name
//! item                    pairlist of (name, object)
//! ```
//!
//! Every item starts with an `i32` flags word: the low byte is the type,
//! bit 9 marks attributes, bit 10 marks a tag. Vector attributes follow the
//! vector payload; pairlist nodes carry attributes and tag before the value.

use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::{Array2, ShapeBuilder};
use tracing::trace;

use crate::error::DatasetError;

const NILSXP: u32 = 0;
const SYMSXP: u32 = 1;
const LISTSXP: u32 = 2;
const CLOSXP: u32 = 3;
const ENVSXP: u32 = 4;
const PROMSXP: u32 = 5;
const LANGSXP: u32 = 6;
const CHARSXP: u32 = 9;
const LGLSXP: u32 = 10;
const INTSXP: u32 = 13;
const REALSXP: u32 = 14;
const CPLXSXP: u32 = 15;
const STRSXP: u32 = 16;
const DOTSXP: u32 = 17;
const VECSXP: u32 = 19;
const EXPRSXP: u32 = 20;
const RAWSXP: u32 = 24;
const S4SXP: u32 = 25;

const ALTREP_SXP: u32 = 238;
const EMPTYENV_SXP: u32 = 242;
const BASEENV_SXP: u32 = 241;
const PERSISTSXP: u32 = 247;
const PACKAGESXP: u32 = 248;
const NAMESPACESXP: u32 = 249;
const BASENAMESPACE_SXP: u32 = 250;
const MISSINGARG_SXP: u32 = 251;
const UNBOUNDVALUE_SXP: u32 = 252;
const GLOBALENV_SXP: u32 = 253;
const NILVALUE_SXP: u32 = 254;
const REFSXP: u32 = 255;

const HAS_ATTR: u32 = 1 << 9;
const HAS_TAG: u32 = 1 << 10;

const NA_INTEGER: i32 = i32::MIN;

/// Deepest object nesting accepted; pairlist chains do not count.
const MAX_DEPTH: usize = 256;

/// Longest compact sequence that is expanded in memory.
const MAX_COMPACT_LEN: usize = 1 << 26;

/// Payload of a decoded R object.
#[derive(Clone, Debug, PartialEq)]
pub enum RValue {
    Null,
    Logical(Vec<Option<bool>>),
    Integer(Vec<Option<i32>>),
    /// `NA_real_` is a NaN and decodes as one.
    Real(Vec<f64>),
    Complex(Vec<(f64, f64)>),
    Character(Vec<Option<String>>),
    Raw(Vec<u8>),
    List(Vec<RObject>),
    Pairlist(Vec<(Option<String>, RObject)>),
    Symbol(String),
    Environment,
    Language,
}

/// A decoded R object with its attributes.
#[derive(Clone, Debug, PartialEq)]
pub struct RObject {
    pub value: RValue,
    pub attributes: Vec<(String, RObject)>,
}

impl RObject {
    fn bare(value: RValue) -> Self {
        Self {
            value,
            attributes: Vec::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&RObject> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// The `names` attribute as text.
    pub fn names(&self) -> Option<Vec<String>> {
        match &self.attribute("names")?.value {
            RValue::Character(names) => Some(
                names
                    .iter()
                    .map(|name| name.clone().unwrap_or_default())
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Element of a named list.
    pub fn get(&self, name: &str) -> Option<&RObject> {
        match &self.value {
            RValue::List(items) => {
                let position = self.names()?.iter().position(|n| n == name)?;
                items.get(position)
            }
            RValue::Pairlist(items) => items
                .iter()
                .find(|(tag, _)| tag.as_deref() == Some(name))
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// The `dim` attribute.
    pub fn dim(&self) -> Option<Vec<usize>> {
        match &self.attribute("dim")?.value {
            RValue::Integer(dims) => dims
                .iter()
                .map(|d| d.and_then(|d| usize::try_from(d).ok()))
                .collect(),
            _ => None,
        }
    }

    /// Numeric contents as `f64`, integers and logicals widened, NA as NaN.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match &self.value {
            RValue::Real(values) => Some(values.clone()),
            RValue::Integer(values) => Some(
                values
                    .iter()
                    .map(|v| v.map_or(f64::NAN, f64::from))
                    .collect(),
            ),
            RValue::Logical(values) => Some(
                values
                    .iter()
                    .map(|v| v.map_or(f64::NAN, |b| if b { 1.0 } else { 0.0 }))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Numeric contents truncated to `i64`. NA values yield `None`.
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        match &self.value {
            RValue::Integer(values) => values.iter().map(|v| v.map(i64::from)).collect(),
            RValue::Real(values) => values
                .iter()
                .map(|v| v.is_finite().then_some(*v as i64))
                .collect(),
            RValue::Logical(values) => values.iter().map(|v| v.map(i64::from)).collect(),
            _ => None,
        }
    }

    /// A numeric matrix, converted from R's column-major storage to a
    /// `(rows, cols)` array. A plain vector becomes a single column.
    pub fn to_matrix(&self) -> Option<Array2<f64>> {
        let values = self.to_f64_vec()?;
        let (rows, cols) = match self.dim().as_deref() {
            Some([rows, cols]) => (*rows, *cols),
            Some(_) => return None,
            None => (values.len(), 1),
        };
        Array2::from_shape_vec((rows, cols).f(), values)
            .ok()
            .map(|matrix| matrix.as_standard_layout().to_owned())
    }
}

/// Top-level named objects of an `.rda` file, in file order.
#[derive(Clone, Debug, PartialEq)]
pub struct RData {
    pub version: i32,
    pub objects: Vec<(String, RObject)>,
}

impl RData {
    pub fn get(&self, name: &str) -> Option<&RObject> {
        self.objects
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

/// Reads an R data file from disk.
pub fn read_rdata(path: &Path) -> Result<RData, DatasetError> {
    let bytes = std::fs::read(path)?;
    parse_rdata(&bytes, path)
}

/// Reads R data from bytes, raw or gzip-compressed.
///
/// Useful for fuzzing and tests without file I/O.
pub fn from_rdata_slice(bytes: &[u8]) -> Result<RData, DatasetError> {
    parse_rdata(bytes, Path::new("<bytes>"))
}

fn parse_rdata(bytes: &[u8], path: &Path) -> Result<RData, DatasetError> {
    let rdata_err = |message: String| DatasetError::Rdata {
        path: path.to_path_buf(),
        message,
    };

    let inflated;
    let bytes = if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut out = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| rdata_err(format!("gzip: {}", e)))?;
        inflated = out;
        &inflated[..]
    } else {
        bytes
    };

    let body = if bytes.starts_with(b"RDX2\n") || bytes.starts_with(b"RDX3\n") {
        &bytes[5..]
    } else if bytes.starts_with(b"RDA") || bytes.starts_with(b"RDB") {
        return Err(rdata_err("only the XDR encoding is supported".to_string()));
    } else {
        return Err(rdata_err("not an R data file".to_string()));
    };

    let mut reader = Reader::new(body);
    let version = reader.read_stream_header().map_err(rdata_err)?;
    let root = reader.read_item().map_err(rdata_err)?;

    let objects = match root.value {
        RValue::Pairlist(items) => items
            .into_iter()
            .map(|(tag, value)| (tag.unwrap_or_default(), value))
            .collect(),
        RValue::Null => Vec::new(),
        _ => return Err(rdata_err("top-level item is not a pairlist".to_string())),
    };

    Ok(RData { version, objects })
}

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
    refs: Vec<RObject>,
    depth: usize,
}

impl<'a> Reader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            refs: Vec::new(),
            depth: 0,
        }
    }

    fn read_stream_header(&mut self) -> Result<i32, String> {
        let format = self.read_bytes(2)?;
        if format != b"X\n" {
            return Err(format!(
                "unsupported serialization format {:?}",
                String::from_utf8_lossy(format)
            ));
        }
        let version = self.read_i32()?;
        let writer = self.read_i32()?;
        let min_reader = self.read_i32()?;
        trace!(version, writer, min_reader, "R serialization header");

        match version {
            2 => {}
            3 => {
                let len = self.read_length()?;
                self.read_bytes(len)?;
            }
            other => return Err(format!("unsupported serialization version {}", other)),
        }
        Ok(version)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], String> {
        let input = self.input;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= input.len())
            .ok_or_else(|| format!("unexpected end of data at offset {}", self.pos))?;
        let slice = &input[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_i32(&mut self) -> Result<i32, String> {
        let b = self.read_bytes(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_f64(&mut self) -> Result<f64, String> {
        let b = self.read_bytes(8)?;
        Ok(f64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Vector length, including the long-vector escape.
    fn read_length(&mut self) -> Result<usize, String> {
        let len = self.read_i32()?;
        if len == -1 {
            let upper = self.read_i32()? as u32 as u64;
            let lower = self.read_i32()? as u32 as u64;
            let len = (upper << 32) | lower;
            return usize::try_from(len).map_err(|_| format!("vector length {} too large", len));
        }
        usize::try_from(len).map_err(|_| format!("negative vector length {}", len))
    }

    /// Length checked against the remaining input so a corrupt header
    /// cannot request an enormous allocation.
    fn read_count(&mut self, item_size: usize) -> Result<usize, String> {
        let len = self.read_length()?;
        let remaining = self.input.len() - self.pos;
        if len.saturating_mul(item_size) > remaining {
            return Err(format!(
                "vector of {} element(s) exceeds remaining {} byte(s)",
                len, remaining
            ));
        }
        Ok(len)
    }

    fn read_item(&mut self) -> Result<RObject, String> {
        let flags = self.read_i32()? as u32;
        self.read_item_with(flags)
    }

    fn read_item_with(&mut self, flags: u32) -> Result<RObject, String> {
        if self.depth >= MAX_DEPTH {
            return Err(format!(
                "objects nested deeper than {} at offset {}",
                MAX_DEPTH, self.pos
            ));
        }
        self.depth += 1;
        let object = self.read_object(flags);
        self.depth -= 1;
        object
    }

    fn read_object(&mut self, flags: u32) -> Result<RObject, String> {
        let kind = flags & 0xff;
        let has_attr = flags & HAS_ATTR != 0;
        let has_tag = flags & HAS_TAG != 0;

        match kind {
            NILVALUE_SXP | NILSXP => Ok(RObject::bare(RValue::Null)),
            EMPTYENV_SXP | BASEENV_SXP | GLOBALENV_SXP | BASENAMESPACE_SXP => {
                Ok(RObject::bare(RValue::Environment))
            }
            UNBOUNDVALUE_SXP | MISSINGARG_SXP => Ok(RObject::bare(RValue::Null)),
            REFSXP => {
                let index = match flags >> 8 {
                    0 => self.read_i32()? as usize,
                    packed => packed as usize,
                };
                index
                    .checked_sub(1)
                    .and_then(|i| self.refs.get(i))
                    .cloned()
                    .ok_or_else(|| format!("reference {} out of range", index))
            }
            PERSISTSXP | PACKAGESXP | NAMESPACESXP => {
                let names = self.read_string_vec()?;
                let object = RObject::bare(RValue::Character(names));
                self.refs.push(RObject::bare(RValue::Environment));
                Ok(object)
            }
            SYMSXP => {
                let name = self.read_item()?;
                let name = match name.value {
                    RValue::Character(mut v) if v.len() == 1 => v.pop().flatten(),
                    _ => None,
                }
                .ok_or_else(|| "symbol name is not a string".to_string())?;
                let symbol = RObject::bare(RValue::Symbol(name));
                self.refs.push(symbol.clone());
                Ok(symbol)
            }
            ENVSXP => {
                let slot = self.refs.len();
                self.refs.push(RObject::bare(RValue::Environment));
                let _locked = self.read_i32()?;
                let _enclosure = self.read_item()?;
                let _frame = self.read_item()?;
                let _hashtab = self.read_item()?;
                let _attributes = self.read_item()?;
                Ok(self.refs[slot].clone())
            }
            LISTSXP | LANGSXP | CLOSXP | PROMSXP | DOTSXP => {
                self.read_pairlist(flags, has_attr, has_tag)
            }
            CHARSXP => {
                let len = self.read_i32()?;
                if len == -1 {
                    return Ok(RObject::bare(RValue::Character(vec![None])));
                }
                let len = usize::try_from(len).map_err(|_| format!("bad string length {}", len))?;
                let bytes = self.read_bytes(len)?;
                let text = String::from_utf8_lossy(bytes).into_owned();
                Ok(RObject::bare(RValue::Character(vec![Some(text)])))
            }
            LGLSXP => {
                let len = self.read_count(4)?;
                let values = (0..len)
                    .map(|_| {
                        self.read_i32()
                            .map(|v| (v != NA_INTEGER).then_some(v != 0))
                    })
                    .collect::<Result<_, _>>()?;
                self.with_attributes(RValue::Logical(values), has_attr)
            }
            INTSXP => {
                let len = self.read_count(4)?;
                let values = (0..len)
                    .map(|_| self.read_i32().map(|v| (v != NA_INTEGER).then_some(v)))
                    .collect::<Result<_, _>>()?;
                self.with_attributes(RValue::Integer(values), has_attr)
            }
            REALSXP => {
                let len = self.read_count(8)?;
                let values = (0..len)
                    .map(|_| self.read_f64())
                    .collect::<Result<_, _>>()?;
                self.with_attributes(RValue::Real(values), has_attr)
            }
            CPLXSXP => {
                let len = self.read_count(16)?;
                let values = (0..len)
                    .map(|_| Ok((self.read_f64()?, self.read_f64()?)))
                    .collect::<Result<_, String>>()?;
                self.with_attributes(RValue::Complex(values), has_attr)
            }
            STRSXP => {
                let len = self.read_count(4)?;
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    match self.read_item()?.value {
                        RValue::Character(mut v) if v.len() == 1 => values.push(v.pop().flatten()),
                        _ => return Err("character vector element is not a string".to_string()),
                    }
                }
                self.with_attributes(RValue::Character(values), has_attr)
            }
            VECSXP | EXPRSXP => {
                let len = self.read_count(4)?;
                let items = (0..len)
                    .map(|_| self.read_item())
                    .collect::<Result<_, _>>()?;
                self.with_attributes(RValue::List(items), has_attr)
            }
            RAWSXP => {
                let len = self.read_count(1)?;
                let bytes = self.read_bytes(len)?.to_vec();
                self.with_attributes(RValue::Raw(bytes), has_attr)
            }
            S4SXP => self.with_attributes(RValue::Null, has_attr),
            ALTREP_SXP => self.read_altrep(),
            other => Err(format!(
                "unsupported R object type {} at offset {}",
                other,
                self.pos.saturating_sub(4)
            )),
        }
    }

    fn with_attributes(&mut self, value: RValue, has_attr: bool) -> Result<RObject, String> {
        let attributes = if has_attr {
            self.read_attributes()?
        } else {
            Vec::new()
        };
        Ok(RObject { value, attributes })
    }

    fn read_attributes(&mut self) -> Result<Vec<(String, RObject)>, String> {
        match self.read_item()?.value {
            RValue::Pairlist(items) => Ok(items
                .into_iter()
                .map(|(tag, value)| (tag.unwrap_or_default(), value))
                .collect()),
            RValue::Null => Ok(Vec::new()),
            _ => Err("attributes are not a pairlist".to_string()),
        }
    }

    /// Pairlist nodes are read iteratively along the `cdr` chain.
    fn read_pairlist(
        &mut self,
        flags: u32,
        has_attr: bool,
        has_tag: bool,
    ) -> Result<RObject, String> {
        let head_kind = flags & 0xff;
        let mut items = Vec::new();
        let mut attributes = Vec::new();
        let (mut has_attr, mut has_tag) = (has_attr, has_tag);

        loop {
            if has_attr {
                let node_attributes = self.read_attributes()?;
                if items.is_empty() {
                    attributes = node_attributes;
                }
            }
            let tag = if has_tag {
                match self.read_item()?.value {
                    RValue::Symbol(name) => Some(name),
                    RValue::Character(mut v) if v.len() == 1 => v.pop().flatten(),
                    _ => None,
                }
            } else {
                None
            };
            let car = self.read_item()?;
            items.push((tag, car));

            let next = self.read_i32()? as u32;
            if next & 0xff == head_kind {
                has_attr = next & HAS_ATTR != 0;
                has_tag = next & HAS_TAG != 0;
                continue;
            }
            let tail = self.read_item_with(next)?;
            if tail.value != RValue::Null {
                items.push((None, tail));
            }
            break;
        }

        let value = match head_kind {
            LISTSXP => RValue::Pairlist(items),
            _ => RValue::Language,
        };
        Ok(RObject { value, attributes })
    }

    fn read_string_vec(&mut self) -> Result<Vec<Option<String>>, String> {
        if self.read_i32()? != 0 {
            return Err("names in persistent strings are not supported".to_string());
        }
        let len = self.read_count(4)?;
        (0..len)
            .map(|_| match self.read_item()?.value {
                RValue::Character(mut v) if v.len() == 1 => Ok(v.pop().flatten()),
                _ => Err("string vector element is not a string".to_string()),
            })
            .collect()
    }

    /// Compact sequences and wrapper objects written by R >= 3.5.
    fn read_altrep(&mut self) -> Result<RObject, String> {
        let info = self.read_item()?;
        let state = self.read_item()?;
        let attributes = match self.read_item()?.value {
            RValue::Pairlist(items) => items
                .into_iter()
                .map(|(tag, value)| (tag.unwrap_or_default(), value))
                .collect(),
            _ => Vec::new(),
        };

        let class = match &info.value {
            RValue::Pairlist(items) => match items.first() {
                Some((_, RObject { value: RValue::Symbol(name), .. })) => name.clone(),
                _ => String::new(),
            },
            _ => String::new(),
        };

        let value = match class.as_str() {
            "compact_intseq" => {
                let seq = state.to_f64_vec().unwrap_or_default();
                match seq.as_slice() {
                    [n, start, step] => {
                        let len = compact_len(*n)?;
                        let (start, step) = (whole(*start)?, whole(*step)?);
                        let values = (0..len as i64)
                            .map(|i| {
                                i.checked_mul(step)
                                    .and_then(|offset| offset.checked_add(start))
                                    .and_then(|v| i32::try_from(v).ok())
                                    .map(Some)
                                    .ok_or_else(|| {
                                        format!("compact sequence element {} overflows", i)
                                    })
                            })
                            .collect::<Result<_, _>>()?;
                        RValue::Integer(values)
                    }
                    _ => return Err("malformed compact integer sequence".to_string()),
                }
            }
            "compact_realseq" => {
                let seq = state.to_f64_vec().unwrap_or_default();
                match seq.as_slice() {
                    [n, start, step] => {
                        let len = compact_len(*n)?;
                        RValue::Real((0..len).map(|i| start + i as f64 * step).collect())
                    }
                    _ => return Err("malformed compact real sequence".to_string()),
                }
            }
            name if name.starts_with("wrap_") => match state.value {
                RValue::List(mut parts) if !parts.is_empty() => parts.swap_remove(0).value,
                _ => return Err(format!("malformed {} state", name)),
            },
            other => return Err(format!("unsupported ALTREP class '{}'", other)),
        };

        Ok(RObject { value, attributes })
    }
}

fn compact_len(n: f64) -> Result<usize, String> {
    if n.is_finite() && n >= 0.0 && n.fract() == 0.0 && n <= MAX_COMPACT_LEN as f64 {
        Ok(n as usize)
    } else {
        Err(format!("compact sequence length {} out of range", n))
    }
}

/// An integral `f64` that converts to `i64` exactly.
fn whole(v: f64) -> Result<i64, String> {
    const EXACT: f64 = 9_007_199_254_740_992.0;
    if v.is_finite() && v.fract() == 0.0 && v.abs() <= EXACT {
        Ok(v as i64)
    } else {
        Err(format!("compact sequence bound {} is not an integer", v))
    }
}
