//! Dynamic value tree produced by the object-serialization decoder.
//!
//! Pickled batch files are arbitrary object graphs. They are decoded into
//! [`Value`], then walked by [`Value::normalize_text`] so that byte-string
//! keys and labels written by Python 2 become ordinary text.

use std::collections::BTreeMap;

use serde::Serialize;

/// Hashable key of a pickled mapping.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum Key {
    Text(String),
    Bytes(Vec<u8>),
    Int(i64),
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

/// A numpy array reconstructed from a pickle stream.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NdBuffer {
    /// numpy dtype string, e.g. `u1` or `<i8`.
    pub dtype: String,
    pub shape: Vec<usize>,
    pub fortran_order: bool,
    #[serde(skip)]
    pub data: Vec<u8>,
}

/// A node in a decoded object graph.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(BTreeMap<Key, Value>),
    Array(NdBuffer),
    /// A call to a global the decoder does not understand, kept opaque.
    Object {
        class: String,
        args: Vec<Value>,
        state: Option<Box<Value>>,
    },
}

impl Value {
    /// Recursively replace UTF-8 byte strings with text.
    ///
    /// Mapping keys, list/tuple items and scalar byte strings are converted
    /// when they decode as UTF-8. Array payloads and opaque objects are left
    /// untouched.
    pub fn normalize_text(self) -> Value {
        match self {
            Value::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Value::Text(text),
                Err(err) => Value::Bytes(err.into_bytes()),
            },
            Value::List(items) => {
                Value::List(items.into_iter().map(Value::normalize_text).collect())
            }
            Value::Tuple(items) => {
                Value::Tuple(items.into_iter().map(Value::normalize_text).collect())
            }
            Value::Dict(entries) => Value::Dict(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.normalize_text(), value.normalize_text()))
                    .collect(),
            ),
            other => other,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Key, Value>> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a text key in a mapping.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict()?.get(&Key::from(key))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Items of a list or tuple.
    pub fn as_items(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Interpret a sequence of text values as a list of strings.
    pub fn to_string_list(&self) -> Option<Vec<String>> {
        self.as_items()?
            .iter()
            .map(|item| match item {
                Value::Text(text) => Some(text.clone()),
                Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
                _ => None,
            })
            .collect()
    }

    /// Interpret a list of integers, or an integer numpy array, as `i64`s.
    pub fn to_int_vec(&self) -> Option<Vec<i64>> {
        match self {
            Value::Array(array) => array.to_i64_vec(),
            _ => self.as_items()?.iter().map(Value::as_int).collect(),
        }
    }
}

impl Key {
    fn normalize_text(self) -> Key {
        match self {
            Key::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Key::Text(text),
                Err(err) => Key::Bytes(err.into_bytes()),
            },
            other => other,
        }
    }
}

impl NdBuffer {
    /// Size in bytes of one element, derived from the dtype string.
    pub fn item_size(&self) -> Option<usize> {
        let digits: String = self
            .dtype
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }

    /// Number of elements the shape declares, `None` on overflow.
    pub fn element_count(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |count, dim| count.checked_mul(*dim))
    }

    /// Payload bytes the shape and dtype declare, `None` on overflow.
    pub fn byte_len(&self) -> Option<usize> {
        self.element_count()?.checked_mul(self.item_size()?)
    }

    /// Widen integer elements to `i64`. Returns `None` for non-integer
    /// dtypes or a payload shorter than the shape requires.
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        let kind = self.dtype.trim_start_matches(['<', '>', '|', '=']);
        let big_endian = self.dtype.starts_with('>');
        let size = self.item_size()?;
        let byte_len = self.byte_len()?;
        if self.data.len() < byte_len {
            return None;
        }

        let read = |chunk: &[u8]| -> Option<i64> {
            let mut buf = [0u8; 8];
            match (kind.chars().next()?, size) {
                ('u', 1) => Some(i64::from(chunk[0])),
                ('i', 1) => Some(i64::from(chunk[0] as i8)),
                ('u' | 'i', 2 | 4 | 8) => {
                    if big_endian {
                        buf[8 - size..].copy_from_slice(chunk);
                        let raw = u64::from_be_bytes(buf);
                        Some(sign_extend(raw, size, kind.starts_with('i')))
                    } else {
                        buf[..size].copy_from_slice(chunk);
                        let raw = u64::from_le_bytes(buf);
                        Some(sign_extend(raw, size, kind.starts_with('i')))
                    }
                }
                _ => None,
            }
        };

        self.data[..byte_len].chunks(size).map(read).collect()
    }
}

fn sign_extend(raw: u64, size: usize, signed: bool) -> i64 {
    let bits = size * 8;
    if !signed || bits == 64 {
        return raw as i64;
    }
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_converts_nested_byte_strings() {
        let mut inner = BTreeMap::new();
        inner.insert(Key::Bytes(b"label_names".to_vec()), Value::List(vec![
            Value::Bytes(b"airplane".to_vec()),
            Value::Bytes(b"automobile".to_vec()),
        ]));
        inner.insert(Key::Bytes(b"num_vis".to_vec()), Value::Int(3072));

        let normalized = Value::Dict(inner).normalize_text();
        assert_eq!(
            normalized.get("label_names").and_then(Value::to_string_list),
            Some(vec!["airplane".to_string(), "automobile".to_string()])
        );
        assert_eq!(normalized.get("num_vis").and_then(Value::as_int), Some(3072));
    }

    #[test]
    fn normalize_keeps_invalid_utf8_and_arrays() {
        let array = Value::Array(NdBuffer {
            dtype: "|u1".to_string(),
            shape: vec![2],
            fortran_order: false,
            data: vec![0xff, 0xfe],
        });
        let value = Value::Tuple(vec![Value::Bytes(vec![0xff]), array.clone()]).normalize_text();
        assert_eq!(value, Value::Tuple(vec![Value::Bytes(vec![0xff]), array]));
    }

    #[test]
    fn int_arrays_widen_by_dtype() {
        let array = NdBuffer {
            dtype: "<i2".to_string(),
            shape: vec![2],
            fortran_order: false,
            data: vec![0xff, 0xff, 0x02, 0x00],
        };
        assert_eq!(array.to_i64_vec(), Some(vec![-1, 2]));

        let bytes = NdBuffer {
            dtype: "|u1".to_string(),
            shape: vec![3],
            fortran_order: false,
            data: vec![1, 2, 250],
        };
        assert_eq!(Value::Array(bytes).to_int_vec(), Some(vec![1, 2, 250]));
    }

    #[test]
    fn oversized_shape_does_not_overflow() {
        let array = NdBuffer {
            dtype: "<i8".to_string(),
            shape: vec![usize::MAX / 2, 4],
            fortran_order: false,
            data: vec![0; 16],
        };
        assert_eq!(array.element_count(), None);
        assert_eq!(array.byte_len(), None);
        assert_eq!(array.to_i64_vec(), None);

        let wide = NdBuffer {
            shape: vec![usize::MAX / 4],
            ..array
        };
        assert_eq!(wide.element_count(), Some(usize::MAX / 4));
        assert_eq!(wide.byte_len(), None);
        assert_eq!(wide.to_i64_vec(), None);
    }
}
