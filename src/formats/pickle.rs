//! Python pickle decoder.
//!
//! Supports the binary opcodes of protocols 1 through 5 plus the handful of
//! text opcodes (`INT`, `LONG`, `FLOAT`, `GET`, `PUT`) that binary streams
//! still emit. Calls to globals are not executed; the few that matter for
//! dataset batches are interpreted:
//!
//! - `numpy.core.multiarray._reconstruct` + `BUILD` becomes [`Value::Array`]
//! - `numpy.dtype` is folded into the array's dtype string
//! - `_codecs.encode(text, "latin1")` becomes [`Value::Bytes`]
//! - `bytearray`, `set` and `frozenset` become bytes and lists
//!
//! Anything else stays an opaque [`Value::Object`].

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::DatasetError;
use crate::value::{Key, NdBuffer, Value};

/// Decode a pickle file.
pub fn read_pickle(path: &Path) -> Result<Value, DatasetError> {
    let bytes = std::fs::read(path)?;
    decode(&bytes).map_err(|message| DatasetError::Pickle {
        path: path.to_path_buf(),
        message,
    })
}

/// Decode a pickle stream held in memory.
///
/// Useful for fuzzing and tests without file I/O.
pub fn from_pickle_slice(bytes: &[u8]) -> Result<Value, DatasetError> {
    decode(bytes).map_err(|message| DatasetError::Pickle {
        path: Path::new("<bytes>").to_path_buf(),
        message,
    })
}

/// Deepest container nesting accepted from a stream.
const MAX_NESTING: usize = 64;

/// Memo copies may add up to this multiple of the input length.
const COPY_FACTOR: usize = 8;

/// Stack and memo slot. Globals are only meaningful until they are called.
///
/// A memoized value moves into the shared arena so that later `APPENDS`,
/// `SETITEMS` and `BUILD` are visible through every `GET` of it.
#[derive(Clone, Debug)]
enum Slot {
    Mark,
    Global(String),
    Value(Value),
    Shared(usize),
}

struct Machine<'a> {
    input: &'a [u8],
    pos: usize,
    stack: Vec<Slot>,
    memo: HashMap<u64, Slot>,
    shared: Vec<Value>,
    copied: usize,
}

fn decode(input: &[u8]) -> Result<Value, String> {
    let mut machine = Machine {
        input,
        pos: 0,
        stack: Vec::new(),
        memo: HashMap::new(),
        shared: Vec::new(),
        copied: 0,
    };
    machine.run()
}

impl<'a> Machine<'a> {
    fn run(&mut self) -> Result<Value, String> {
        loop {
            let offset = self.pos;
            let opcode = self.read_u8()?;
            match opcode {
                // STOP
                b'.' => {
                    return match self.stack.pop() {
                        Some(Slot::Mark) | None => Err("STOP with an empty stack".to_string()),
                        Some(Slot::Shared(index)) => {
                            Ok(std::mem::replace(&mut self.shared[index], Value::None))
                        }
                        Some(slot) => self.resolve(slot),
                    }
                }
                // PROTO
                0x80 => {
                    let version = self.read_u8()?;
                    if version > 5 {
                        return Err(format!("unsupported pickle protocol {}", version));
                    }
                }
                // FRAME
                0x95 => {
                    self.read_u64()?;
                }
                b'(' => self.stack.push(Slot::Mark),
                b'0' => {
                    self.pop_slot()?;
                }
                b'1' => {
                    self.pop_mark()?;
                }
                b'2' => {
                    let top = self.stack.last().cloned().ok_or("DUP on empty stack")?;
                    self.stack.push(top);
                }
                b'N' => self.push(Value::None)?,
                0x88 => self.push(Value::Bool(true))?,
                0x89 => self.push(Value::Bool(false))?,
                b'J' => {
                    let value = i32::from_le_bytes(self.read_array::<4>()?);
                    self.push(Value::Int(i64::from(value)))?;
                }
                b'K' => {
                    let value = self.read_u8()?;
                    self.push(Value::Int(i64::from(value)))?;
                }
                b'M' => {
                    let value = u16::from_le_bytes(self.read_array::<2>()?);
                    self.push(Value::Int(i64::from(value)))?;
                }
                0x8a => {
                    let len = usize::from(self.read_u8()?);
                    let value = self.read_long(len)?;
                    self.push(Value::Int(value))?;
                }
                0x8b => {
                    let len = self.read_u32()? as usize;
                    let value = self.read_long(len)?;
                    self.push(Value::Int(value))?;
                }
                b'I' => {
                    let line = self.read_line()?;
                    let value = match line.as_str() {
                        "00" => Value::Bool(false),
                        "01" => Value::Bool(true),
                        text => Value::Int(parse_int(text)?),
                    };
                    self.push(value)?;
                }
                b'L' => {
                    let line = self.read_line()?;
                    let value = parse_int(line.trim_end_matches('L'))?;
                    self.push(Value::Int(value))?;
                }
                b'F' => {
                    let line = self.read_line()?;
                    let value = line
                        .parse::<f64>()
                        .map_err(|_| format!("invalid FLOAT literal '{}'", line))?;
                    self.push(Value::Float(value))?;
                }
                b'G' => {
                    let value = f64::from_be_bytes(self.read_array::<8>()?);
                    self.push(Value::Float(value))?;
                }
                // BINSTRING / SHORT_BINSTRING: Python 2 `str`, kept as bytes.
                b'T' => {
                    let len = self.read_u32()? as usize;
                    let bytes = self.read_bytes(len)?.to_vec();
                    self.push(Value::Bytes(bytes))?;
                }
                b'U' => {
                    let len = usize::from(self.read_u8()?);
                    let bytes = self.read_bytes(len)?.to_vec();
                    self.push(Value::Bytes(bytes))?;
                }
                b'B' | 0x96 | 0x8e | b'C' => {
                    let len = match opcode {
                        b'C' => usize::from(self.read_u8()?),
                        b'B' => self.read_u32()? as usize,
                        _ => self.read_len8()?,
                    };
                    let bytes = self.read_bytes(len)?.to_vec();
                    self.push(Value::Bytes(bytes))?;
                }
                b'X' | 0x8c | 0x8d => {
                    let len = match opcode {
                        0x8c => usize::from(self.read_u8()?),
                        b'X' => self.read_u32()? as usize,
                        _ => self.read_len8()?,
                    };
                    let bytes = self.read_bytes(len)?;
                    let text = std::str::from_utf8(bytes)
                        .map_err(|e| format!("invalid UTF-8 in unicode string: {}", e))?
                        .to_string();
                    self.push(Value::Text(text))?;
                }
                b')' => self.push(Value::Tuple(Vec::new()))?,
                b']' => self.push(Value::List(Vec::new()))?,
                b'}' => self.push(Value::Dict(BTreeMap::new()))?,
                0x8f => self.push(Value::List(Vec::new()))?,
                b't' => {
                    let items = self.pop_mark_values()?;
                    self.push(Value::Tuple(items))?;
                }
                b'l' => {
                    let items = self.pop_mark_values()?;
                    self.push(Value::List(items))?;
                }
                0x91 => {
                    let items = self.pop_mark_values()?;
                    self.push(Value::List(items))?;
                }
                b'd' => {
                    let items = self.pop_mark_values()?;
                    let dict = pairs_to_dict(items)?;
                    self.push(Value::Dict(dict))?;
                }
                0x85..=0x87 => {
                    let count = usize::from(opcode - 0x84);
                    let mut items = Vec::with_capacity(count);
                    for _ in 0..count {
                        items.push(self.pop_value()?);
                    }
                    items.reverse();
                    self.push(Value::Tuple(items))?;
                }
                b'a' => {
                    let item = self.pop_value()?;
                    self.extend_top(vec![item])?;
                }
                b'e' | 0x90 => {
                    let items = self.pop_mark_values()?;
                    self.extend_top(items)?;
                }
                b's' => {
                    let value = self.pop_value()?;
                    let key = self.pop_value()?;
                    self.set_items(vec![key, value])?;
                }
                b'u' => {
                    let items = self.pop_mark_values()?;
                    self.set_items(items)?;
                }
                b'c' => {
                    let module = self.read_line()?;
                    let name = self.read_line()?;
                    self.stack.push(Slot::Global(format!("{}.{}", module, name)));
                }
                0x93 => {
                    let name = self.pop_value()?;
                    let module = self.pop_value()?;
                    match (module, name) {
                        (Value::Text(module), Value::Text(name)) => {
                            self.stack.push(Slot::Global(format!("{}.{}", module, name)));
                        }
                        _ => return Err("STACK_GLOBAL expects two strings".to_string()),
                    }
                }
                b'R' => {
                    let args = self.pop_value()?;
                    let callable = self.pop_callable()?;
                    let value = reduce(callable, args)?;
                    self.push(value)?;
                }
                0x81 => {
                    let args = self.pop_value()?;
                    let class = self.pop_callable()?;
                    let value = reduce(class, args)?;
                    self.push(value)?;
                }
                0x92 => {
                    let _kwargs = self.pop_value()?;
                    let args = self.pop_value()?;
                    let class = self.pop_callable()?;
                    let value = reduce(class, args)?;
                    self.push(value)?;
                }
                b'b' => {
                    let state = self.pop_value()?;
                    self.check_nesting(&state)?;
                    match self.pop_slot()? {
                        Slot::Shared(index) => {
                            let target = std::mem::replace(&mut self.shared[index], Value::None);
                            self.shared[index] = build(target, state)?;
                            self.stack.push(Slot::Shared(index));
                        }
                        slot => {
                            let target = self.resolve(slot)?;
                            self.push(build(target, state)?)?;
                        }
                    }
                }
                b'p' => {
                    let index = parse_int(&self.read_line()?)?;
                    self.memoize(index as u64)?;
                }
                b'q' => {
                    let index = u64::from(self.read_u8()?);
                    self.memoize(index)?;
                }
                b'r' => {
                    let index = u64::from(self.read_u32()?);
                    self.memoize(index)?;
                }
                0x94 => {
                    let index = self.memo.len() as u64;
                    self.memoize(index)?;
                }
                b'g' => {
                    let index = parse_int(&self.read_line()?)?;
                    self.recall(index as u64)?;
                }
                b'h' => {
                    let index = u64::from(self.read_u8()?);
                    self.recall(index)?;
                }
                b'j' => {
                    let index = u64::from(self.read_u32()?);
                    self.recall(index)?;
                }
                other => {
                    return Err(format!(
                        "unsupported opcode {:#04x} at offset {}",
                        other, offset
                    ))
                }
            }
        }
    }

    fn push(&mut self, value: Value) -> Result<(), String> {
        if nesting(&value) > MAX_NESTING {
            return Err(format!("containers nested deeper than {}", MAX_NESTING));
        }
        self.stack.push(Slot::Value(value));
        Ok(())
    }

    /// Items placed into an existing container must leave room for it.
    fn check_nesting(&self, item: &Value) -> Result<(), String> {
        if nesting(item) >= MAX_NESTING {
            return Err(format!("containers nested deeper than {}", MAX_NESTING));
        }
        Ok(())
    }

    /// Snapshot a slot as a value; shared slots are copied out of the arena.
    fn resolve(&mut self, slot: Slot) -> Result<Value, String> {
        match slot {
            Slot::Value(value) => Ok(value),
            Slot::Global(name) => Ok(global_object(name)),
            Slot::Shared(index) => {
                let value = &self.shared[index];
                let budget = self
                    .input
                    .len()
                    .saturating_mul(COPY_FACTOR)
                    .saturating_add(1 << 16);
                self.copied = self.copied.saturating_add(weight(value));
                if self.copied > budget {
                    return Err(format!(
                        "memo copies exceed {} times the stream length",
                        COPY_FACTOR
                    ));
                }
                Ok(value.clone())
            }
            Slot::Mark => Err("unexpected MARK on stack".to_string()),
        }
    }

    fn pop_callable(&mut self) -> Result<Slot, String> {
        match self.pop_slot()? {
            Slot::Shared(index) => Ok(Slot::Value(self.resolve(Slot::Shared(index))?)),
            slot => Ok(slot),
        }
    }

    /// The container a mutating opcode applies to.
    fn top_mut(&mut self) -> Option<&mut Value> {
        match self.stack.last_mut()? {
            Slot::Value(value) => Some(value),
            Slot::Shared(index) => self.shared.get_mut(*index),
            _ => None,
        }
    }

    fn pop_slot(&mut self) -> Result<Slot, String> {
        self.stack
            .pop()
            .ok_or_else(|| "stack underflow".to_string())
    }

    fn pop_value(&mut self) -> Result<Value, String> {
        let slot = self.pop_slot()?;
        self.resolve(slot)
    }

    fn pop_mark(&mut self) -> Result<Vec<Slot>, String> {
        let mark = self
            .stack
            .iter()
            .rposition(|slot| matches!(slot, Slot::Mark))
            .ok_or("no MARK on stack")?;
        let items = self.stack.split_off(mark + 1);
        self.stack.pop();
        Ok(items)
    }

    fn pop_mark_values(&mut self) -> Result<Vec<Value>, String> {
        self.pop_mark()?
            .into_iter()
            .map(|slot| match slot {
                Slot::Mark => Err("nested MARK".to_string()),
                slot => self.resolve(slot),
            })
            .collect()
    }

    fn extend_top(&mut self, items: Vec<Value>) -> Result<(), String> {
        for item in &items {
            self.check_nesting(item)?;
        }
        match self.top_mut() {
            Some(Value::List(list)) => {
                list.extend(items);
                Ok(())
            }
            _ => Err("APPEND target is not a list".to_string()),
        }
    }

    fn set_items(&mut self, items: Vec<Value>) -> Result<(), String> {
        for item in &items {
            self.check_nesting(item)?;
        }
        let pairs = pairs_to_dict(items)?;
        match self.top_mut() {
            Some(Value::Dict(dict)) => {
                dict.extend(pairs);
                Ok(())
            }
            _ => Err("SETITEM target is not a dict".to_string()),
        }
    }

    fn memoize(&mut self, index: u64) -> Result<(), String> {
        let slot = match self.stack.pop().ok_or("PUT on empty stack")? {
            Slot::Value(value) => {
                self.shared.push(value);
                Slot::Shared(self.shared.len() - 1)
            }
            Slot::Mark => return Err("PUT on MARK".to_string()),
            slot => slot,
        };
        self.stack.push(slot.clone());
        self.memo.insert(index, slot);
        Ok(())
    }

    fn recall(&mut self, index: u64) -> Result<(), String> {
        let slot = self
            .memo
            .get(&index)
            .cloned()
            .ok_or_else(|| format!("memo key {} not found", index))?;
        self.stack.push(slot);
        Ok(())
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.input.len())
            .ok_or_else(|| {
                format!(
                    "unexpected end of stream: need {} bytes at offset {}, {} available",
                    len,
                    self.pos,
                    self.input.len() - self.pos
                )
            })?;
        let input = self.input;
        let bytes = &input[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], String> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, String> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, String> {
        Ok(u32::from_le_bytes(self.read_array::<4>()?))
    }

    fn read_u64(&mut self) -> Result<u64, String> {
        Ok(u64::from_le_bytes(self.read_array::<8>()?))
    }

    fn read_len8(&mut self) -> Result<usize, String> {
        let len = self.read_u64()?;
        usize::try_from(len).map_err(|_| format!("length {} does not fit in memory", len))
    }

    fn read_line(&mut self) -> Result<String, String> {
        let input = self.input;
        let rest = &input[self.pos..];
        let newline = rest
            .iter()
            .position(|b| *b == b'\n')
            .ok_or("unterminated text argument")?;
        let line = String::from_utf8_lossy(&rest[..newline]).into_owned();
        self.pos += newline + 1;
        Ok(line)
    }

    /// Little-endian two's complement integer of `len` bytes.
    fn read_long(&mut self, len: usize) -> Result<i64, String> {
        if len > 8 {
            return Err(format!("integer of {} bytes does not fit in i64", len));
        }
        let bytes = self.read_bytes(len)?;
        if bytes.is_empty() {
            return Ok(0);
        }
        let negative = bytes[bytes.len() - 1] & 0x80 != 0;
        let mut buf = if negative { [0xffu8; 8] } else { [0u8; 8] };
        buf[..len].copy_from_slice(bytes);
        Ok(i64::from_le_bytes(buf))
    }
}

/// Rough size of a value: one per node plus its payload bytes.
fn weight(value: &Value) -> usize {
    match value {
        Value::Text(text) => 1 + text.len(),
        Value::Bytes(bytes) => 1 + bytes.len(),
        Value::Array(array) => 1 + array.data.len(),
        Value::List(items) | Value::Tuple(items) => 1 + items.iter().map(weight).sum::<usize>(),
        Value::Dict(entries) => 1 + entries.values().map(weight).sum::<usize>(),
        Value::Object { args, state, .. } => {
            1 + args.iter().chain(state.as_deref()).map(weight).sum::<usize>()
        }
        _ => 1,
    }
}

/// Container depth of a value; scalars and arrays count as one.
fn nesting(value: &Value) -> usize {
    let children = match value {
        Value::List(items) | Value::Tuple(items) => items.iter().map(nesting).max(),
        Value::Dict(entries) => entries.values().map(nesting).max(),
        Value::Object { args, state, .. } => args
            .iter()
            .chain(state.as_deref())
            .map(nesting)
            .max(),
        _ => return 1,
    };
    1 + children.unwrap_or(0)
}

fn parse_int(text: &str) -> Result<i64, String> {
    text.trim()
        .parse::<i64>()
        .map_err(|_| format!("invalid integer literal '{}'", text))
}

fn global_object(class: String) -> Value {
    Value::Object {
        class,
        args: Vec::new(),
        state: None,
    }
}

fn to_key(value: Value) -> Result<Key, String> {
    match value {
        Value::Text(text) => Ok(Key::Text(text)),
        Value::Bytes(bytes) => Ok(Key::Bytes(bytes)),
        Value::Int(value) => Ok(Key::Int(value)),
        Value::Bool(value) => Ok(Key::Int(i64::from(value))),
        other => Err(format!("unsupported dict key {:?}", other)),
    }
}

fn pairs_to_dict(items: Vec<Value>) -> Result<BTreeMap<Key, Value>, String> {
    if items.len() % 2 != 0 {
        return Err("odd number of items for dict".to_string());
    }
    let mut dict = BTreeMap::new();
    let mut iter = items.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        dict.insert(to_key(key)?, value);
    }
    Ok(dict)
}

fn is_reconstruct(class: &str) -> bool {
    matches!(
        class,
        "numpy.core.multiarray._reconstruct" | "numpy._core.multiarray._reconstruct"
    )
}

/// Apply a callable to its argument tuple without executing Python code.
fn reduce(callable: Slot, args: Value) -> Result<Value, String> {
    let class = match callable {
        Slot::Global(name) => name,
        Slot::Value(Value::Object { class, .. }) => class,
        _ => return Err("REDUCE target is not callable".to_string()),
    };
    let args = match args {
        Value::Tuple(items) | Value::List(items) => items,
        other => vec![other],
    };

    match class.as_str() {
        "_codecs.encode" => match args.first() {
            Some(Value::Text(text)) => Ok(Value::Bytes(latin1_bytes(text)?)),
            _ => Err("_codecs.encode expects a string".to_string()),
        },
        "__builtin__.bytearray" | "builtins.bytearray" => match args.into_iter().next() {
            Some(Value::Bytes(bytes)) => Ok(Value::Bytes(bytes)),
            Some(Value::Text(text)) => Ok(Value::Bytes(latin1_bytes(&text)?)),
            None => Ok(Value::Bytes(Vec::new())),
            Some(other) => Err(format!("unsupported bytearray argument {:?}", other)),
        },
        "__builtin__.set" | "builtins.set" | "__builtin__.frozenset" | "builtins.frozenset" => {
            match args.into_iter().next() {
                Some(Value::List(items)) | Some(Value::Tuple(items)) => Ok(Value::List(items)),
                None => Ok(Value::List(Vec::new())),
                Some(other) => Err(format!("unsupported set argument {:?}", other)),
            }
        }
        _ => Ok(Value::Object {
            class,
            args,
            state: None,
        }),
    }
}

fn latin1_bytes(text: &str) -> Result<Vec<u8>, String> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).map_err(|_| format!("'{}' is not latin-1", c)))
        .collect()
}

/// Apply `BUILD` state to an object.
fn build(target: Value, state: Value) -> Result<Value, String> {
    match target {
        Value::Object { class, .. } if is_reconstruct(&class) => {
            Ok(Value::Array(ndarray_from_state(state)?))
        }
        Value::Dict(mut dict) => match state {
            Value::Dict(extra) => {
                dict.extend(extra);
                Ok(Value::Dict(dict))
            }
            other => Err(format!("cannot BUILD a dict from {:?}", other)),
        },
        Value::Object { class, args, .. } => Ok(Value::Object {
            class,
            args,
            state: Some(Box::new(state)),
        }),
        other => Err(format!("cannot BUILD {:?}", other)),
    }
}

/// numpy's `ndarray.__setstate__` tuple:
/// `(version, shape, dtype, is_fortran, raw_data)`.
fn ndarray_from_state(state: Value) -> Result<NdBuffer, String> {
    let items = match state {
        Value::Tuple(items) => items,
        other => return Err(format!("ndarray state is not a tuple: {:?}", other)),
    };
    let fields = match items.len() {
        5 => &items[1..],
        4 => &items[..],
        n => return Err(format!("ndarray state has {} fields", n)),
    };

    let shape = fields[0]
        .as_items()
        .ok_or("ndarray shape is not a tuple")?
        .iter()
        .map(|dim| {
            dim.as_int()
                .and_then(|dim| usize::try_from(dim).ok())
                .ok_or_else(|| format!("invalid ndarray dimension {:?}", dim))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let dtype = dtype_string(&fields[1])?;
    let fortran_order = fields[2].as_int().map(|v| v != 0).unwrap_or(false);
    let data = match &fields[3] {
        Value::Bytes(bytes) => bytes.clone(),
        Value::Text(text) => latin1_bytes(text)?,
        other => return Err(format!("unsupported ndarray payload {:?}", other)),
    };

    let array = NdBuffer {
        dtype,
        shape,
        fortran_order,
        data,
    };
    if array.element_count().is_none() {
        return Err(format!("ndarray shape {:?} overflows", array.shape));
    }
    Ok(array)
}

/// Render a pickled `numpy.dtype` as `<byteorder><kind><size>`.
fn dtype_string(dtype: &Value) -> Result<String, String> {
    match dtype {
        Value::Object { class, args, state } if class == "numpy.dtype" => {
            let name = match args.first() {
                Some(Value::Text(name)) => name.clone(),
                Some(Value::Bytes(name)) => String::from_utf8_lossy(name).into_owned(),
                _ => return Err("numpy.dtype without a type name".to_string()),
            };
            let order = state
                .as_deref()
                .and_then(Value::as_items)
                .and_then(|items| items.get(1))
                .and_then(|order| match order {
                    Value::Text(text) => Some(text.clone()),
                    Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
                    _ => None,
                })
                .unwrap_or_else(|| "|".to_string());
            Ok(format!("{}{}", order, name))
        }
        other => Err(format!("unsupported dtype {:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_protocol2_dict_with_list() {
        // pickle.dumps({b"labels": [1, 300, -2]}, protocol=2) with a py2 str key
        let bytes: &[u8] = &[
            0x80, 0x02, b'}', b'q', 0x00, b'U', 0x06, b'l', b'a', b'b', b'e', b'l', b's', b'q',
            0x01, b']', b'q', 0x02, b'(', b'K', 0x01, b'M', 0x2c, 0x01, b'J', 0xfe, 0xff, 0xff,
            0xff, b'e', b's', b'.',
        ];

        let value = from_pickle_slice(bytes).expect("decode").normalize_text();
        assert_eq!(
            value.get("labels").and_then(Value::to_int_vec),
            Some(vec![1, 300, -2])
        );
    }

    #[test]
    fn memo_recall_shares_values() {
        // [u"a", <memo 0>]
        let bytes: &[u8] = &[
            0x80, 0x02, b']', b'(', b'X', 0x01, 0x00, 0x00, 0x00, b'a', b'q', 0x00, b'h', 0x00,
            b'e', b'.',
        ];
        let value = from_pickle_slice(bytes).expect("decode");
        assert_eq!(
            value,
            Value::List(vec![Value::Text("a".into()), Value::Text("a".into())])
        );
    }

    #[test]
    fn memoized_list_sees_later_appends() {
        // l = [1, 2]; (l, l)
        let bytes: &[u8] = &[
            0x80, 0x02, b']', b'q', 0x00, b'(', b'K', 0x01, b'K', 0x02, b'e', b'h', 0x00, 0x86,
            b'.',
        ];
        let value = from_pickle_slice(bytes).expect("decode");
        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(value, Value::Tuple(vec![list.clone(), list]));
    }

    #[test]
    fn memoized_dict_sees_later_setitems() {
        // d = {"k": 7}; [d, d]
        let bytes: &[u8] = &[
            0x80, 0x02, b']', b'(', b'}', b'q', 0x01, 0x8c, 0x01, b'k', b'K', 0x07, b's', b'h',
            0x01, b'e', b'.',
        ];
        let value = from_pickle_slice(bytes).expect("decode");
        let items = value.as_items().expect("list");
        assert_eq!(items.len(), 2);
        for item in items {
            assert_eq!(item.get("k").and_then(Value::as_int), Some(7));
        }
    }

    #[test]
    fn memoized_dtype_keeps_build_state() {
        let mut bytes = vec![0x80, 0x02];
        bytes.extend_from_slice(b"cnumpy\ndtype\n");
        bytes.extend_from_slice(&[b'U', 0x02, b'i', b'4', b'K', 0x00, b'K', 0x01, 0x87, b'R']);
        bytes.extend_from_slice(&[b'q', 0x00]);
        bytes.extend_from_slice(&[
            b'(', b'K', 0x03, b'U', 0x01, b'>', b'N', b'N', b'N', b'J', 0xff, 0xff, 0xff, 0xff,
            b'J', 0xff, 0xff, 0xff, 0xff, b'K', 0x00, b't', b'b',
        ]);
        // drop the built dtype, then reuse it from the memo
        bytes.extend_from_slice(&[b'0', b'h', 0x00, b'.']);

        let dtype = from_pickle_slice(&bytes).expect("decode");
        assert_eq!(dtype_string(&dtype).expect("dtype"), ">i4");
    }

    #[test]
    fn deeply_nested_containers_are_rejected() {
        let mut bytes = vec![0x80, 0x02];
        bytes.extend(std::iter::repeat(b']').take(200));
        bytes.extend(std::iter::repeat(b'a').take(199));
        bytes.push(b'.');

        let err = from_pickle_slice(&bytes).expect_err("too deep");
        assert!(err.to_string().contains("nested deeper"));

        // shallow nesting is fine
        let ok: &[u8] = &[0x80, 0x02, b']', b']', b']', b'a', b'a', b'.'];
        let value = from_pickle_slice(ok).expect("decode");
        assert_eq!(nesting(&value), 3);
    }

    #[test]
    fn repeated_memo_copies_are_bounded() {
        // t = (); repeat: t = (t, t, t)
        let mut bytes = vec![0x80, 0x02, b')', b'q', 0x00];
        for _ in 0..40 {
            bytes.extend_from_slice(&[b'0', b'h', 0x00, b'h', 0x00, b'h', 0x00, 0x87, b'q', 0x00]);
        }
        bytes.push(b'.');

        let err = from_pickle_slice(&bytes).expect_err("exponential copies");
        assert!(err.to_string().contains("memo copies"));
    }

    #[test]
    fn long1_and_tuple_opcodes() {
        // (LONG1 -1, LONG1 256) as TUPLE2
        let bytes: &[u8] = &[0x80, 0x02, 0x8a, 0x01, 0xff, 0x8a, 0x02, 0x00, 0x01, 0x86, b'.'];
        let value = from_pickle_slice(bytes).expect("decode");
        assert_eq!(value, Value::Tuple(vec![Value::Int(-1), Value::Int(256)]));
    }

    #[test]
    fn numpy_array_is_reconstructed() {
        let mut bytes = vec![0x80, 0x02];
        bytes.extend_from_slice(b"cnumpy.core.multiarray\n_reconstruct\n");
        bytes.extend_from_slice(b"cnumpy\nndarray\n");
        bytes.extend_from_slice(&[b'K', 0x00, 0x85, b'U', 0x01, b'b', 0x87, b'R']);
        // state: (1, (2, 2), dtype('u1'), False, b"\x01\x02\x03\x04")
        bytes.extend_from_slice(&[b'(', b'K', 0x01, b'K', 0x02, b'K', 0x02, 0x86]);
        bytes.extend_from_slice(b"cnumpy\ndtype\n");
        bytes.extend_from_slice(&[b'U', 0x02, b'u', b'1', b'K', 0x00, b'K', 0x01, 0x87, b'R']);
        bytes.extend_from_slice(&[
            b'(', b'K', 0x03, b'U', 0x01, b'|', b'N', b'N', b'N', b'J', 0xff, 0xff, 0xff, 0xff,
            b'J', 0xff, 0xff, 0xff, 0xff, b'K', 0x00, b't', b'b',
        ]);
        bytes.extend_from_slice(&[0x89, b'U', 0x04, 1, 2, 3, 4, b't', b'b', b'.']);

        let value = from_pickle_slice(&bytes).expect("decode");
        match value {
            Value::Array(array) => {
                assert_eq!(array.dtype, "|u1");
                assert_eq!(array.shape, vec![2, 2]);
                assert!(!array.fortran_order);
                assert_eq!(array.data, vec![1, 2, 3, 4]);
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let err = from_pickle_slice(&[0x80, 0x02, b'U', 0x05, b'a']).expect_err("truncated");
        match err {
            DatasetError::Pickle { message, .. } => assert!(message.contains("end of stream")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_opcode_is_reported_with_offset() {
        let err = from_pickle_slice(&[0x80, 0x02, 0xff]).expect_err("bad opcode");
        assert!(err.to_string().contains("offset 2"));
    }
}
