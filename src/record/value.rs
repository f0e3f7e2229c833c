use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::str::FromStr;

use super::error::{RecordError, RecordResult};

/// Column value type as declared in a table definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlValueType {
    Null,
    Integer,     // 4 bytes
    Float,       // 4 bytes
    Char,        // 2 bytes (one UTF-16 code unit)
    String,      // u32 byte length + UTF-8
    Boolean,     // 1 byte
    IntegerArray,
    FloatArray,
    CharArray,
    BooleanArray,
    StringArray,
}

impl SqlValueType {
    /// Encoded width of a fixed-size type, `None` for length-prefixed ones
    pub const fn fixed_size(&self) -> Option<usize> {
        match self {
            SqlValueType::Integer => Some(4),
            SqlValueType::Float => Some(4),
            SqlValueType::Char => Some(2),
            SqlValueType::Boolean => Some(1),
            _ => None,
        }
    }

    pub const fn is_fixed_size(&self) -> bool {
        self.fixed_size().is_some()
    }

    /// Element type of an array type
    pub const fn element_type(&self) -> Option<SqlValueType> {
        match self {
            SqlValueType::IntegerArray => Some(SqlValueType::Integer),
            SqlValueType::FloatArray => Some(SqlValueType::Float),
            SqlValueType::CharArray => Some(SqlValueType::Char),
            SqlValueType::BooleanArray => Some(SqlValueType::Boolean),
            SqlValueType::StringArray => Some(SqlValueType::String),
            _ => None,
        }
    }

    pub const fn is_numeric(&self) -> bool {
        matches!(self, SqlValueType::Integer | SqlValueType::Float)
    }

    /// Token used in `.def` files
    pub const fn token(&self) -> &'static str {
        match self {
            SqlValueType::Null => "NULL",
            SqlValueType::Integer => "INTEGER",
            SqlValueType::Float => "FLOAT",
            SqlValueType::Char => "CHAR",
            SqlValueType::String => "STRING",
            SqlValueType::Boolean => "BOOLEAN",
            SqlValueType::IntegerArray => "INTEGER[]",
            SqlValueType::FloatArray => "FLOAT[]",
            SqlValueType::CharArray => "CHAR[]",
            SqlValueType::BooleanArray => "BOOLEAN[]",
            SqlValueType::StringArray => "STRING[]",
        }
    }

    /// Element type of an array whose elements can be encoded back to back
    fn fixed_element_type(&self, operation: &'static str) -> RecordResult<(SqlValueType, usize)> {
        match self.element_type() {
            Some(element) => match element.fixed_size() {
                Some(size) => Ok((element, size)),
                None => Err(RecordError::unsupported(*self, operation)),
            },
            None => Err(RecordError::unsupported(*self, operation)),
        }
    }
}

impl FromStr for SqlValueType {
    type Err = RecordError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let value_type = match token.to_ascii_uppercase().as_str() {
            "NULL" => SqlValueType::Null,
            "INTEGER" => SqlValueType::Integer,
            "FLOAT" => SqlValueType::Float,
            "CHAR" => SqlValueType::Char,
            "STRING" => SqlValueType::String,
            "BOOLEAN" => SqlValueType::Boolean,
            "INTEGER[]" => SqlValueType::IntegerArray,
            "FLOAT[]" => SqlValueType::FloatArray,
            "CHAR[]" => SqlValueType::CharArray,
            "BOOLEAN[]" => SqlValueType::BooleanArray,
            "STRING[]" => SqlValueType::StringArray,
            _ => {
                return Err(RecordError::InvalidValue(format!(
                    "Unknown value type token '{}'",
                    token
                )));
            }
        };
        Ok(value_type)
    }
}

impl fmt::Display for SqlValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A single non-null column value. SQL NULL is `None` at the row level.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i32),
    Float(f32),
    Char(char),
    String(String),
    Boolean(bool),
    Array(Vec<Value>),
}

impl Value {
    /// Parse a textual literal into a value of the given type
    pub fn parse(text: &str, value_type: SqlValueType) -> RecordResult<Self> {
        let invalid = || {
            RecordError::InvalidValue(format!("'{}' is not a valid {} literal", text, value_type))
        };

        match value_type {
            SqlValueType::Integer => text.trim().parse().map(Value::Integer).map_err(|_| invalid()),
            SqlValueType::Float => text.trim().parse().map(Value::Float).map_err(|_| invalid()),
            SqlValueType::Char => {
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Char(c)),
                    _ => Err(invalid()),
                }
            }
            SqlValueType::String => Ok(Value::String(text.to_string())),
            SqlValueType::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Value::Boolean(true)),
                "false" | "0" => Ok(Value::Boolean(false)),
                _ => Err(invalid()),
            },
            SqlValueType::Null => Err(RecordError::unsupported(value_type, "parse")),
            _ => {
                let element = value_type
                    .element_type()
                    .ok_or_else(|| RecordError::unsupported(value_type, "parse"))?;
                split_array_literal(text)
                    .into_iter()
                    .map(|item| Value::parse(item, element))
                    .collect::<RecordResult<Vec<_>>>()
                    .map(Value::Array)
            }
        }
    }

    /// Check whether this value can be stored in a column of `value_type`
    pub fn matches_type(&self, value_type: SqlValueType) -> bool {
        match (self, value_type) {
            (Value::Integer(_), SqlValueType::Integer)
            | (Value::Float(_), SqlValueType::Float)
            | (Value::Char(_), SqlValueType::Char)
            | (Value::String(_), SqlValueType::String)
            | (Value::Boolean(_), SqlValueType::Boolean) => true,
            (Value::Array(items), array_type) => match array_type.element_type() {
                Some(element) => items.iter().all(|item| item.matches_type(element)),
                None => false,
            },
            _ => false,
        }
    }

    /// Numeric view used by ordering comparisons
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i as i64),
            _ => None,
        }
    }

    /// Append the canonical encoding of this value to `out`
    pub fn encode(&self, value_type: SqlValueType, out: &mut Vec<u8>) -> RecordResult<()> {
        match (self, value_type) {
            (Value::Integer(i), SqlValueType::Integer) => out.extend_from_slice(&i.to_le_bytes()),
            (Value::Float(f), SqlValueType::Float) => out.extend_from_slice(&f.to_le_bytes()),
            (Value::Char(c), SqlValueType::Char) => {
                let unit = u16::try_from(*c as u32).map_err(|_| {
                    RecordError::InvalidValue(format!("Character '{}' does not fit in CHAR", c))
                })?;
                out.extend_from_slice(&unit.to_le_bytes());
            }
            (Value::String(s), SqlValueType::String) => {
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            (Value::Boolean(b), SqlValueType::Boolean) => out.push(*b as u8),
            (Value::Array(items), array_type) if array_type.element_type().is_some() => {
                let (element, _) = array_type.fixed_element_type("encode")?;
                out.extend_from_slice(&(items.len() as u32).to_le_bytes());
                for item in items {
                    item.encode(element, out)?;
                }
            }
            (_, SqlValueType::Null) => return Err(RecordError::unsupported(value_type, "encode")),
            (value, dt) => {
                return Err(RecordError::TypeMismatch {
                    expected: dt.to_string(),
                    actual: format!("{:?}", value),
                });
            }
        }
        Ok(())
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self, value_type: SqlValueType) -> RecordResult<Vec<u8>> {
        let mut out = Vec::new();
        self.encode(value_type, &mut out)?;
        Ok(out)
    }

    /// Number of bytes `encode` produces for this value
    pub fn encoded_len(&self, value_type: SqlValueType) -> RecordResult<usize> {
        if let Some(size) = value_type.fixed_size() {
            return Ok(size);
        }
        match (self, value_type) {
            (Value::String(s), SqlValueType::String) => Ok(4 + s.len()),
            (Value::Array(items), array_type) if array_type.element_type().is_some() => {
                let (_, size) = array_type.fixed_element_type("encode")?;
                Ok(4 + items.len() * size)
            }
            _ => Err(RecordError::unsupported(value_type, "encode")),
        }
    }

    /// Read one value of `value_type` from the stream
    pub fn decode<R: Read>(reader: &mut R, value_type: SqlValueType) -> RecordResult<Self> {
        Value::decode_within(reader, value_type, usize::MAX)
    }

    /// Like `decode`, but a length prefix claiming more than `limit` bytes
    /// in total is `Corrupted` and nothing is allocated for it
    pub fn decode_within<R: Read>(
        reader: &mut R,
        value_type: SqlValueType,
        limit: usize,
    ) -> RecordResult<Self> {
        let payload_limit = limit.saturating_sub(4);
        match value_type {
            SqlValueType::Integer => Ok(Value::Integer(i32::from_le_bytes(read_array(reader)?))),
            SqlValueType::Float => Ok(Value::Float(f32::from_le_bytes(read_array(reader)?))),
            SqlValueType::Char => {
                let unit = u16::from_le_bytes(read_array(reader)?);
                char::from_u32(unit as u32).map(Value::Char).ok_or_else(|| {
                    RecordError::Corrupted(format!("Invalid CHAR code unit {:#06x}", unit))
                })
            }
            SqlValueType::String => {
                let len = read_u32(reader)? as usize;
                if len > payload_limit {
                    return Err(overrun(len, limit));
                }
                let mut buf = vec![0u8; len];
                reader.read_exact(&mut buf)?;
                String::from_utf8(buf)
                    .map(Value::String)
                    .map_err(|e| RecordError::Corrupted(format!("Invalid UTF-8: {}", e)))
            }
            SqlValueType::Boolean => {
                let [byte] = read_array::<_, 1>(reader)?;
                Ok(Value::Boolean(byte != 0))
            }
            SqlValueType::Null => Err(RecordError::unsupported(value_type, "decode")),
            array_type => {
                let (element, size) = array_type.fixed_element_type("decode")?;
                let count = read_u32(reader)? as usize;
                if count.saturating_mul(size) > payload_limit {
                    return Err(overrun(count.saturating_mul(size), limit));
                }
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(Value::decode(reader, element)?);
                }
                Ok(Value::Array(items))
            }
        }
    }

    /// Advance past one encoded value without materialising it.
    /// Returns the number of bytes skipped.
    pub fn skip<S: Read + Seek>(stream: &mut S, value_type: SqlValueType) -> RecordResult<usize> {
        let skipped = match value_type.fixed_size() {
            Some(size) => size,
            None => match value_type {
                SqlValueType::String => 4 + read_u32(stream)? as usize,
                SqlValueType::Null => return Err(RecordError::unsupported(value_type, "skip")),
                array_type => {
                    let (_, size) = array_type.fixed_element_type("skip")?;
                    4 + read_u32(stream)? as usize * size
                }
            },
        };
        let payload = if value_type.is_fixed_size() { skipped } else { skipped - 4 };
        stream.seek(SeekFrom::Current(payload as i64))?;
        Ok(skipped)
    }

    /// Encoded size of a textual literal, computed before the value is encoded
    pub fn estimate_size(text: &str, value_type: SqlValueType) -> RecordResult<usize> {
        if let Some(size) = value_type.fixed_size() {
            return Ok(size);
        }
        match value_type {
            SqlValueType::String => Ok(4 + text.len()),
            SqlValueType::Null => Err(RecordError::unsupported(value_type, "estimate")),
            array_type => {
                let (_, size) = array_type.fixed_element_type("estimate")?;
                Ok(4 + split_array_literal(text).len() * size)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Char(c) => write!(f, "{}", c),
            Value::String(s) => f.write_str(s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Split `[a, b]` or `a,b` into trimmed items; blank input is an empty array
fn split_array_literal(text: &str) -> Vec<&str> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    if inner.trim().is_empty() {
        return Vec::new();
    }
    inner.split(',').map(str::trim).collect()
}

fn read_array<R: Read, const N: usize>(reader: &mut R) -> RecordResult<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

pub(crate) fn read_u32<R: Read>(reader: &mut R) -> RecordResult<u32> {
    Ok(u32::from_le_bytes(read_array(reader)?))
}

fn overrun(len: usize, limit: usize) -> RecordError {
    RecordError::Corrupted(format!("Value of {} bytes overruns the {} bytes left in its slot", len, limit))
}
