use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use half::f16;
use num_complex::Complex;
use std::io::Cursor;

use crate::error::{TableError, TableResult};

// ---------------------------------------------------------------------------
// Endian
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    Little,
    Big,
    NotApplicable,
}

impl Endian {
    /// The NumPy byte-order character.
    pub fn as_char(&self) -> char {
        match self {
            Endian::Little => '<',
            Endian::Big => '>',
            Endian::NotApplicable => '|',
        }
    }
}

// ---------------------------------------------------------------------------
// ArrayOrder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ArrayOrder {
    #[default]
    C,
    F,
}

// ---------------------------------------------------------------------------
// DataType
// ---------------------------------------------------------------------------

/// Kind and width of a single field element.
///
/// The sized text kinds carry their length: bytes for `String` and `Void`,
/// characters for `Unicode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    Float32,
    Float64,
    Complex64,
    Complex128,
    String(usize),
    Unicode(usize),
    Void(usize),
    DateTime64,
    TimeDelta64,
}

impl DataType {
    /// Number of bytes per element.
    pub fn byte_size(&self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 | DataType::Float16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
            DataType::Complex64 => 8,
            DataType::Complex128 => 16,
            DataType::String(n) | DataType::Void(n) => *n,
            DataType::Unicode(n) => n.saturating_mul(4),
            DataType::DateTime64 | DataType::TimeDelta64 => 8,
        }
    }

    /// Whether the in-memory representation depends on byte order.
    pub fn is_byte_ordered(&self) -> bool {
        !matches!(
            self,
            DataType::Bool
                | DataType::Int8
                | DataType::UInt8
                | DataType::String(_)
                | DataType::Void(_)
        )
    }

    /// Item code used in packed struct-format strings.
    pub fn format_code(&self) -> String {
        match self {
            DataType::Bool => "?".into(),
            DataType::Int8 => "b".into(),
            DataType::UInt8 => "B".into(),
            DataType::Int16 => "h".into(),
            DataType::UInt16 => "H".into(),
            DataType::Int32 => "i".into(),
            DataType::UInt32 => "I".into(),
            DataType::Int64 | DataType::DateTime64 | DataType::TimeDelta64 => "q".into(),
            DataType::UInt64 => "Q".into(),
            DataType::Float16 => "e".into(),
            DataType::Float32 => "f".into(),
            DataType::Float64 => "d".into(),
            DataType::Complex64 => "Zf".into(),
            DataType::Complex128 => "Zd".into(),
            DataType::String(n) => format!("{n}s"),
            DataType::Unicode(n) => format!("{n}w"),
            DataType::Void(n) => format!("{n}x"),
        }
    }
}

// ---------------------------------------------------------------------------
// ScalarType
// ---------------------------------------------------------------------------

/// A NumPy scalar type: kind, byte order and (for datetimes) the time unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScalarType {
    pub data_type: DataType,
    pub byte_order: Endian,
    pub time_unit: Option<String>,
}

impl ScalarType {
    pub fn new(data_type: DataType, byte_order: Endian) -> Self {
        Self {
            data_type,
            byte_order,
            time_unit: None,
        }
    }

    pub fn byte_size(&self) -> usize {
        self.data_type.byte_size()
    }

    /// Render the NumPy type string, e.g. `"<f8"`, `"|S10"`, `"<M8[ns]"`.
    pub fn typestr(&self) -> String {
        let (tc, bs) = match self.data_type {
            DataType::Bool => ('b', 1),
            DataType::Int8 => ('i', 1),
            DataType::Int16 => ('i', 2),
            DataType::Int32 => ('i', 4),
            DataType::Int64 => ('i', 8),
            DataType::UInt8 => ('u', 1),
            DataType::UInt16 => ('u', 2),
            DataType::UInt32 => ('u', 4),
            DataType::UInt64 => ('u', 8),
            DataType::Float16 => ('f', 2),
            DataType::Float32 => ('f', 4),
            DataType::Float64 => ('f', 8),
            DataType::Complex64 => ('c', 8),
            DataType::Complex128 => ('c', 16),
            DataType::String(n) => ('S', n),
            DataType::Unicode(n) => ('U', n),
            DataType::Void(n) => ('V', n),
            DataType::DateTime64 => ('M', 8),
            DataType::TimeDelta64 => ('m', 8),
        };
        let tu = self
            .time_unit
            .as_ref()
            .map(|u| format!("[{u}]"))
            .unwrap_or_default();
        format!("{}{tc}{bs}{tu}", self.byte_order.as_char())
    }
}

// ---------------------------------------------------------------------------
// Value  (scalar)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float16(f16),
    Float32(f32),
    Float64(f64),
    Complex64(Complex<f32>),
    Complex128(Complex<f64>),
    String(String),
    Bytes(Vec<u8>),
    DateTime64(i64),
    TimeDelta64(i64),
}

impl Value {
    /// Lossily convert this scalar to `f64`.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(true) => Some(1.0),
            Value::Bool(false) => Some(0.0),
            Value::Int8(v) => Some(*v as f64),
            Value::Int16(v) => Some(*v as f64),
            Value::Int32(v) => Some(*v as f64),
            Value::Int64(v) | Value::DateTime64(v) | Value::TimeDelta64(v) => Some(*v as f64),
            Value::UInt8(v) => Some(*v as f64),
            Value::UInt16(v) => Some(*v as f64),
            Value::UInt32(v) => Some(*v as f64),
            Value::UInt64(v) => Some(*v as f64),
            Value::Float16(v) => Some(v.to_f64()),
            Value::Float32(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            Value::Complex64(c) => Some(c.re as f64),
            Value::Complex128(c) => Some(c.re),
            Value::String(_) | Value::Bytes(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

/// The value stored in one field of one record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(Value),
    /// Sub-array field; `values` are in C order.
    Array { shape: Vec<usize>, values: Vec<Value> },
}

// ---------------------------------------------------------------------------
// Raw bytes <-> scalar
// ---------------------------------------------------------------------------

/// Interpret the leading bytes of `data` as one element of `scalar`.
pub fn decode_value(scalar: &ScalarType, data: &[u8]) -> TableResult<Value> {
    let size = scalar.byte_size();
    if data.len() < size {
        return Err(TableError::Decode(format!(
            "Need {size} bytes for {}, got {}",
            scalar.typestr(),
            data.len()
        )));
    }
    let data = &data[..size];
    match scalar.byte_order {
        Endian::Little | Endian::NotApplicable => read_value::<LittleEndian>(scalar.data_type, data),
        Endian::Big => read_value::<BigEndian>(scalar.data_type, data),
    }
}

fn read_value<B: ByteOrder>(dtype: DataType, data: &[u8]) -> TableResult<Value> {
    let mut cursor = Cursor::new(data);
    let value = match dtype {
        DataType::Bool => Value::Bool(cursor.read_u8().map_err(read_err)? != 0),
        DataType::Int8 => Value::Int8(cursor.read_i8().map_err(read_err)?),
        DataType::UInt8 => Value::UInt8(cursor.read_u8().map_err(read_err)?),
        DataType::Int16 => Value::Int16(cursor.read_i16::<B>().map_err(read_err)?),
        DataType::Int32 => Value::Int32(cursor.read_i32::<B>().map_err(read_err)?),
        DataType::Int64 => Value::Int64(cursor.read_i64::<B>().map_err(read_err)?),
        DataType::UInt16 => Value::UInt16(cursor.read_u16::<B>().map_err(read_err)?),
        DataType::UInt32 => Value::UInt32(cursor.read_u32::<B>().map_err(read_err)?),
        DataType::UInt64 => Value::UInt64(cursor.read_u64::<B>().map_err(read_err)?),
        DataType::Float16 => {
            Value::Float16(f16::from_bits(cursor.read_u16::<B>().map_err(read_err)?))
        }
        DataType::Float32 => Value::Float32(cursor.read_f32::<B>().map_err(read_err)?),
        DataType::Float64 => Value::Float64(cursor.read_f64::<B>().map_err(read_err)?),
        DataType::Complex64 => {
            let re = cursor.read_f32::<B>().map_err(read_err)?;
            let im = cursor.read_f32::<B>().map_err(read_err)?;
            Value::Complex64(Complex::new(re, im))
        }
        DataType::Complex128 => {
            let re = cursor.read_f64::<B>().map_err(read_err)?;
            let im = cursor.read_f64::<B>().map_err(read_err)?;
            Value::Complex128(Complex::new(re, im))
        }
        DataType::String(n) => {
            let raw = &data[..n];
            let end = raw.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
            Value::String(String::from_utf8_lossy(&raw[..end]).into_owned())
        }
        DataType::Unicode(n) => {
            let mut points = Vec::with_capacity(n);
            for _ in 0..n {
                points.push(cursor.read_u32::<B>().map_err(read_err)?);
            }
            while points.last() == Some(&0) {
                points.pop();
            }
            let text = points
                .into_iter()
                .map(|cp| {
                    char::from_u32(cp).ok_or_else(|| {
                        TableError::Decode(format!("Invalid UCS-4 code point: {cp:#x}"))
                    })
                })
                .collect::<TableResult<String>>()?;
            Value::String(text)
        }
        DataType::Void(n) => Value::Bytes(data[..n].to_vec()),
        DataType::DateTime64 => Value::DateTime64(cursor.read_i64::<B>().map_err(read_err)?),
        DataType::TimeDelta64 => Value::TimeDelta64(cursor.read_i64::<B>().map_err(read_err)?),
    };
    Ok(value)
}

fn read_err(e: std::io::Error) -> TableError {
    TableError::Decode(format!("Failed to read value: {e}"))
}

/// Append the packed encoding of `value` as one element of `scalar`.
pub fn encode_value(scalar: &ScalarType, value: &Value, out: &mut Vec<u8>) -> TableResult<()> {
    match scalar.byte_order {
        Endian::Little | Endian::NotApplicable => {
            write_value::<LittleEndian>(scalar.data_type, value, out)
        }
        Endian::Big => write_value::<BigEndian>(scalar.data_type, value, out),
    }
}

fn write_value<B: ByteOrder>(dtype: DataType, value: &Value, out: &mut Vec<u8>) -> TableResult<()> {
    let written = match (dtype, value) {
        (DataType::Bool, Value::Bool(b)) => out.write_u8(u8::from(*b)),
        (DataType::Int8, Value::Int8(v)) => out.write_i8(*v),
        (DataType::UInt8, Value::UInt8(v)) => out.write_u8(*v),
        (DataType::Int16, Value::Int16(v)) => out.write_i16::<B>(*v),
        (DataType::Int32, Value::Int32(v)) => out.write_i32::<B>(*v),
        (DataType::Int64, Value::Int64(v)) => out.write_i64::<B>(*v),
        (DataType::UInt16, Value::UInt16(v)) => out.write_u16::<B>(*v),
        (DataType::UInt32, Value::UInt32(v)) => out.write_u32::<B>(*v),
        (DataType::UInt64, Value::UInt64(v)) => out.write_u64::<B>(*v),
        (DataType::Float16, Value::Float16(v)) => out.write_u16::<B>(v.to_bits()),
        (DataType::Float32, Value::Float32(v)) => out.write_f32::<B>(*v),
        (DataType::Float64, Value::Float64(v)) => out.write_f64::<B>(*v),
        (DataType::Complex64, Value::Complex64(c)) => out
            .write_f32::<B>(c.re)
            .and_then(|_| out.write_f32::<B>(c.im)),
        (DataType::Complex128, Value::Complex128(c)) => out
            .write_f64::<B>(c.re)
            .and_then(|_| out.write_f64::<B>(c.im)),
        (DataType::DateTime64, Value::DateTime64(v))
        | (DataType::TimeDelta64, Value::TimeDelta64(v)) => out.write_i64::<B>(*v),
        (DataType::String(n), Value::String(s)) => {
            return write_padded(out, s.as_bytes(), n);
        }
        (DataType::String(n), Value::Bytes(b)) | (DataType::Void(n), Value::Bytes(b)) => {
            return write_padded(out, b, n);
        }
        (DataType::Unicode(n), Value::String(s)) => {
            let count = s.chars().count();
            if count > n {
                return Err(TableError::Encode(format!(
                    "String of {count} characters does not fit U{n}"
                )));
            }
            for ch in s.chars() {
                out.write_u32::<B>(ch as u32)
                    .map_err(|e| TableError::Encode(e.to_string()))?;
            }
            for _ in count..n {
                out.write_u32::<B>(0)
                    .map_err(|e| TableError::Encode(e.to_string()))?;
            }
            return Ok(());
        }
        (dtype, value) => {
            return Err(TableError::Encode(format!(
                "Value {value:?} does not match field type {dtype:?}"
            )));
        }
    };
    written.map_err(|e| TableError::Encode(format!("Failed to write value: {e}")))
}

fn write_padded(out: &mut Vec<u8>, data: &[u8], width: usize) -> TableResult<()> {
    if data.len() > width {
        return Err(TableError::Encode(format!(
            "{} bytes do not fit a field of {width} bytes",
            data.len()
        )));
    }
    out.extend_from_slice(data);
    out.resize(out.len() + (width - data.len()), 0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_int32_decodes() {
        let scalar = ScalarType::new(DataType::Int32, Endian::Big);
        let value = decode_value(&scalar, &[0, 0, 1, 2]).unwrap();
        assert_eq!(value, Value::Int32(258));
    }

    #[test]
    fn fixed_string_drops_trailing_nuls() {
        let scalar = ScalarType::new(DataType::String(6), Endian::NotApplicable);
        let value = decode_value(&scalar, b"abc\0\0\0").unwrap();
        assert_eq!(value.as_str(), Some("abc"));
    }

    #[test]
    fn unicode_encodes_as_ucs4() {
        let scalar = ScalarType::new(DataType::Unicode(3), Endian::Little);
        let mut out = Vec::new();
        encode_value(&scalar, &Value::String("hé".into()), &mut out).unwrap();
        assert_eq!(out.len(), 12);
        assert_eq!(&out[4..8], &[0xe9, 0, 0, 0]);
        assert_eq!(decode_value(&scalar, &out).unwrap(), Value::String("hé".into()));
    }

    #[test]
    fn short_buffer_is_a_decode_error() {
        let scalar = ScalarType::new(DataType::Float64, Endian::Little);
        assert!(matches!(
            decode_value(&scalar, &[0; 4]),
            Err(TableError::Decode(_))
        ));
    }

    #[test]
    fn mismatched_value_is_rejected() {
        let scalar = ScalarType::new(DataType::Float32, Endian::Little);
        let mut out = Vec::new();
        assert!(encode_value(&scalar, &Value::Int32(1), &mut out).is_err());
    }

    #[test]
    fn oversized_string_is_rejected() {
        let scalar = ScalarType::new(DataType::String(2), Endian::NotApplicable);
        let mut out = Vec::new();
        assert!(encode_value(&scalar, &Value::String("abc".into()), &mut out).is_err());
    }

    #[test]
    fn typestr_includes_time_unit() {
        let mut scalar = ScalarType::new(DataType::DateTime64, Endian::Little);
        scalar.time_unit = Some("ns".into());
        assert_eq!(scalar.typestr(), "<M8[ns]");
        assert_eq!(scalar.data_type.format_code(), "q");
    }
}
