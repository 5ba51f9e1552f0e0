use crate::types::{DataType, Endian, ScalarType};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// NumPy type strings
// ---------------------------------------------------------------------------

/// Intermediate parsed representation of a NumPy type string.
#[derive(Debug)]
struct NumPyFormat {
    byte_order: char,
    type_code: char,
    byte_size: usize,
    time_unit: Option<String>,
}

/// Parse a NumPy type string (e.g. `"<f8"`, `">i4"`, `"|S10"`, `"<M8[ns]"`)
/// into a [`ScalarType`].
pub fn parse_numpy_dtype(s: &str) -> Result<ScalarType, String> {
    let fmt = parse_numpy_format(s)?;
    numpy_format_to_scalar(&fmt)
}

fn parse_numpy_format(s: &str) -> Result<NumPyFormat, String> {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() < 3 {
        return Err(format!("NumPy format string too short: {s}"));
    }

    let byte_order = chars[0];
    if !['<', '>', '|'].contains(&byte_order) {
        return Err(format!("Invalid byte order: {byte_order}"));
    }

    let type_code = chars[1];
    if !['b', 'i', 'u', 'f', 'c', 'M', 'm', 'S', 'U', 'V'].contains(&type_code) {
        return Err(format!("Invalid type code: {type_code}"));
    }

    let rest: String = chars[2..].iter().collect();
    let (size_str, time_unit) = match rest.find('[') {
        Some(pos) if matches!(type_code, 'M' | 'm') => {
            let unit = rest[pos + 1..]
                .strip_suffix(']')
                .ok_or("Missing closing bracket in datetime format")?;
            if unit.is_empty() {
                return Err(format!("Empty time unit in {s}"));
            }
            (&rest[..pos], Some(unit.to_string()))
        }
        _ => (rest.as_str(), None),
    };

    let byte_size: usize = size_str
        .parse()
        .map_err(|_| format!("Invalid byte size: {size_str}"))?;
    if byte_size == 0 {
        return Err(format!("Byte size must be > 0, got {size_str}"));
    }

    Ok(NumPyFormat {
        byte_order,
        type_code,
        byte_size,
        time_unit,
    })
}

fn parse_byte_order(c: char) -> Result<Endian, String> {
    match c {
        '<' => Ok(Endian::Little),
        '>' => Ok(Endian::Big),
        '|' => Ok(Endian::NotApplicable),
        _ => Err(format!("Invalid byte order: {c}")),
    }
}

fn numpy_format_to_scalar(fmt: &NumPyFormat) -> Result<ScalarType, String> {
    let data_type = match (fmt.type_code, fmt.byte_size) {
        ('b', 1) => DataType::Bool,
        ('i', 1) => DataType::Int8,
        ('i', 2) => DataType::Int16,
        ('i', 4) => DataType::Int32,
        ('i', 8) => DataType::Int64,
        ('u', 1) => DataType::UInt8,
        ('u', 2) => DataType::UInt16,
        ('u', 4) => DataType::UInt32,
        ('u', 8) => DataType::UInt64,
        ('f', 2) => DataType::Float16,
        ('f', 4) => DataType::Float32,
        ('f', 8) => DataType::Float64,
        ('c', 8) => DataType::Complex64,
        ('c', 16) => DataType::Complex128,
        ('S', n) => DataType::String(n),
        ('U', n) if n.checked_mul(4).is_some() => DataType::Unicode(n),
        ('V', n) => DataType::Void(n),
        ('M', 8) => DataType::DateTime64,
        ('m', 8) => DataType::TimeDelta64,
        _ => {
            return Err(format!(
                "Unsupported NumPy type: {}{}",
                fmt.type_code, fmt.byte_size
            ));
        }
    };

    Ok(ScalarType {
        data_type,
        byte_order: parse_byte_order(fmt.byte_order)?,
        time_unit: fmt.time_unit.clone(),
    })
}

// ---------------------------------------------------------------------------
// Structured dtypes
// ---------------------------------------------------------------------------

/// A Zarr V2 `dtype`: either a plain type string or a structured
/// (record) type given as a list of `[name, dtype]` / `[name, dtype, shape]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dtype {
    Scalar(ScalarType),
    Structured(Vec<FieldSpec>),
}

/// One member of a structured dtype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub dtype: Dtype,
    /// Sub-array shape; empty for scalar members.
    pub shape: Vec<usize>,
}

impl FieldSpec {
    pub fn scalar(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self {
            name: name.into(),
            dtype: Dtype::Scalar(scalar),
            shape: Vec::new(),
        }
    }

    pub fn array(name: impl Into<String>, scalar: ScalarType, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            dtype: Dtype::Scalar(scalar),
            shape,
        }
    }

    pub fn nested(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.into(),
            dtype: Dtype::Structured(fields),
            shape: Vec::new(),
        }
    }

    /// Packed size in bytes of this member, sub-array included; `None` when
    /// it does not fit in `usize`.
    pub fn nbytes(&self) -> Option<usize> {
        shape_count(&self.shape)?.checked_mul(self.dtype.itemsize()?)
    }
}

/// Number of elements in a sub-array of `shape`; `None` on overflow.
pub fn shape_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |count, &d| count.checked_mul(d))
}

impl Dtype {
    pub fn is_structured(&self) -> bool {
        matches!(self, Dtype::Structured(_))
    }

    /// Packed size in bytes of one element; `None` on overflow.
    pub fn itemsize(&self) -> Option<usize> {
        match self {
            Dtype::Scalar(s) => Some(s.byte_size()),
            Dtype::Structured(fields) => fields
                .iter()
                .try_fold(0usize, |total, f| total.checked_add(f.nbytes()?)),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::String(s) => parse_numpy_dtype(s).map(Dtype::Scalar),
            serde_json::Value::Array(items) => items
                .iter()
                .map(parse_field)
                .collect::<Result<Vec<_>, _>>()
                .map(Dtype::Structured),
            other => Err(format!("Unexpected dtype JSON: {other}")),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Dtype::Scalar(s) => serde_json::Value::String(s.typestr()),
            Dtype::Structured(fields) => serde_json::Value::Array(
                fields
                    .iter()
                    .map(|f| {
                        let mut entry = vec![
                            serde_json::Value::String(f.name.clone()),
                            f.dtype.to_json(),
                        ];
                        if !f.shape.is_empty() {
                            entry.push(serde_json::json!(f.shape));
                        }
                        serde_json::Value::Array(entry)
                    })
                    .collect(),
            ),
        }
    }
}

fn parse_field(value: &serde_json::Value) -> Result<FieldSpec, String> {
    let entry = value
        .as_array()
        .filter(|a| a.len() == 2 || a.len() == 3)
        .ok_or_else(|| format!("Structured dtype entry must be [name, dtype(, shape)]: {value}"))?;

    let name = entry[0]
        .as_str()
        .ok_or_else(|| format!("Field name must be a string: {}", entry[0]))?;
    if name.is_empty() {
        return Err("Field name must not be empty".into());
    }

    let dtype = Dtype::from_json(&entry[1]).map_err(|e| format!("field {name}: {e}"))?;

    let shape = match entry.get(2) {
        None => Vec::new(),
        Some(serde_json::Value::Number(n)) => vec![as_dim(n, name)?],
        Some(serde_json::Value::Array(dims)) => dims
            .iter()
            .map(|d| match d {
                serde_json::Value::Number(n) => as_dim(n, name),
                other => Err(format!("field {name}: bad shape entry {other}")),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => return Err(format!("field {name}: bad shape {other}")),
    };

    Ok(FieldSpec {
        name: name.to_string(),
        dtype,
        shape,
    })
}

fn as_dim(n: &serde_json::Number, name: &str) -> Result<usize, String> {
    n.as_u64()
        .map(|d| d as usize)
        .ok_or_else(|| format!("field {name}: shape dimension must be a non-negative integer, got {n}"))
}

// Serde: Dtype serialises as its Zarr V2 JSON form
impl Serialize for Dtype {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Dtype {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Dtype::from_json(&raw).map_err(serde::de::Error::custom)
    }
}
