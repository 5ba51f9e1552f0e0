//! Per-field layout of a table's record type and its packed format string.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::error::{TableError, TableResult};
use crate::metadata::dtype::{Dtype, FieldSpec, shape_count};
use crate::types::{Endian, ScalarType};

/// Shape, size and type of one field, plus where it sits in a packed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name; members of nested records are named by their `/` path.
    pub name: String,
    /// Sub-array shape, empty for scalar fields.
    pub shape: Vec<usize>,
    /// Bytes per base element (the length for fixed strings).
    pub size: usize,
    pub dtype: ScalarType,
    /// Byte offset inside the packed record.
    pub offset: usize,
}

impl FieldDescriptor {
    /// Number of base elements in this field. Saturates for shapes too
    /// large to address; layouts built by [`TableLayout::from_dtype`] never
    /// hold such fields.
    pub fn count(&self) -> usize {
        shape_count(&self.shape).unwrap_or(usize::MAX)
    }

    pub fn nbytes(&self) -> usize {
        self.size.saturating_mul(self.count())
    }

    /// This field's item in the format string, e.g. `(2,2)d` or `10s`.
    pub fn format_item(&self) -> String {
        let mut item = String::new();
        if !self.shape.is_empty() {
            let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
            let _ = write!(item, "({})", dims.join(","));
        }
        item.push_str(&self.dtype.data_type.format_code());
        item
    }
}

/// Ordered field descriptors of a table together with the format string
/// summarising them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub fields: Vec<FieldDescriptor>,
    pub format: String,
    pub row_size: usize,
}

impl TableLayout {
    /// Describe the fields of a record dtype.
    pub fn from_dtype(dtype: &Dtype) -> TableResult<Self> {
        let Dtype::Structured(specs) = dtype else {
            return Err(TableError::NotATable(
                "dtype is not a record type".into(),
            ));
        };

        let mut fields = Vec::new();
        let mut offset = 0;
        flatten(specs, "", &mut offset, &mut fields)?;
        if fields.is_empty() {
            return Err(TableError::NotATable("record type has no fields".into()));
        }

        let mut seen = HashSet::new();
        for f in &fields {
            if !seen.insert(f.name.as_str()) {
                return Err(TableError::Metadata(format!(
                    "Duplicate field name: {}",
                    f.name
                )));
            }
        }

        let format = format_string(&fields)?;
        Ok(TableLayout {
            fields,
            format,
            row_size: offset,
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

fn flatten(
    specs: &[FieldSpec],
    prefix: &str,
    offset: &mut usize,
    out: &mut Vec<FieldDescriptor>,
) -> TableResult<()> {
    for spec in specs {
        let name = if prefix.is_empty() {
            spec.name.clone()
        } else {
            format!("{prefix}/{}", spec.name)
        };
        match &spec.dtype {
            Dtype::Scalar(scalar) => {
                let nbytes = spec.nbytes().ok_or_else(|| too_large(&name, &spec.shape))?;
                let end = offset
                    .checked_add(nbytes)
                    .ok_or_else(|| too_large(&name, &spec.shape))?;
                out.push(FieldDescriptor {
                    name,
                    shape: spec.shape.clone(),
                    size: scalar.byte_size(),
                    dtype: scalar.clone(),
                    offset: *offset,
                });
                *offset = end;
            }
            Dtype::Structured(_) if !spec.shape.is_empty() => {
                return Err(TableError::Unsupported(format!(
                    "nested record field {name} with shape {:?}",
                    spec.shape
                )));
            }
            Dtype::Structured(inner) => flatten(inner, &name, offset, out)?,
        }
    }
    Ok(())
}

fn too_large(name: &str, shape: &[usize]) -> TableError {
    TableError::Metadata(format!(
        "field {name} with shape {shape:?} is too large for a record"
    ))
}

/// Byte-order prefix shared by every byte-ordered field.
fn byte_order_prefix(fields: &[FieldDescriptor]) -> TableResult<char> {
    let mut order: Option<Endian> = None;
    for f in fields {
        if !f.dtype.data_type.is_byte_ordered() || f.dtype.byte_order == Endian::NotApplicable {
            continue;
        }
        match order {
            None => order = Some(f.dtype.byte_order),
            Some(o) if o != f.dtype.byte_order => {
                return Err(TableError::Layout(format!(
                    "field {} is {:?}-endian but earlier fields are {o:?}-endian",
                    f.name, f.dtype.byte_order
                )));
            }
            Some(_) => {}
        }
    }
    Ok(order.map_or('=', |o| o.as_char()))
}

fn format_string(fields: &[FieldDescriptor]) -> TableResult<String> {
    let mut fmt = String::new();
    fmt.push(byte_order_prefix(fields)?);
    for f in fields {
        fmt.push_str(&f.format_item());
    }
    Ok(fmt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;
    use serde_json::json;

    fn layout(raw: serde_json::Value) -> TableResult<TableLayout> {
        TableLayout::from_dtype(&Dtype::from_json(&raw).unwrap())
    }

    #[test]
    fn describes_fields_in_order() {
        let l = layout(json!([
            ["id", "<i4"],
            ["pos", "<f8", [2, 2]],
            ["label", "|S10"],
            ["ok", "|b1"]
        ]))
        .unwrap();

        assert_eq!(l.format, "<i(2,2)d10s?");
        assert_eq!(l.row_size, 4 + 32 + 10 + 1);
        let names: Vec<_> = l.names().collect();
        assert_eq!(names, vec!["id", "pos", "label", "ok"]);

        let pos = l.field("pos").unwrap();
        assert_eq!(pos.shape, vec![2, 2]);
        assert_eq!(pos.size, 8);
        assert_eq!(pos.offset, 4);
        assert_eq!(pos.nbytes(), 32);

        let label = l.field("label").unwrap();
        assert_eq!(label.size, 10);
        assert_eq!(label.dtype.data_type, DataType::String(10));
        assert_eq!(label.offset, 36);
    }

    #[test]
    fn nested_records_are_flattened() {
        let l = layout(json!([
            ["x", ">i2", 2],
            ["info", [["name", "|S2"], ["value", ">c16"]]],
            ["when", ">M8[s]"]
        ]))
        .unwrap();

        assert_eq!(l.format, ">(2)h2sZdq");
        let names: Vec<_> = l.names().collect();
        assert_eq!(names, vec!["x", "info/name", "info/value", "when"]);
        assert_eq!(l.field("info/value").unwrap().offset, 6);
        assert_eq!(l.row_size, 4 + 2 + 16 + 8);
    }

    #[test]
    fn single_byte_fields_use_native_prefix() {
        let l = layout(json!([["a", "|u1"], ["b", "|S3"], ["c", "|V4"]])).unwrap();
        assert_eq!(l.format, "=B3s4x");
    }

    #[test]
    fn unicode_field_size_counts_bytes() {
        let l = layout(json!([["u", "<U5"]])).unwrap();
        assert_eq!(l.format, "<5w");
        assert_eq!(l.field("u").unwrap().size, 20);
    }

    #[test]
    fn oversized_subarray_is_a_metadata_error() {
        let err = layout(json!([["a", "<f8", [4294967296u64, 4294967296u64]]])).unwrap_err();
        assert!(matches!(err, TableError::Metadata(_)));

        let half = usize::MAX / 2 + 1;
        let err = layout(json!([["a", "|u1", [half]], ["b", "|u1", [half]]])).unwrap_err();
        assert!(matches!(err, TableError::Metadata(_)));
    }

    #[test]
    fn mixed_byte_orders_fail() {
        let err = layout(json!([["a", "<i4"], ["b", ">i4"]])).unwrap_err();
        assert!(matches!(err, TableError::Layout(_)));
    }

    #[test]
    fn plain_dtype_is_not_a_table() {
        let err = layout(json!("<f8")).unwrap_err();
        assert!(matches!(err, TableError::NotATable(_)));
        let err = layout(json!([])).unwrap_err();
        assert!(matches!(err, TableError::NotATable(_)));
    }

    #[test]
    fn shaped_nested_record_is_unsupported() {
        let err = layout(json!([["n", [["a", "<i4"]], [3]]])).unwrap_err();
        assert!(matches!(err, TableError::Unsupported(_)));
    }

    #[test]
    fn flattened_name_collisions_fail() {
        let err = layout(json!([["a/b", "<i4"], ["a", [["b", "<i4"]]]])).unwrap_err();
        assert!(matches!(err, TableError::Metadata(_)));
    }
}
