use std::fmt;

use crate::error::{ExecError, ExecResult};

// ---------------------------------------------------------------------------
// ValueType — port / payload type tags
// ---------------------------------------------------------------------------

/// Discriminant for every payload type a port can declare.
///
/// Scalar numeric tags have a vector counterpart; strings and image
/// matrices do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Str,
    Mat,
    VecInt32,
    VecUInt32,
    VecInt64,
    VecUInt64,
    VecFloat32,
    VecFloat64,
}

impl ValueType {
    /// The element tag of a vector tag, `None` for scalars.
    pub fn element(self) -> Option<ValueType> {
        match self {
            ValueType::VecInt32 => Some(ValueType::Int32),
            ValueType::VecUInt32 => Some(ValueType::UInt32),
            ValueType::VecInt64 => Some(ValueType::Int64),
            ValueType::VecUInt64 => Some(ValueType::UInt64),
            ValueType::VecFloat32 => Some(ValueType::Float32),
            ValueType::VecFloat64 => Some(ValueType::Float64),
            _ => None,
        }
    }

    /// The vector tag of a scalar numeric tag, `None` otherwise.
    pub fn vector_of(self) -> Option<ValueType> {
        match self {
            ValueType::Int32 => Some(ValueType::VecInt32),
            ValueType::UInt32 => Some(ValueType::VecUInt32),
            ValueType::Int64 => Some(ValueType::VecInt64),
            ValueType::UInt64 => Some(ValueType::VecUInt64),
            ValueType::Float32 => Some(ValueType::VecFloat32),
            ValueType::Float64 => Some(ValueType::VecFloat64),
            _ => None,
        }
    }

    pub fn is_vector(self) -> bool {
        self.element().is_some()
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Int32 => "int32",
            ValueType::UInt32 => "uint32",
            ValueType::Int64 => "int64",
            ValueType::UInt64 => "uint64",
            ValueType::Float32 => "float",
            ValueType::Float64 => "dblFloat",
            ValueType::Str => "string",
            ValueType::Mat => "mat",
            ValueType::VecInt32 => "vect(int32)",
            ValueType::VecUInt32 => "vect(uint32)",
            ValueType::VecInt64 => "vect(int64)",
            ValueType::VecUInt64 => "vect(uint64)",
            ValueType::VecFloat32 => "vect(float)",
            ValueType::VecFloat64 => "vect(dblFloat)",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// ImageMat — opaque image matrix
// ---------------------------------------------------------------------------

/// Opaque image matrix: row-major `rows × cols × channels` bytes.
///
/// The core never interprets the pixel data; image operators live outside
/// the execution core and agree on the layout among themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMat {
    pub rows: usize,
    pub cols: usize,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl ImageMat {
    pub fn new(rows: usize, cols: usize, channels: usize) -> Self {
        Self {
            rows,
            cols,
            channels,
            data: vec![0; rows * cols * channels],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Value — type-tagged payload container
// ---------------------------------------------------------------------------

/// A payload value travelling through a data port.
///
/// The variant always matches the declared [`ValueType`] of the port that
/// carries it; every access path re-checks the tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Str(String),
    Mat(ImageMat),
    VecInt32(Vec<i32>),
    VecUInt32(Vec<u32>),
    VecInt64(Vec<i64>),
    VecUInt64(Vec<u64>),
    VecFloat32(Vec<f32>),
    VecFloat64(Vec<f64>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Int32(_) => ValueType::Int32,
            Value::UInt32(_) => ValueType::UInt32,
            Value::Int64(_) => ValueType::Int64,
            Value::UInt64(_) => ValueType::UInt64,
            Value::Float32(_) => ValueType::Float32,
            Value::Float64(_) => ValueType::Float64,
            Value::Str(_) => ValueType::Str,
            Value::Mat(_) => ValueType::Mat,
            Value::VecInt32(_) => ValueType::VecInt32,
            Value::VecUInt32(_) => ValueType::VecUInt32,
            Value::VecInt64(_) => ValueType::VecInt64,
            Value::VecUInt64(_) => ValueType::VecUInt64,
            Value::VecFloat32(_) => ValueType::VecFloat32,
            Value::VecFloat64(_) => ValueType::VecFloat64,
        }
    }

    /// The zero / empty value of a tag. Used to seed a fresh data slot.
    pub fn default_of(ty: ValueType) -> Value {
        match ty {
            ValueType::Int32 => Value::Int32(0),
            ValueType::UInt32 => Value::UInt32(0),
            ValueType::Int64 => Value::Int64(0),
            ValueType::UInt64 => Value::UInt64(0),
            ValueType::Float32 => Value::Float32(0.0),
            ValueType::Float64 => Value::Float64(0.0),
            ValueType::Str => Value::Str(String::new()),
            ValueType::Mat => Value::Mat(ImageMat::default()),
            ValueType::VecInt32 => Value::VecInt32(Vec::new()),
            ValueType::VecUInt32 => Value::VecUInt32(Vec::new()),
            ValueType::VecInt64 => Value::VecInt64(Vec::new()),
            ValueType::VecUInt64 => Value::VecUInt64(Vec::new()),
            ValueType::VecFloat32 => Value::VecFloat32(Vec::new()),
            ValueType::VecFloat64 => Value::VecFloat64(Vec::new()),
        }
    }

    /// Error unless the runtime tag matches `expected`.
    pub fn check_type(&self, expected: ValueType) -> ExecResult<()> {
        let actual = self.value_type();
        if actual == expected {
            Ok(())
        } else {
            Err(ExecError::DataFormat(format!(
                "expected {expected}, got {actual}"
            )))
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            Value::Int32(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            Value::Float32(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Split a vector value into its scalar elements.
    pub fn unstack(&self) -> ExecResult<Vec<Value>> {
        match self {
            Value::VecInt32(v) => Ok(v.iter().copied().map(Value::Int32).collect()),
            Value::VecUInt32(v) => Ok(v.iter().copied().map(Value::UInt32).collect()),
            Value::VecInt64(v) => Ok(v.iter().copied().map(Value::Int64).collect()),
            Value::VecUInt64(v) => Ok(v.iter().copied().map(Value::UInt64).collect()),
            Value::VecFloat32(v) => Ok(v.iter().copied().map(Value::Float32).collect()),
            Value::VecFloat64(v) => Ok(v.iter().copied().map(Value::Float64).collect()),
            other => Err(ExecError::DataFormat(format!(
                "cannot unstack non-vector value of type {}",
                other.value_type()
            ))),
        }
    }

    /// Combine scalar elements into the vector value of `elem_ty`.
    ///
    /// Every element must carry exactly `elem_ty`.
    pub fn stack(elem_ty: ValueType, elems: &[Value]) -> ExecResult<Value> {
        let vec_ty = elem_ty.vector_of().ok_or_else(|| {
            ExecError::DataFormat(format!("no vector counterpart for {elem_ty}"))
        })?;
        for e in elems {
            e.check_type(elem_ty)?;
        }
        let stacked = match vec_ty {
            ValueType::VecInt32 => Value::VecInt32(
                elems
                    .iter()
                    .map(|e| match e {
                        Value::Int32(v) => *v,
                        _ => unreachable!(),
                    })
                    .collect(),
            ),
            ValueType::VecUInt32 => Value::VecUInt32(
                elems
                    .iter()
                    .map(|e| match e {
                        Value::UInt32(v) => *v,
                        _ => unreachable!(),
                    })
                    .collect(),
            ),
            ValueType::VecInt64 => Value::VecInt64(
                elems
                    .iter()
                    .map(|e| match e {
                        Value::Int64(v) => *v,
                        _ => unreachable!(),
                    })
                    .collect(),
            ),
            ValueType::VecUInt64 => Value::VecUInt64(
                elems
                    .iter()
                    .map(|e| match e {
                        Value::UInt64(v) => *v,
                        _ => unreachable!(),
                    })
                    .collect(),
            ),
            ValueType::VecFloat32 => Value::VecFloat32(
                elems
                    .iter()
                    .map(|e| match e {
                        Value::Float32(v) => *v,
                        _ => unreachable!(),
                    })
                    .collect(),
            ),
            ValueType::VecFloat64 => Value::VecFloat64(
                elems
                    .iter()
                    .map(|e| match e {
                        Value::Float64(v) => *v,
                        _ => unreachable!(),
                    })
                    .collect(),
            ),
            _ => unreachable!(),
        };
        Ok(stacked)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_payloads() {
        assert_eq!(Value::Int64(42).value_type(), ValueType::Int64);
        assert_eq!(Value::Str("x".into()).value_type(), ValueType::Str);
        assert_eq!(
            Value::VecFloat64(vec![1.0]).value_type(),
            ValueType::VecFloat64
        );
    }

    #[test]
    fn vector_tag_mapping_is_symmetric() {
        for ty in [
            ValueType::Int32,
            ValueType::UInt32,
            ValueType::Int64,
            ValueType::UInt64,
            ValueType::Float32,
            ValueType::Float64,
        ] {
            let vec = ty.vector_of().unwrap();
            assert_eq!(vec.element(), Some(ty));
        }
        assert!(ValueType::Str.vector_of().is_none());
        assert!(ValueType::Mat.vector_of().is_none());
    }

    #[test]
    fn check_type_rejects_mismatch() {
        assert!(Value::Int64(1).check_type(ValueType::Int64).is_ok());
        assert!(Value::Int64(1).check_type(ValueType::Float64).is_err());
    }

    #[test]
    fn stack_then_unstack() {
        let elems = vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)];
        let stacked = Value::stack(ValueType::Int64, &elems).unwrap();
        assert_eq!(stacked, Value::VecInt64(vec![1, 2, 3]));
        assert_eq!(stacked.unstack().unwrap(), elems);
    }

    #[test]
    fn stack_rejects_mixed_elements() {
        let elems = vec![Value::Int64(1), Value::Float64(2.0)];
        assert!(Value::stack(ValueType::Int64, &elems).is_err());
    }

    #[test]
    fn unstack_rejects_scalar() {
        assert!(Value::Int64(1).unstack().is_err());
    }

    #[test]
    fn default_of_matches_tag() {
        for ty in [ValueType::Int32, ValueType::Str, ValueType::VecUInt64] {
            assert_eq!(Value::default_of(ty).value_type(), ty);
        }
    }
}
