//! Build tags from native values.

use bytes::BufMut;

use crate::error::{EipError, Result};
use crate::types::DataType;

use super::udt::MemberDef;

/// A native value that can become a tag.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Bool(bool),
    Sint(i8),
    Int(i16),
    Dint(i32),
    Lint(i64),
    Usint(u8),
    Uint(u16),
    Udint(u32),
    Ulint(u64),
    Real(f32),
    Lreal(f64),
    String(String),
    /// Fixed-size array of one elementary or structure kind.
    Array(Vec<TagValue>),
    /// Named structure; fields must be elementary values or arrays of them.
    Struct {
        name: String,
        fields: Vec<(String, TagValue)>,
    },
}

/// How a value maps onto a tag.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Shape {
    Atomic { data_type: DataType, dims: Vec<usize> },
    Structure { name: String, members: Vec<MemberDef>, dims: Vec<usize> },
    Text(String),
}

impl TagValue {
    fn data_type(&self) -> Option<DataType> {
        Some(match self {
            Self::Bool(_) => DataType::Bool,
            Self::Sint(_) => DataType::Sint,
            Self::Int(_) => DataType::Int,
            Self::Dint(_) => DataType::Dint,
            Self::Lint(_) => DataType::Lint,
            Self::Usint(_) => DataType::Usint,
            Self::Uint(_) => DataType::Uint,
            Self::Udint(_) => DataType::Udint,
            Self::Ulint(_) => DataType::Ulint,
            Self::Real(_) => DataType::Real,
            Self::Lreal(_) => DataType::Lreal,
            Self::String(_) | Self::Array(_) | Self::Struct { .. } => return None,
        })
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Struct { .. } => "struct",
            _ => "scalar",
        }
    }

    /// Member list of a struct value; fields may only be elementary values
    /// or non-empty arrays of one elementary type.
    fn struct_members(name: &str, fields: &[(String, TagValue)]) -> Result<Vec<MemberDef>> {
        fields
            .iter()
            .map(|(field, value)| match value {
                TagValue::Array(items) => {
                    let ty = homogeneous_atomic(items).ok_or_else(|| {
                        EipError::UnsupportedType(format!("{name}.{field}: mixed or nested array"))
                    })?;
                    Ok(MemberDef::new(field.clone(), ty.name()).with_dims(&[items.len()]))
                }
                other => {
                    let ty = other.data_type().ok_or_else(|| {
                        EipError::UnsupportedType(format!(
                            "{name}.{field}: {} field",
                            other.kind_name()
                        ))
                    })?;
                    Ok(MemberDef::new(field.clone(), ty.name()))
                }
            })
            .collect()
    }

    pub(crate) fn shape(&self) -> Result<Shape> {
        if let Some(data_type) = self.data_type() {
            return Ok(Shape::Atomic {
                data_type,
                dims: Vec::new(),
            });
        }

        match self {
            Self::String(s) => Ok(Shape::Text(s.clone())),
            Self::Struct { name, fields } => Ok(Shape::Structure {
                name: name.clone(),
                members: Self::struct_members(name, fields)?,
                dims: Vec::new(),
            }),
            Self::Array(items) => {
                let first = items
                    .first()
                    .ok_or_else(|| EipError::UnsupportedType("empty array".into()))?;
                let dims = vec![items.len()];
                if let Some(data_type) = homogeneous_atomic(items) {
                    return Ok(Shape::Atomic { data_type, dims });
                }
                match first {
                    Self::Struct { name, fields } => {
                        let members = Self::struct_members(name, fields)?;
                        let same = items.iter().all(|item| match item {
                            Self::Struct { name: n, fields: f } => {
                                n == name
                                    && Self::struct_members(n, f).ok().as_ref() == Some(&members)
                            }
                            _ => false,
                        });
                        if !same {
                            return Err(EipError::UnsupportedType(format!(
                                "array of {name} with differing elements"
                            )));
                        }
                        Ok(Shape::Structure {
                            name: name.clone(),
                            members,
                            dims,
                        })
                    }
                    other => Err(EipError::UnsupportedType(format!(
                        "array of {}",
                        other.kind_name()
                    ))),
                }
            }
            _ => Err(EipError::UnsupportedType(self.kind_name().into())),
        }
    }

    /// Append the little-endian encoding of the value.
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Bool(v) => buf.put_u8(if *v { 0xFF } else { 0 }),
            Self::Sint(v) => buf.put_i8(*v),
            Self::Int(v) => buf.put_i16_le(*v),
            Self::Dint(v) => buf.put_i32_le(*v),
            Self::Lint(v) => buf.put_i64_le(*v),
            Self::Usint(v) => buf.put_u8(*v),
            Self::Uint(v) => buf.put_u16_le(*v),
            Self::Udint(v) => buf.put_u32_le(*v),
            Self::Ulint(v) => buf.put_u64_le(*v),
            Self::Real(v) => buf.put_f32_le(*v),
            Self::Lreal(v) => buf.put_f64_le(*v),
            Self::String(s) => {
                buf.put_u16_le(s.len() as u16);
                buf.put_slice(s.as_bytes());
            }
            Self::Array(items) => items.iter().for_each(|item| item.encode(buf)),
            Self::Struct { fields, .. } => fields.iter().for_each(|(_, v)| v.encode(buf)),
        }
    }
}

fn homogeneous_atomic(items: &[TagValue]) -> Option<DataType> {
    let first = items.first()?.data_type()?;
    items
        .iter()
        .all(|item| item.data_type() == Some(first))
        .then_some(first)
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for TagValue {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i8 => Sint,
    i16 => Int,
    i32 => Dint,
    i64 => Lint,
    u8 => Usint,
    u16 => Uint,
    u32 => Udint,
    u64 => Ulint,
    f32 => Real,
    f64 => Lreal,
    String => String,
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl<T: Into<TagValue>> From<Vec<T>> for TagValue {
    fn from(v: Vec<T>) -> Self {
        Self::Array(v.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(x: i32, y: i32) -> TagValue {
        TagValue::Struct {
            name: "POSITION".into(),
            fields: vec![("x".into(), x.into()), ("y".into(), y.into())],
        }
    }

    #[test]
    fn test_scalar_shape_and_bytes() {
        let value = TagValue::from(-2i16);
        assert_eq!(
            value.shape().unwrap(),
            Shape::Atomic {
                data_type: DataType::Int,
                dims: vec![]
            }
        );
        let mut buf = Vec::new();
        value.encode(&mut buf);
        assert_eq!(buf, vec![0xFE, 0xFF]);
    }

    #[test]
    fn test_array_shape() {
        let value = TagValue::from(vec![1.0f32, 2.0, 3.0]);
        assert_eq!(
            value.shape().unwrap(),
            Shape::Atomic {
                data_type: DataType::Real,
                dims: vec![3]
            }
        );
    }

    #[test]
    fn test_bool_encoding() {
        let mut buf = Vec::new();
        TagValue::from(vec![true, false]).encode(&mut buf);
        assert_eq!(buf, vec![0xFF, 0x00]);
    }

    #[test]
    fn test_struct_shape() {
        let Shape::Structure { name, members, dims } = position(1, 2).shape().unwrap() else {
            panic!("expected structure");
        };
        assert_eq!(name, "POSITION");
        assert!(dims.is_empty());
        assert_eq!(members[0], MemberDef::new("x", "DINT"));

        let mut buf = Vec::new();
        position(1, 2).encode(&mut buf);
        assert_eq!(buf, vec![1, 0, 0, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn test_array_of_structs() {
        let value = TagValue::Array(vec![position(1, 2), position(3, 4)]);
        let Shape::Structure { dims, .. } = value.shape().unwrap() else {
            panic!("expected structure");
        };
        assert_eq!(dims, vec![2]);
    }

    #[test]
    fn test_unsupported_shapes() {
        let cases = vec![
            TagValue::Array(vec![]),
            TagValue::Array(vec![1i32.into(), 1i16.into()]),
            TagValue::Array(vec![TagValue::from(vec![1u8])]),
            TagValue::Array(vec!["a".into()]),
            TagValue::Struct {
                name: "S".into(),
                fields: vec![("s".into(), "text".into())],
            },
            TagValue::Struct {
                name: "S".into(),
                fields: vec![("inner".into(), position(0, 0))],
            },
        ];
        for value in cases {
            assert!(
                matches!(value.shape(), Err(EipError::UnsupportedType(_))),
                "{value:?}"
            );
        }
    }
}
