//! Tags held in the store.

use bytes::BufMut;

use crate::error::{EipError, Result};
use crate::types::{array_flag, DataType, STRUCT_TYPE_PREFIX, TYPE_CODE_MASK, TYPE_STRUCT};

use super::udt::StructureDescriptor;

/// What a tag (or structure member) holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    /// Elementary CIP type.
    Atomic(DataType),
    /// Structure, identified by its handle.
    Structure(u16),
}

impl TagKind {
    /// Append the type prefix used in read replies and write requests.
    ///
    /// Atomic types are a single type word; structures are `0x02A0`
    /// followed by the structure handle.
    pub fn encode_type<B: BufMut>(&self, buf: &mut B) {
        match self {
            Self::Atomic(ty) => buf.put_u16_le(ty.code()),
            Self::Structure(handle) => {
                buf.put_u16_le(STRUCT_TYPE_PREFIX);
                buf.put_u16_le(*handle);
            }
        }
    }

    /// Size of the type prefix in bytes.
    pub fn type_len(&self) -> usize {
        match self {
            Self::Atomic(_) => 2,
            Self::Structure(_) => 4,
        }
    }

    /// Symbol type word for a value of this kind with the given dimensions.
    pub fn symbol_type(&self, dims: &[usize; 3]) -> u16 {
        let rank = dims.iter().take_while(|d| **d > 0).count();
        match self {
            Self::Atomic(ty) => ty.code() | array_flag(rank),
            Self::Structure(handle) => TYPE_STRUCT | array_flag(rank) | (handle & TYPE_CODE_MASK),
        }
    }

    /// The elementary type, if any.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Atomic(ty) => Some(*ty),
            Self::Structure(_) => None,
        }
    }
}

/// Validate up to three array dimensions; an empty slice is a scalar.
pub(crate) fn pack_dims(dims: &[usize]) -> Result<[usize; 3]> {
    if dims.len() > 3 {
        return Err(EipError::UnsupportedType(format!(
            "{} array dimensions",
            dims.len()
        )));
    }
    if dims.contains(&0) {
        return Err(EipError::UnsupportedType("zero-length dimension".into()));
    }
    let mut out = [0usize; 3];
    out[..dims.len()].copy_from_slice(dims);
    Ok(out)
}

/// Number of elements described by packed dimensions.
pub(crate) fn element_count(dims: &[usize; 3]) -> usize {
    dims.iter().filter(|d| **d > 0).product::<usize>().max(1)
}

/// A named process value.
///
/// The data buffer is always `element_len × count` bytes long.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    name: String,
    kind: TagKind,
    dims: [usize; 3],
    element_len: usize,
    data: Vec<u8>,
}

impl Tag {
    /// Create a zero-filled tag of an elementary type.
    pub fn new(name: impl Into<String>, data_type: DataType, dims: &[usize]) -> Result<Self> {
        let dims = pack_dims(dims)?;
        let element_len = data_type.element_len();
        Ok(Self {
            name: name.into(),
            kind: TagKind::Atomic(data_type),
            data: vec![0; element_len * element_count(&dims)],
            dims,
            element_len,
        })
    }

    /// Create a zero-filled tag of a structure type.
    pub fn structure(
        name: impl Into<String>,
        structure: &StructureDescriptor,
        dims: &[usize],
    ) -> Result<Self> {
        let dims = pack_dims(dims)?;
        let element_len = structure.size();
        Ok(Self {
            name: name.into(),
            kind: TagKind::Structure(structure.handle()),
            data: vec![0; element_len * element_count(&dims)],
            dims,
            element_len,
        })
    }

    /// Create a STRING tag (16-bit length prefix followed by the characters).
    ///
    /// The whole buffer is one element.
    pub fn string(name: impl Into<String>, value: &str) -> Result<Self> {
        let len = u16::try_from(value.len())
            .map_err(|_| EipError::UnsupportedType("string longer than 65535 bytes".into()))?;
        let mut data = Vec::with_capacity(2 + value.len());
        data.put_u16_le(len);
        data.put_slice(value.as_bytes());
        Ok(Self {
            name: name.into(),
            kind: TagKind::Atomic(DataType::String),
            dims: [0; 3],
            element_len: data.len(),
            data,
        })
    }

    /// Replace the zero-filled buffer with initial data of the exact size.
    pub fn with_data(mut self, data: Vec<u8>) -> Result<Self> {
        if data.len() != self.data.len() {
            return Err(EipError::LengthMismatch {
                expected: self.data.len(),
                actual: data.len(),
            });
        }
        self.data = data;
        Ok(self)
    }

    /// A detached copy of a read or written region, handed to observers.
    pub(crate) fn snapshot(name: &str, kind: TagKind, element_len: usize, data: Vec<u8>) -> Self {
        let count = if element_len == 0 { 0 } else { data.len() / element_len };
        let mut dims = [0; 3];
        if count > 1 {
            dims[0] = count;
        }
        Self {
            name: name.to_string(),
            kind,
            dims,
            element_len,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TagKind {
        self.kind
    }

    /// Array dimensions; unused dimensions are 0.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Number of elements.
    pub fn count(&self) -> usize {
        element_count(&self.dims)
    }

    /// Size of one element in bytes.
    pub fn element_len(&self) -> usize {
        self.element_len
    }

    /// Raw little-endian data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Symbol type word (type code plus array/structure flags).
    pub fn symbol_type(&self) -> u16 {
        self.kind.symbol_type(&self.dims)
    }

    /// BOOL view: every non-zero byte is `true`.
    pub fn as_bools(&self) -> Vec<bool> {
        self.data.iter().map(|b| *b != 0).collect()
    }

    pub fn as_i16s(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    pub fn as_i32s(&self) -> Vec<i32> {
        self.data
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    pub fn as_i64s(&self) -> Vec<i64> {
        self.data
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect()
    }

    pub fn as_f32s(&self) -> Vec<f32> {
        self.data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// Text of a STRING or SHORT_STRING tag.
    pub fn as_str(&self) -> Option<String> {
        let body = match self.kind {
            TagKind::Atomic(DataType::String) if self.data.len() >= 2 => {
                let len = u16::from_le_bytes([self.data[0], self.data[1]]) as usize;
                self.data.get(2..2 + len)?
            }
            TagKind::Atomic(DataType::ShortString) if !self.data.is_empty() => {
                let len = self.data[0] as usize;
                self.data.get(1..1 + len)?
            }
            _ => return None,
        };
        Some(String::from_utf8_lossy(body).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tag_zero_filled() {
        let tag = Tag::new("counts", DataType::Int, &[4, 2]).unwrap();
        assert_eq!(tag.count(), 8);
        assert_eq!(tag.data().len(), 16);
        assert!(tag.data().iter().all(|b| *b == 0));
        assert_eq!(tag.dims(), [4, 2, 0]);
    }

    #[test]
    fn test_too_many_dimensions() {
        let result = Tag::new("x", DataType::Dint, &[1, 2, 3, 4]);
        assert!(matches!(result, Err(EipError::UnsupportedType(_))));
    }

    #[test]
    fn test_with_data_length_checked() {
        let tag = Tag::new("x", DataType::Dint, &[2]).unwrap();
        assert!(tag.clone().with_data(vec![0; 8]).is_ok());
        assert!(matches!(
            tag.with_data(vec![0; 7]),
            Err(EipError::LengthMismatch { expected: 8, actual: 7 })
        ));
    }

    #[test]
    fn test_symbol_type_flags() {
        let scalar = Tag::new("a", DataType::Dint, &[]).unwrap();
        assert_eq!(scalar.symbol_type(), 0x00C4);

        let matrix = Tag::new("b", DataType::Int, &[3, 3]).unwrap();
        assert_eq!(matrix.symbol_type(), 0x40C3);

        assert_eq!(TagKind::Structure(0x1234).symbol_type(&[2, 0, 0]), 0xA234);
    }

    #[test]
    fn test_encode_type() {
        let mut buf = Vec::new();
        TagKind::Atomic(DataType::Real).encode_type(&mut buf);
        TagKind::Structure(0xBEEF).encode_type(&mut buf);
        assert_eq!(buf, vec![0xCA, 0x00, 0xA0, 0x02, 0xEF, 0xBE]);
    }

    #[test]
    fn test_typed_accessors() {
        let tag = Tag::new("v", DataType::Dint, &[2])
            .unwrap()
            .with_data(vec![1, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF])
            .unwrap();
        assert_eq!(tag.as_i32s(), vec![1, -1]);
        assert_eq!(tag.as_i16s(), vec![1, 0, -1, -1]);

        let real = Tag::new("r", DataType::Real, &[])
            .unwrap()
            .with_data(1.5f32.to_le_bytes().to_vec())
            .unwrap();
        assert_eq!(real.as_f32s(), vec![1.5]);
    }

    #[test]
    fn test_string_tag() {
        let tag = Tag::string("msg", "hello").unwrap();
        assert_eq!(tag.data(), &[5, 0, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(tag.count(), 1);
        assert_eq!(tag.element_len(), 7);
        assert_eq!(tag.as_str().as_deref(), Some("hello"));

        let number = Tag::new("n", DataType::Int, &[]).unwrap();
        assert_eq!(number.as_str(), None);
    }
}
