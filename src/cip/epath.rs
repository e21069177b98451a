//! Request path (EPATH) decoding and logical segment encoding.

use bytes::BufMut;

use crate::error::{EipError, Result};
use crate::path::{PathElement, SEGMENT_SYMBOLIC};

/// Segment type bits selecting a logical segment.
const LOGICAL: u8 = 0x20;
const SEGMENT_TYPE_MASK: u8 = 0xE0;
const LOGICAL_TYPE_MASK: u8 = 0x1C;
const LOGICAL_SIZE_MASK: u8 = 0x03;

/// Logical segment types.
pub const LOGICAL_CLASS: u8 = 0x00;
pub const LOGICAL_INSTANCE: u8 = 0x04;
pub const LOGICAL_MEMBER: u8 = 0x08;
pub const LOGICAL_ATTRIBUTE: u8 = 0x10;

/// One decoded path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Class(u32),
    Instance(u32),
    Attribute(u32),
    /// Member or array element, depending on what precedes it.
    Member(u32),
    Symbol(String),
}

/// A decoded request path.
///
/// `class`, `instance`, `attribute` and `member` are only set when the
/// corresponding logical segment sits at its conventional position
/// (class first, instance second, attribute third, member fourth).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestPath {
    pub class: Option<u32>,
    pub instance: Option<u32>,
    pub attribute: Option<u32>,
    pub member: Option<u32>,
    pub segments: Vec<Segment>,
}

impl RequestPath {
    /// Decode a padded EPATH.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut path = RequestPath::default();
        let mut i = 0;

        while i < bytes.len() {
            let position = path.segments.len();
            let b = bytes[i];

            if b == SEGMENT_SYMBOLIC {
                let len = *bytes
                    .get(i + 1)
                    .ok_or_else(|| EipError::path_syntax("symbolic segment without length"))?
                    as usize;
                let name = bytes
                    .get(i + 2..i + 2 + len)
                    .ok_or_else(|| EipError::path_syntax("symbolic segment truncated"))?;
                let name = std::str::from_utf8(name)
                    .map_err(|_| EipError::path_syntax("symbolic segment is not text"))?;
                path.segments.push(Segment::Symbol(name.to_string()));
                i += 2 + len + (len & 1);
                continue;
            }

            if b & SEGMENT_TYPE_MASK != LOGICAL {
                return Err(EipError::path_syntax(format!("segment type 0x{b:02X}")));
            }

            let (value, width) = match b & LOGICAL_SIZE_MASK {
                0 => bytes.get(i + 1).map(|v| (*v as u32, 2)),
                1 => bytes
                    .get(i + 2..i + 4)
                    .map(|v| (u16::from_le_bytes([v[0], v[1]]) as u32, 4)),
                2 => bytes
                    .get(i + 2..i + 6)
                    .map(|v| (u32::from_le_bytes([v[0], v[1], v[2], v[3]]), 6)),
                _ => None,
            }
            .ok_or_else(|| EipError::path_syntax(format!("logical segment 0x{b:02X} size")))?;

            let segment = match b & LOGICAL_TYPE_MASK {
                LOGICAL_CLASS => {
                    if position == 0 {
                        path.class = Some(value);
                    }
                    Segment::Class(value)
                }
                LOGICAL_INSTANCE => {
                    if position == 1 {
                        path.instance = Some(value);
                    }
                    Segment::Instance(value)
                }
                LOGICAL_ATTRIBUTE => {
                    if position == 2 {
                        path.attribute = Some(value);
                    }
                    Segment::Attribute(value)
                }
                LOGICAL_MEMBER => {
                    if position == 2 && path.attribute.is_none() {
                        path.attribute = Some(value);
                    } else if position == 3 {
                        path.member = Some(value);
                    }
                    Segment::Member(value)
                }
                other => {
                    return Err(EipError::path_syntax(format!(
                        "logical segment type 0x{other:02X}"
                    )));
                }
            };
            path.segments.push(segment);
            i += width;
        }

        Ok(path)
    }

    /// Check whether the path starts with a symbolic segment.
    pub fn is_symbolic(&self) -> bool {
        matches!(self.segments.first(), Some(Segment::Symbol(_)))
    }

    /// Symbol and element selectors from `start` on; logical class,
    /// instance and attribute segments are skipped.
    pub fn tag_elements(&self, start: usize) -> Vec<PathElement> {
        self.segments
            .iter()
            .skip(start)
            .filter_map(|segment| match segment {
                Segment::Symbol(name) => Some(PathElement::Symbol(name.clone())),
                Segment::Member(index) => Some(PathElement::Element(*index)),
                _ => None,
            })
            .collect()
    }
}

/// Append a logical segment in its smallest form.
pub fn encode_logical(buf: &mut Vec<u8>, segment_type: u8, value: u32) {
    let head = LOGICAL | segment_type;
    if value <= u8::MAX as u32 {
        buf.put_u8(head);
        buf.put_u8(value as u8);
    } else if value <= u16::MAX as u32 {
        buf.put_u8(head | 1);
        buf.put_u8(0);
        buf.put_u16_le(value as u16);
    } else {
        buf.put_u8(head | 2);
        buf.put_u8(0);
        buf.put_u32_le(value);
    }
}

/// Encode a class / instance [/ attribute] path.
pub fn logical_path(class: u32, instance: u32, attribute: Option<u32>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    encode_logical(&mut buf, LOGICAL_CLASS, class);
    encode_logical(&mut buf, LOGICAL_INSTANCE, instance);
    if let Some(attribute) = attribute {
        encode_logical(&mut buf, LOGICAL_ATTRIBUTE, attribute);
    }
    buf
}
