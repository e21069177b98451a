//! Symbolic tag paths.
//!
//! A path is text like `Program:Main.recipe[3,1].flags.7`: symbolic names
//! separated by `.`, optional bracketed indices (up to three dimensions) and
//! an optional final bit number.

use bytes::BufMut;

use crate::error::{EipError, Result};

/// ANSI extended symbolic segment.
pub const SEGMENT_SYMBOLIC: u8 = 0x91;
/// Member/element segment with an 8-bit value.
pub const SEGMENT_ELEMENT_8: u8 = 0x28;
/// Member/element segment with a 16-bit value.
pub const SEGMENT_ELEMENT_16: u8 = 0x29;
/// Member/element segment with a 32-bit value.
pub const SEGMENT_ELEMENT_32: u8 = 0x2A;

/// Highest bit number accepted as a trailing bit segment.
pub const MAX_BIT: u8 = 31;
/// Maximum indices inside one bracket group.
pub const MAX_DIMENSIONS: usize = 3;

/// One token of a parsed tag path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathElement {
    /// Symbolic name.
    Symbol(String),
    /// Array element index, one per dimension.
    Element(u32),
    /// Bit of the preceding value; never sent on the wire.
    Bit(u8),
}

impl std::fmt::Display for PathElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Symbol(name) => f.write_str(name),
            Self::Element(index) => write!(f, "[{index}]"),
            Self::Bit(bit) => write!(f, ".{bit}"),
        }
    }
}

#[derive(Default)]
struct Parser {
    out: Vec<PathElement>,
    name: String,
    index: String,
    bit: String,
    in_name: bool,
    in_bit: bool,
    dims: usize,
}

impl Parser {
    fn push_name(&mut self) {
        if !self.name.is_empty() {
            self.out.push(PathElement::Symbol(std::mem::take(&mut self.name)));
        }
    }

    fn push_index(&mut self, text: &str) -> Result<()> {
        let trimmed = self.index.trim();
        if trimmed.is_empty() {
            return Err(EipError::path_syntax(format!("{text}: empty index")));
        }
        let value: u32 = trimmed
            .parse()
            .map_err(|_| EipError::path_syntax(format!("{text}: bad index {trimmed:?}")))?;
        self.dims += 1;
        if self.dims > MAX_DIMENSIONS {
            return Err(EipError::path_syntax(format!("{text}: more than 3 dimensions")));
        }
        self.out.push(PathElement::Element(value));
        self.index.clear();
        Ok(())
    }
}

/// Parse a tag path.
///
/// Any grammar violation rejects the whole path; there are no partial results.
pub fn parse(text: &str) -> Result<Vec<PathElement>> {
    let reject = |why: &str| EipError::path_syntax(format!("{text}: {why}"));

    if text.is_empty() {
        return Err(reject("empty path"));
    }

    let mut p = Parser {
        in_name: true,
        ..Default::default()
    };
    let mut last: Option<char> = None;

    for c in text.chars() {
        match c {
            '.' => {
                if p.name.is_empty() {
                    if last != Some(']') {
                        return Err(reject("misplaced '.'"));
                    }
                } else {
                    p.push_name();
                    p.in_name = true;
                }
            }
            '[' => {
                p.in_name = false;
                // consecutive bracket groups index the same name
                if last != Some(']') {
                    p.dims = 0;
                    if p.name.is_empty() {
                        return Err(reject("index without a name"));
                    }
                    p.push_name();
                }
            }
            ']' => {
                if p.in_name {
                    return Err(reject("unmatched ']'"));
                }
                p.push_index(text)?;
                p.in_name = true;
            }
            ',' => {
                if p.in_name {
                    return Err(reject("',' outside brackets"));
                }
                p.push_index(text)?;
            }
            '0'..='9' | ' ' if p.in_name => {
                if c == ' ' {
                    return Err(reject("space inside a name"));
                }
                if p.name.is_empty() && p.bit.is_empty() {
                    if last != Some('.') {
                        return Err(reject("name starts with a digit"));
                    }
                    p.in_bit = true;
                }
                if p.in_bit {
                    p.bit.push(c);
                } else {
                    p.name.push(c);
                }
            }
            '0'..='9' | ' ' => p.index.push(c),
            'a'..='z' | 'A'..='Z' | ':' | '_' => {
                if !p.in_name || p.in_bit {
                    return Err(reject("unexpected letter"));
                }
                if p.name.is_empty() && last == Some(']') {
                    return Err(reject("missing '.' after ']'"));
                }
                p.name.push(c);
            }
            other => return Err(reject(&format!("invalid character {other:?}"))),
        }
        last = Some(c);
    }

    if matches!(last, Some('.') | Some('[')) || !p.index.is_empty() || !p.in_name {
        return Err(reject("unterminated path"));
    }

    p.push_name();
    if !p.bit.is_empty() {
        let bit: u8 = p.bit.parse().map_err(|_| reject("bad bit number"))?;
        if bit > MAX_BIT {
            return Err(reject("bit number above 31"));
        }
        p.out.push(PathElement::Bit(bit));
    }

    Ok(p.out)
}

/// Encode parsed path elements as a request path.
pub fn serialize(elements: &[PathElement]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for element in elements {
        match element {
            PathElement::Symbol(name) => {
                let len = u8::try_from(name.len()).map_err(|_| {
                    EipError::path_syntax(format!("symbol longer than 255 bytes: {name}"))
                })?;
                buf.put_u8(SEGMENT_SYMBOLIC);
                buf.put_u8(len);
                buf.put_slice(name.as_bytes());
                if len % 2 == 1 {
                    buf.put_u8(0);
                }
            }
            PathElement::Element(value) => encode_element(&mut buf, *value),
            PathElement::Bit(_) => {}
        }
    }
    Ok(buf)
}

/// Parse and serialize in one step.
pub fn encode(text: &str) -> Result<Vec<u8>> {
    serialize(&parse(text)?)
}

/// Append the narrowest element segment able to carry `value`.
pub fn encode_element(buf: &mut Vec<u8>, value: u32) {
    if value < 0x100 {
        buf.put_u8(SEGMENT_ELEMENT_8);
        buf.put_u8(value as u8);
    } else if value < 0x1_0000 {
        buf.put_u8(SEGMENT_ELEMENT_16);
        buf.put_u8(0);
        buf.put_u16_le(value as u16);
    } else {
        buf.put_u8(SEGMENT_ELEMENT_32);
        buf.put_u8(0);
        buf.put_u32_le(value);
    }
}
